//! appgrid-controller — keeps the pod count of each `AppService` at its
//! declared size.
//!
//! A reconciliation pass is level-triggered: it reads the current desired
//! state and the current pods, and issues whatever creates or deletes close
//! the gap. Nothing is remembered between passes, so the pass is safe to run
//! any number of times, in any order, for any key.
//!
//! # Architecture
//!
//! ```text
//! Controller (worker pool, resync)
//!   └── WorkQueue (coalescing, per-key serialized, rate-limited retries)
//!         └── Reconciler::reconcile(key)          one pass
//!               ├── ResourceStore::get_app_service
//!               ├── ResourceStore::list_pods ──► classify
//!               ├── engine::plan ──► naming::generate_name
//!               ├── apply actions (create / delete, sequential)
//!               └── status::write_status
//! ```

pub mod classify;
pub mod controller;
pub mod engine;
pub mod error;
pub mod naming;
pub mod queue;
pub mod reconciler;
pub mod status;
pub mod store;

pub use classify::{Classified, classify};
pub use controller::Controller;
pub use engine::{Action, Plan, PodTemplate, ScalePhase, plan};
pub use error::{ControllerError, ControllerResult};
pub use naming::generate_name;
pub use queue::{RetryPolicy, WorkQueue};
pub use reconciler::{PassReport, ReconcileOutcome, Reconciler};
pub use store::ResourceStore;
