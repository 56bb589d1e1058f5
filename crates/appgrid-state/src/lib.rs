//! appgrid-state — embedded resource store for appgrid.
//!
//! Backed by [redb](https://docs.rs/redb), persists the two object kinds the
//! controller works with: `AppService` (desired state, written by users) and
//! `Pod` (instances, written by the controller).
//!
//! # Architecture
//!
//! Both object kinds are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by `{namespace}/{name}`. Sorted keys give a stable listing order
//! within a single read transaction.
//!
//! The store also plays the parts of the API server the controller relies
//! on: uid assignment, ownership garbage collection when an `AppService` is
//! deleted, and graceful pod deletion (mark first, purge after the grace
//! period).
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod labels;
pub mod store;
pub mod tables;
pub mod types;
pub mod value;

pub use error::{StateError, StateResult};
pub use labels::LabelSelector;
pub use store::StateStore;
pub use types::*;
pub use value::Value;
