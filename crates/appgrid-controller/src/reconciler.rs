//! Reconciler — one level-triggered pass for one AppService key.
//!
//! ```text
//! get_app_service ─► list_pods ─► classify ─► plan ─► apply ─► write_status
//! ```
//!
//! A pass never remembers anything from earlier passes. When an action
//! fails, the actions already applied stay applied and the error is handed
//! back so the caller can retry; the retry recomputes the delta from what
//! the store then reports, so at most the real deficit is ever created.

use appgrid_state::{AppService, ObjectKey};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn};

use crate::classify::classify;
use crate::engine::{Action, PodTemplate, ScalePhase, plan};
use crate::error::{ControllerError, ControllerResult};
use crate::status::write_status;
use crate::store::ResourceStore;

/// Result of a pass that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The AppService no longer exists. Its pods are left to ownership
    /// garbage collection.
    Gone { key: ObjectKey },
    Synced(PassReport),
}

/// What a pass saw and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub key: ObjectKey,
    pub phase: ScalePhase,
    pub desired: i32,
    /// Replica count before any action.
    pub observed_before: usize,
    /// Owned pods in a phase that is neither counted nor cleaned up.
    pub ignored: usize,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    /// Replica count written to status.
    pub observed_after: i32,
}

/// Runs reconciliation passes against a store.
pub struct Reconciler<S> {
    store: S,
    template: PodTemplate,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: S, template: PodTemplate) -> Self {
        Self { store, template }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn template(&self) -> &PodTemplate {
        &self.template
    }

    /// Run one pass for `key` to completion.
    pub fn reconcile(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome> {
        self.reconcile_with_shutdown(key, None)
    }

    /// Run one pass for `key`, stopping between actions once `shutdown`
    /// reads `true`. Actions issued before that point are not undone.
    pub fn reconcile_with_shutdown(
        &self,
        key: &ObjectKey,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> ControllerResult<ReconcileOutcome> {
        let span = info_span!("reconcile", namespace = %key.namespace, name = %key.name);
        let _guard = span.enter();

        let cancelled = || shutdown.is_some_and(|rx| *rx.borrow());

        let Some(app) = self.store.get_app_service(key)? else {
            debug!("app service not found, nothing to do");
            return Ok(ReconcileOutcome::Gone { key: key.clone() });
        };
        log_values(&app);

        let selector = self.template.selector_for(&app);
        let candidates = self.store.list_pods(&app.metadata.namespace, &selector)?;
        let classified = classify(candidates, &app.metadata.uid);
        if classified.other > 0 {
            warn!(
                count = classified.other,
                "owned pods in a terminal or unknown phase are not counted or cleaned up"
            );
        }

        let plan = plan(&app, &classified, &self.template);
        info!(
            desired = plan.desired,
            running = classified.running.len(),
            pending = classified.pending.len(),
            delta = plan.delta,
            phase = %plan.phase,
            "reconciling"
        );

        let mut created = Vec::new();
        let mut deleted = Vec::new();
        for action in &plan.actions {
            if cancelled() {
                warn!(
                    created = created.len(),
                    deleted = deleted.len(),
                    "pass cancelled before all actions were applied"
                );
                return Err(ControllerError::Cancelled);
            }
            let applied = match action {
                Action::Create(pod) => self.store.create_pod(pod).map(|name| {
                    info!(pod = %name, "created pod");
                    created.push(name);
                }),
                Action::Delete {
                    key: pod_key,
                    grace_period_seconds,
                } => self
                    .store
                    .delete_pod(&pod_key.namespace, &pod_key.name, *grace_period_seconds)
                    .map(|existed| {
                        if existed {
                            info!(pod = %pod_key.name, grace_period_seconds, "deleted pod");
                        } else {
                            debug!(pod = %pod_key.name, "pod already gone");
                        }
                        deleted.push(pod_key.name.clone());
                    }),
            };
            if let Err(e) = applied {
                warn!(
                    error = %e,
                    created = created.len(),
                    deleted = deleted.len(),
                    remaining = plan.actions.len() - created.len() - deleted.len(),
                    "action failed, leaving the rest for the next pass"
                );
                return Err(e.into());
            }
        }

        let observed_after = write_status(&self.store, &app, &selector)?;
        info!(replicas = observed_after, "status updated");

        Ok(ReconcileOutcome::Synced(PassReport {
            key: key.clone(),
            phase: plan.phase,
            desired: plan.desired,
            observed_before: plan.current,
            ignored: classified.other,
            created,
            deleted,
            observed_after,
        }))
    }
}

/// Log the opaque configuration by shape. The values are never interpreted.
fn log_values(app: &AppService) {
    for (key, value) in &app.spec.values.objects {
        debug!(key = %key, kind = value.type_name(), value = %value, "spec value");
    }
}
