//! A pool of workers draining the work queue into reconcile passes.
//!
//! Every worker loops `get → reconcile → forget | add_rate_limited → done`.
//! The queue guarantees a key is never reconciled by two workers at once;
//! distinct keys proceed in parallel. Passes run on the blocking pool since
//! store calls are synchronous.

use std::sync::Arc;
use std::time::Duration;

use appgrid_state::ObjectKey;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::queue::{RetryPolicy, WorkQueue};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::ResourceStore;

pub struct Controller<S> {
    reconciler: Arc<Reconciler<S>>,
    queue: Arc<WorkQueue>,
}

impl<S: ResourceStore + 'static> Controller<S> {
    pub fn new(reconciler: Reconciler<S>, retry: RetryPolicy) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new(retry)),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    /// Request a pass for `key`.
    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    /// Enqueue every known AppService. Returns how many keys were added.
    pub fn resync(&self) -> ControllerResult<usize> {
        let keys = self.reconciler.store().list_app_service_keys()?;
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        debug!(count, "resync enqueued app services");
        Ok(count)
    }

    /// Take one key from the queue and run a pass for it. Returns `false`
    /// once the queue has shut down.
    pub async fn process_next(&self, shutdown: &watch::Receiver<bool>) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let reconciler = Arc::clone(&self.reconciler);
        let rx = shutdown.clone();
        let pass_key = key.clone();
        let result = tokio::task::spawn_blocking(move || {
            reconciler.reconcile_with_shutdown(&pass_key, Some(&rx))
        })
        .await
        .map_err(|e| ControllerError::Worker(e.to_string()))
        .and_then(|r| r);

        match result {
            Ok(ReconcileOutcome::Gone { .. }) => {
                self.queue.forget(&key);
            }
            Ok(ReconcileOutcome::Synced(report)) => {
                self.queue.forget(&key);
                debug!(
                    %key,
                    created = report.created.len(),
                    deleted = report.deleted.len(),
                    replicas = report.observed_after,
                    "pass complete"
                );
            }
            Err(ControllerError::Cancelled) => {
                debug!(%key, "pass cancelled by shutdown");
            }
            Err(e) if e.is_retryable() => {
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(
                    %key,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    attempts = self.queue.num_requeues(&key),
                    "pass failed, requeued"
                );
            }
            Err(e) => {
                self.queue.forget(&key);
                error!(%key, error = %e, "pass failed, not retrying");
            }
        }

        self.queue.done(&key);
        true
    }

    /// Run `workers` workers until `shutdown` reads `true`, then shut the
    /// queue down and wait for in-flight passes to return.
    pub async fn run(self: Arc<Self>, workers: usize, mut shutdown: watch::Receiver<bool>) {
        let workers = workers.max(1);
        info!(workers, "controller started");

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let this = Arc::clone(&self);
                let rx = shutdown.clone();
                tokio::spawn(async move {
                    while this.process_next(&rx).await {}
                    debug!(worker = id, "worker stopped");
                })
            })
            .collect();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        self.queue.shut_down();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker panicked");
            }
        }
        info!("controller stopped");
    }

    /// Periodically enqueue every AppService so drift is corrected even
    /// without change notifications.
    pub async fn run_resync(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "resync loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.resync() {
                        warn!(error = %e, "resync failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("resync loop shutting down");
                    break;
                }
            }
        }
    }
}
