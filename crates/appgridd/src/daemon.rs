//! `appgridd run`: assembles the store, the controller and the background
//! loops, then waits for Ctrl-C.
//!
//! 1. Opens the state store under `state.data_dir`
//! 2. Applies the configured manifests
//! 3. Starts the controller workers and the periodic resync
//! 4. Starts the pod reaper, which finishes graceful deletes
//! 5. On shutdown, stops new passes and waits for in-flight ones

use std::sync::Arc;

use anyhow::Context;
use appgrid_controller::{Controller, PodTemplate, Reconciler, RetryPolicy};
use appgrid_core::OperatorConfig;
use appgrid_state::{ObjectKey, StateStore, store::epoch_secs};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::manifest;

pub async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    info!("appgrid daemon starting");

    let state = crate::open_store(&config.state.data_dir)?;

    // ── Seed manifests ─────────────────────────────────────────

    for path in &config.manifests {
        let app = manifest::load(path)?;
        let stored = state
            .put_app_service(&app)
            .with_context(|| format!("applying {}", path.display()))?;
        info!(key = %stored.key(), size = stored.spec.replicas, "manifest applied");
    }

    // ── Controller ─────────────────────────────────────────────

    let retry = RetryPolicy {
        base: config.controller.retry_base()?,
        max: config.controller.retry_max()?,
    };
    let template = PodTemplate::from(&config.pods);
    let controller = Arc::new(Controller::new(
        Reconciler::new(state.clone(), template),
        retry,
    ));
    let queued = controller.resync()?;
    info!(
        workers = config.controller.workers,
        queued,
        "controller initialized"
    );

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller_handle = tokio::spawn(
        Arc::clone(&controller).run(config.controller.workers, shutdown_rx.clone()),
    );

    let resync_interval = config.controller.resync_interval()?;
    let resync_controller = Arc::clone(&controller);
    let resync_shutdown = shutdown_rx.clone();
    let resync_handle = tokio::spawn(async move {
        resync_controller
            .run_resync(resync_interval, resync_shutdown)
            .await;
    });

    let reap_interval = config.controller.reap_interval()?;
    let reaper_controller = Arc::clone(&controller);
    let mut reaper_shutdown = shutdown_rx;
    let reaper_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(reap_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => reap(&state, &reaper_controller),
                _ = reaper_shutdown.changed() => break,
            }
        }
    });

    // ── Wait for shutdown ──────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = controller_handle.await;
    let _ = resync_handle.await;
    let _ = reaper_handle.await;

    info!("appgrid daemon stopped");
    Ok(())
}

/// Remove pods past their deletion grace period and requeue their owners.
fn reap(state: &StateStore, controller: &Controller<StateStore>) {
    match state.purge_expired_pods(epoch_secs()) {
        Ok(purged) if !purged.is_empty() => {
            debug!(count = purged.len(), "purged expired pods");
            for pod in purged {
                if let Some(owner) = pod.metadata.owner_references.first() {
                    controller.enqueue(ObjectKey::new(&pod.metadata.namespace, &owner.name));
                }
            }
        }
        Err(e) => warn!(error = %e, "pod reaper error"),
        _ => {}
    }
}
