//! Status writer — recount after actions and persist the observed replicas.

use appgrid_state::{AppService, AppServiceStatus, LabelSelector, Pod};
use tracing::debug;

use crate::classify::counts_as_replica;
use crate::error::ControllerResult;
use crate::store::ResourceStore;

/// Number of pods in `pods` that count as replicas of `owner_uid`.
pub fn observed_replicas(pods: &[Pod], owner_uid: &str) -> i32 {
    let count = pods
        .iter()
        .filter(|p| counts_as_replica(p, owner_uid))
        .count();
    i32::try_from(count).unwrap_or(i32::MAX)
}

/// Re-list the pods of `app`, write the fresh count as its status and
/// return it.
///
/// Pod changes made earlier in the pass are never undone if this fails.
pub fn write_status<S: ResourceStore + ?Sized>(
    store: &S,
    app: &AppService,
    selector: &LabelSelector,
) -> ControllerResult<i32> {
    let pods = store.list_pods(&app.metadata.namespace, selector)?;
    let replicas = observed_replicas(&pods, &app.metadata.uid);

    store.update_status(&app.key(), &app.metadata.uid, AppServiceStatus { replicas })?;
    debug!(key = %app.key(), replicas, "status updated");
    Ok(replicas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PodTemplate;
    use appgrid_state::{PodPhase, StateStore};

    #[test]
    fn counts_only_live_owned_pods() {
        let store = StateStore::open_in_memory().unwrap();
        let app = store
            .put_app_service(&AppService::new("default", "web", 3))
            .unwrap();
        let stale = store
            .put_app_service(&AppService::new("default", "web-old", 1))
            .unwrap();
        let template = PodTemplate::default();

        let a = store.create_pod(&template.new_pod(&app, "web-a".into())).unwrap();
        store.create_pod(&template.new_pod(&app, "web-b".into())).unwrap();
        let c = store.create_pod(&template.new_pod(&app, "web-c".into())).unwrap();
        store.create_pod(&template.new_pod(&app, "web-d".into())).unwrap();

        // Foreign owner but matching label.
        let mut foreign = template.new_pod(&stale, "web-x".into());
        foreign.metadata.labels.insert("app".into(), "web".into());
        store.create_pod(&foreign).unwrap();

        store.set_pod_phase(&a.key(), PodPhase::Running).unwrap();
        store.set_pod_phase(&c.key(), PodPhase::Failed).unwrap();
        store.delete_pod("default", "web-d", 5).unwrap();

        let selector = template.selector_for(&app);
        let replicas = write_status(&store, &app, &selector).unwrap();
        assert_eq!(replicas, 2);

        let stored = store.get_app_service(&app.key()).unwrap().unwrap();
        assert_eq!(stored.status.replicas, 2);
    }

    #[test]
    fn fails_when_resource_was_recreated() {
        let store = StateStore::open_in_memory().unwrap();
        let old = store
            .put_app_service(&AppService::new("default", "web", 1))
            .unwrap();
        store.delete_app_service(&old.key()).unwrap();
        store
            .put_app_service(&AppService::new("default", "web", 1))
            .unwrap();

        let selector = PodTemplate::default().selector_for(&old);
        assert!(write_status(&store, &old, &selector).is_err());
    }
}
