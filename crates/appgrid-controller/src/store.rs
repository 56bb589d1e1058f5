//! The store contract a reconciliation pass consumes.
//!
//! Calls are blocking round trips. Implementations may serve stale reads;
//! the reconciler recomputes everything from a fresh list each pass.

use appgrid_state::{
    AppService, AppServiceStatus, LabelSelector, ObjectKey, Pod, StateResult, StateStore,
};

pub trait ResourceStore: Send + Sync {
    /// Fetch the desired state; `None` if the resource does not exist.
    fn get_app_service(&self, key: &ObjectKey) -> StateResult<Option<AppService>>;

    /// Keys of every AppService, for periodic resync.
    fn list_app_service_keys(&self) -> StateResult<Vec<ObjectKey>>;

    /// Candidate pods by namespace and label selector.
    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> StateResult<Vec<Pod>>;

    /// Create a pod, returning its name.
    fn create_pod(&self, pod: &Pod) -> StateResult<String>;

    /// Request deletion; `false` if the pod was already gone.
    fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: u64)
    -> StateResult<bool>;

    /// Persist the observed status of the resource with the given uid.
    fn update_status(&self, key: &ObjectKey, uid: &str, status: AppServiceStatus)
    -> StateResult<()>;
}

impl ResourceStore for StateStore {
    fn get_app_service(&self, key: &ObjectKey) -> StateResult<Option<AppService>> {
        StateStore::get_app_service(self, key)
    }

    fn list_app_service_keys(&self) -> StateResult<Vec<ObjectKey>> {
        Ok(self
            .list_app_services()?
            .into_iter()
            .map(|app| app.key())
            .collect())
    }

    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> StateResult<Vec<Pod>> {
        StateStore::list_pods(self, namespace, selector)
    }

    fn create_pod(&self, pod: &Pod) -> StateResult<String> {
        StateStore::create_pod(self, pod).map(|created| created.metadata.name)
    }

    fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u64,
    ) -> StateResult<bool> {
        StateStore::delete_pod(self, namespace, name, grace_period_seconds)
    }

    fn update_status(
        &self,
        key: &ObjectKey,
        uid: &str,
        status: AppServiceStatus,
    ) -> StateResult<()> {
        self.update_app_service_status(key, uid, status)
    }
}

impl<S: ResourceStore + ?Sized> ResourceStore for std::sync::Arc<S> {
    fn get_app_service(&self, key: &ObjectKey) -> StateResult<Option<AppService>> {
        (**self).get_app_service(key)
    }

    fn list_app_service_keys(&self) -> StateResult<Vec<ObjectKey>> {
        (**self).list_app_service_keys()
    }

    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> StateResult<Vec<Pod>> {
        (**self).list_pods(namespace, selector)
    }

    fn create_pod(&self, pod: &Pod) -> StateResult<String> {
        (**self).create_pod(pod)
    }

    fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u64,
    ) -> StateResult<bool> {
        (**self).delete_pod(namespace, name, grace_period_seconds)
    }

    fn update_status(
        &self,
        key: &ObjectKey,
        uid: &str,
        status: AppServiceStatus,
    ) -> StateResult<()> {
        (**self).update_status(key, uid, status)
    }
}
