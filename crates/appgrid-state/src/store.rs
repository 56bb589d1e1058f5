//! StateStore — redb-backed persistence for appgrid objects.
//!
//! Provides typed operations over `AppService` and `Pod` objects. All values
//! are JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Beyond plain CRUD the store enforces the server-side rules the controller
//! depends on: uid assignment, uid-checked status writes, ownership garbage
//! collection and two-step graceful pod deletion.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::labels::LabelSelector;
use crate::tables::*;
use crate::types::*;

/// Longest object name the store accepts (DNS-1123 label length).
pub const MAX_NAME_LENGTH: usize = 63;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APP_SERVICES).map_err(map_err!(Table))?;
        txn.open_table(PODS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read and decode a single value.
    fn get_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Decode every value in a table, in key order.
    fn list_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── AppServices ────────────────────────────────────────────────

    /// Insert or update an AppService.
    ///
    /// On first insert a uid and creation time are assigned. On update the
    /// stored uid, creation time and status are kept; spec and labels are
    /// replaced. The replica bound is validated here.
    pub fn put_app_service(&self, app: &AppService) -> StateResult<AppService> {
        app.spec.validate()?;
        validate_meta(&app.metadata)?;

        let key = app.metadata.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(APP_SERVICES).map_err(map_err!(Table))?;
            let existing: Option<AppService> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            let mut next = app.clone();
            match existing {
                Some(prev) => {
                    next.metadata.uid = prev.metadata.uid;
                    next.metadata.created_at = prev.metadata.created_at;
                    next.status = prev.status;
                }
                None => {
                    next.metadata.uid = new_uid();
                    next.metadata.created_at = epoch_secs();
                    next.status = AppServiceStatus::default();
                }
            }

            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            stored = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, uid = %stored.metadata.uid, "app service stored");
        Ok(stored)
    }

    /// Get an AppService by key.
    pub fn get_app_service(&self, key: &ObjectKey) -> StateResult<Option<AppService>> {
        self.get_json(APP_SERVICES, &key.to_string())
    }

    /// List all AppServices.
    pub fn list_app_services(&self) -> StateResult<Vec<AppService>> {
        self.list_json(APP_SERVICES)
    }

    /// Delete an AppService and every pod it owns. Returns true if it existed.
    ///
    /// Pods are matched on the uid of their first owner reference, so pods
    /// left behind by an older resource of the same name are not touched.
    pub fn delete_app_service(&self, key: &ObjectKey) -> StateResult<bool> {
        let key_str = key.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed: Option<AppService>;
        let mut collected = 0usize;
        {
            let mut apps = txn.open_table(APP_SERVICES).map_err(map_err!(Table))?;
            removed = match apps.remove(key_str.as_str()).map_err(map_err!(Write))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            if let Some(app) = &removed {
                let mut pods = txn.open_table(PODS).map_err(map_err!(Table))?;
                let mut owned = Vec::new();
                for entry in pods.iter().map_err(map_err!(Read))? {
                    let (k, v) = entry.map_err(map_err!(Read))?;
                    let pod: Pod =
                        serde_json::from_slice(v.value()).map_err(map_err!(Deserialize))?;
                    if pod.owner_uid() == Some(app.metadata.uid.as_str()) {
                        owned.push(k.value().to_string());
                    }
                }
                for pod_key in &owned {
                    pods.remove(pod_key.as_str()).map_err(map_err!(Write))?;
                }
                collected = owned.len();
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %key_str, existed = removed.is_some(), pods_collected = collected, "app service deleted");
        Ok(removed.is_some())
    }

    /// Write the status of an AppService.
    ///
    /// `uid` must match the stored object; a mismatch means the resource was
    /// deleted and recreated since the caller read it.
    pub fn update_app_service_status(
        &self,
        key: &ObjectKey,
        uid: &str,
        status: AppServiceStatus,
    ) -> StateResult<()> {
        let key_str = key.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APP_SERVICES).map_err(map_err!(Table))?;
            let mut app: AppService = match table.get(key_str.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key_str)),
            };
            if app.metadata.uid != uid {
                return Err(StateError::Conflict {
                    key: key_str,
                    expected: uid.to_string(),
                    found: app.metadata.uid,
                });
            }
            app.status = status;
            let value = serde_json::to_vec(&app).map_err(map_err!(Serialize))?;
            table
                .insert(key_str.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Pods ───────────────────────────────────────────────────────

    /// Create a pod. Fails with `AlreadyExists` if the name is taken.
    ///
    /// The store assigns the uid and creation time and starts the pod in
    /// phase `Pending`.
    pub fn create_pod(&self, pod: &Pod) -> StateResult<Pod> {
        validate_meta(&pod.metadata)?;

        let key = pod.metadata.table_key();
        let mut stored = pod.clone();
        stored.metadata.uid = new_uid();
        stored.metadata.created_at = epoch_secs();
        stored.metadata.deletion_timestamp = None;
        stored.metadata.deletion_grace_period_seconds = None;
        stored.status = PodStatus::default();
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, uid = %stored.metadata.uid, "pod created");
        Ok(stored)
    }

    /// Get a pod by key.
    pub fn get_pod(&self, key: &ObjectKey) -> StateResult<Option<Pod>> {
        self.get_json(PODS, &key.to_string())
    }

    /// List pods in a namespace whose labels match `selector`, in key order.
    pub fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> StateResult<Vec<Pod>> {
        let prefix = format!("{namespace}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PODS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let pod: Pod = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if selector.matches(&pod.metadata.labels) {
                results.push(pod);
            }
        }
        Ok(results)
    }

    /// Request deletion of a pod. Returns false if the pod does not exist.
    ///
    /// A zero grace period removes the pod at once. Otherwise the pod is
    /// marked with a deletion timestamp and removed later by
    /// [`purge_expired_pods`](Self::purge_expired_pods). Marking an already
    /// marked pod is a no-op.
    pub fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u64,
    ) -> StateResult<bool> {
        let key = format!("{namespace}/{name}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            let current: Option<Pod> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            existed = current.is_some();

            match current {
                None => {}
                Some(_) if grace_period_seconds == 0 => {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                Some(pod) if pod.is_deleting() => {}
                Some(mut pod) => {
                    pod.metadata.deletion_timestamp = Some(epoch_secs());
                    pod.metadata.deletion_grace_period_seconds = Some(grace_period_seconds);
                    let value = serde_json::to_vec(&pod).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, grace_period_seconds, "pod delete requested");
        Ok(existed)
    }

    /// Record a pod's phase, as a node agent would.
    pub fn set_pod_phase(&self, key: &ObjectKey, phase: PodPhase) -> StateResult<()> {
        let key_str = key.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            let mut pod: Pod = match table.get(key_str.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key_str)),
            };
            pod.status.phase = phase;
            let value = serde_json::to_vec(&pod).map_err(map_err!(Serialize))?;
            table
                .insert(key_str.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Remove pods whose deletion grace period has ended by `now` (unix
    /// seconds). Returns the removed pods.
    pub fn purge_expired_pods(&self, now: u64) -> StateResult<Vec<Pod>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut expired = Vec::new();
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let pod: Pod =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if let Some(marked_at) = pod.metadata.deletion_timestamp {
                    let grace = pod.metadata.deletion_grace_period_seconds.unwrap_or(0);
                    if marked_at.saturating_add(grace) <= now {
                        expired.push(pod);
                    }
                }
            }
            for pod in &expired {
                table
                    .remove(pod.metadata.table_key().as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired pods purged");
        }
        Ok(expired)
    }
}

/// Both halves of the `{namespace}/{name}` key must be non-empty, bounded
/// and free of `/`, or prefix listing by namespace would leak across
/// namespaces.
fn validate_meta(meta: &ObjectMeta) -> StateResult<()> {
    validate_segment("namespace", &meta.namespace)?;
    validate_segment("name", &meta.name)
}

fn validate_segment(field: &str, value: &str) -> StateResult<()> {
    if value.is_empty() {
        return Err(StateError::Invalid(format!("{field} must not be empty")));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(StateError::Invalid(format!(
            "{field} longer than {MAX_NAME_LENGTH} bytes: {value}"
        )));
    }
    if value.contains('/') {
        return Err(StateError::Invalid(format!("{field} must not contain '/': {value}")));
    }
    Ok(())
}

fn new_uid() -> Uid {
    uuid::Uuid::new_v4().to_string()
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
