//! Object types for the appgrid state store.
//!
//! `AppService` is the desired-state resource (replica count plus an opaque
//! configuration map). `Pod` is a single worker instance. Both carry an
//! `ObjectMeta` with identity, labels and owner references, and serialize
//! with Kubernetes-style camelCase field names.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::value::Value;

/// Unique identifier assigned by the store on creation.
pub type Uid = String;

/// Kind string written into owner references that point at an `AppService`.
pub const APP_SERVICE_KIND: &str = "AppService";

// ── Keys ──────────────────────────────────────────────────────────

/// `{namespace}/{name}` address of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(StateError::Invalid(format!(
                "object key must be namespace/name: {s}"
            ))),
        }
    }
}

// ── Metadata ──────────────────────────────────────────────────────

/// Weak back-reference from an object to the resource that created it.
///
/// Only `uid` is used for ownership decisions; `kind` and `name` are
/// informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uid,
    #[serde(default)]
    pub controller: bool,
}

/// Identity and bookkeeping shared by all stored objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Assigned by the store; empty until the object is first persisted.
    #[serde(default)]
    pub uid: Uid,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Unix timestamp (seconds) of first persistence.
    #[serde(default)]
    pub created_at: u64,
    /// Set when a graceful delete has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_grace_period_seconds: Option<u64>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Composite key for the redb tables.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ── AppService ────────────────────────────────────────────────────

/// Desired state for a set of identical pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppService {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AppServiceSpec,
    #[serde(default)]
    pub status: AppServiceStatus,
}

/// User-declared target for an `AppService`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppServiceSpec {
    /// Target replica count. Valid range is 1–100; the bound is checked by
    /// [`AppServiceSpec::validate`] at admission, not by the controller.
    #[serde(rename = "size", default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub values: Values,
}

/// Inclusive replica bounds accepted at admission.
pub const MIN_REPLICAS: i32 = 1;
pub const MAX_REPLICAS: i32 = 100;

fn default_replicas() -> i32 {
    MIN_REPLICAS
}

impl Default for AppServiceSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            values: Values::default(),
        }
    }
}

impl AppServiceSpec {
    /// Check the replica bound.
    pub fn validate(&self) -> Result<(), StateError> {
        if !(MIN_REPLICAS..=MAX_REPLICAS).contains(&self.replicas) {
            return Err(StateError::Invalid(format!(
                "size must be between {MIN_REPLICAS} and {MAX_REPLICAS}, got {}",
                self.replicas
            )));
        }
        Ok(())
    }
}

/// Unstructured key/value configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Values {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub objects: BTreeMap<String, Value>,
}

/// Observed state written by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppServiceStatus {
    #[serde(default)]
    pub replicas: i32,
}

impl AppService {
    pub fn new(namespace: &str, name: &str, replicas: i32) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..ObjectMeta::default()
            },
            spec: AppServiceSpec {
                replicas,
                values: Values::default(),
            },
            status: AppServiceStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Owner reference to stamp on pods created for this resource.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: APP_SERVICE_KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }
}

// ── Pod ───────────────────────────────────────────────────────────

/// A single worker instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    pub phase: PodPhase,
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl Pod {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// True once a delete has been requested.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Uid of the first owner reference, which is the authoritative one.
    pub fn owner_uid(&self) -> Option<&str> {
        self.metadata
            .owner_references
            .first()
            .map(|r| r.uid.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_parse_and_display() {
        let key: ObjectKey = "prod/web".parse().unwrap();
        assert_eq!(key, ObjectKey::new("prod", "web"));
        assert_eq!(key.to_string(), "prod/web");

        assert!("web".parse::<ObjectKey>().is_err());
        assert!("/web".parse::<ObjectKey>().is_err());
        assert!("a/b/c".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn app_service_manifest_uses_size_field() {
        let json = r#"{
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"size": 3, "values": {"objects": {"m": {"debug": true}}}}
        }"#;
        let app: AppService = serde_json::from_str(json).unwrap();
        assert_eq!(app.spec.replicas, 3);
        assert_eq!(app.status.replicas, 0);
        assert!(app.metadata.uid.is_empty());
        assert_eq!(app.spec.values.objects["m"].type_name(), "mapping");
    }

    #[test]
    fn missing_size_defaults_to_one() {
        let json = r#"{"metadata": {"name": "web"}, "spec": {}}"#;
        let app: AppService = serde_json::from_str(json).unwrap();
        assert_eq!(app.spec.replicas, 1);
        assert_eq!(app.metadata.namespace, "default");
    }

    #[test]
    fn validate_enforces_bounds() {
        let mut spec = AppServiceSpec::default();
        assert!(spec.validate().is_ok());
        spec.replicas = 0;
        assert!(spec.validate().is_err());
        spec.replicas = 100;
        assert!(spec.validate().is_ok());
        spec.replicas = 101;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn owner_reference_points_back() {
        let mut app = AppService::new("default", "web", 2);
        app.metadata.uid = "uid-1".to_string();
        let owner = app.owner_reference();
        assert_eq!(owner.kind, APP_SERVICE_KIND);
        assert_eq!(owner.name, "web");
        assert_eq!(owner.uid, "uid-1");
        assert!(owner.controller);
    }

    #[test]
    fn pod_owner_uid_uses_first_reference() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: "web-abc".to_string(),
                namespace: "default".to_string(),
                owner_references: vec![
                    OwnerReference {
                        kind: APP_SERVICE_KIND.to_string(),
                        name: "web".to_string(),
                        uid: "first".to_string(),
                        controller: true,
                    },
                    OwnerReference {
                        kind: APP_SERVICE_KIND.to_string(),
                        name: "other".to_string(),
                        uid: "second".to_string(),
                        controller: false,
                    },
                ],
                ..ObjectMeta::default()
            },
            spec: PodSpec::default(),
            status: PodStatus::default(),
        };
        assert_eq!(pod.owner_uid(), Some("first"));
        assert!(!pod.is_deleting());
        assert_eq!(pod.status.phase, PodPhase::Pending);
    }
}
