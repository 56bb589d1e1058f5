//! Reconciliation engine — turns desired vs. observed replica counts into a
//! list of pod creates or deletes.
//!
//! # Algorithm
//!
//! ```text
//! total = len(running) + len(pending)
//! delta = desired - total
//!
//! delta > 0   create `delta` pods with fresh names, owned by the AppService
//! delta < 0   victims = running ++ pending; delete the last |delta| of them
//! delta == 0  nothing to do
//! ```
//!
//! Appending `pending` after `running` makes the tail prefer pending pods;
//! running pods are only chosen once every pending pod is already a victim.
//! Which running pod goes first follows the store's listing order.
//!
//! Planning is pure. Applying the plan is the reconciler's job.

use std::collections::BTreeMap;
use std::fmt;

use appgrid_core::PodTemplateConfig;
use appgrid_state::{
    AppService, Container, LabelSelector, ObjectKey, ObjectMeta, Pod, PodSpec, PodStatus,
};
use serde::Serialize;

use crate::classify::Classified;
use crate::naming::generate_name;

/// How created pods look and how they are deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTemplate {
    pub label_key: String,
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub deletion_grace_period_seconds: u64,
}

impl Default for PodTemplate {
    fn default() -> Self {
        Self::from(&PodTemplateConfig::default())
    }
}

impl From<&PodTemplateConfig> for PodTemplate {
    fn from(cfg: &PodTemplateConfig) -> Self {
        Self {
            label_key: cfg.label_key.clone(),
            container_name: cfg.container_name.clone(),
            image: cfg.image.clone(),
            command: cfg.command.clone(),
            deletion_grace_period_seconds: cfg.deletion_grace_period_seconds,
        }
    }
}

impl PodTemplate {
    /// Selector that discovers the pods of `app`.
    pub fn selector_for(&self, app: &AppService) -> LabelSelector {
        LabelSelector::single(&self.label_key, &app.metadata.name)
    }

    /// A new pod for `app` named `name`, labelled for discovery and owned by
    /// `app`.
    pub fn new_pod(&self, app: &AppService, name: String) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert(self.label_key.clone(), app.metadata.name.clone());
        Pod {
            metadata: ObjectMeta {
                name,
                namespace: app.metadata.namespace.clone(),
                labels,
                owner_references: vec![app.owner_reference()],
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: self.container_name.clone(),
                    image: self.image.clone(),
                    command: self.command.clone(),
                }],
            },
            status: PodStatus::default(),
        }
    }
}

/// Transient per-pass state, recomputed from scratch every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalePhase {
    Converged,
    ScalingOut,
    ScalingIn,
}

impl fmt::Display for ScalePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalePhase::Converged => "converged",
            ScalePhase::ScalingOut => "scaling_out",
            ScalePhase::ScalingIn => "scaling_in",
        };
        f.write_str(s)
    }
}

/// A single store mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create(Pod),
    Delete {
        key: ObjectKey,
        grace_period_seconds: u64,
    },
}

/// Actions for one pass, in the order they must be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub phase: ScalePhase,
    pub desired: i32,
    pub current: usize,
    pub delta: i64,
    pub actions: Vec<Action>,
}

/// Decide what to create or delete for `app`.
pub fn plan(app: &AppService, classified: &Classified, template: &PodTemplate) -> Plan {
    let current = classified.total();
    let desired = app.spec.replicas;
    let delta = i64::from(desired) - current as i64;

    let (phase, actions) = if delta > 0 {
        let actions = (0..delta)
            .map(|_| Action::Create(template.new_pod(app, generate_name(&app.metadata.name))))
            .collect();
        (ScalePhase::ScalingOut, actions)
    } else if delta < 0 {
        let excess = delta.unsigned_abs() as usize;
        let actions = classified
            .running
            .iter()
            .chain(classified.pending.iter())
            .skip(current.saturating_sub(excess))
            .map(|pod| Action::Delete {
                key: pod.key(),
                grace_period_seconds: template.deletion_grace_period_seconds,
            })
            .collect();
        (ScalePhase::ScalingIn, actions)
    } else {
        (ScalePhase::Converged, Vec::new())
    };

    Plan {
        phase,
        desired,
        current,
        delta,
        actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgrid_state::{OwnerReference, PodPhase};

    fn app(replicas: i32) -> AppService {
        let mut app = AppService::new("default", "web", replicas);
        app.metadata.uid = "uid-web".to_string();
        app
    }

    fn owned(name: &str, phase: PodPhase) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                owner_references: vec![OwnerReference {
                    kind: "AppService".to_string(),
                    name: "web".to_string(),
                    uid: "uid-web".to_string(),
                    controller: true,
                }],
                ..ObjectMeta::default()
            },
            spec: PodSpec::default(),
            status: PodStatus { phase },
        }
    }

    fn classified(running: &[&str], pending: &[&str]) -> Classified {
        Classified {
            running: running.iter().map(|n| owned(n, PodPhase::Running)).collect(),
            pending: pending.iter().map(|n| owned(n, PodPhase::Pending)).collect(),
            other: 0,
        }
    }

    fn deleted_names(plan: &Plan) -> Vec<String> {
        plan.actions
            .iter()
            .filter_map(|a| match a {
                Action::Delete { key, .. } => Some(key.name.clone()),
                Action::Create(_) => None,
            })
            .collect()
    }

    #[test]
    fn scale_out_from_empty() {
        let plan = plan(&app(3), &Classified::default(), &PodTemplate::default());

        assert_eq!(plan.phase, ScalePhase::ScalingOut);
        assert_eq!(plan.delta, 3);
        assert_eq!(plan.actions.len(), 3);

        for action in &plan.actions {
            let Action::Create(pod) = action else {
                panic!("expected create, got {action:?}");
            };
            assert!(pod.metadata.name.starts_with("web-"));
            assert_eq!(pod.metadata.namespace, "default");
            assert_eq!(pod.metadata.labels.get("app").map(String::as_str), Some("web"));
            assert_eq!(pod.owner_uid(), Some("uid-web"));
            assert_eq!(pod.spec.containers[0].image, "busybox");
            assert_eq!(pod.spec.containers[0].command, vec!["sleep", "3600"]);
        }
    }

    #[test]
    fn scale_out_names_are_distinct() {
        let plan = plan(&app(50), &Classified::default(), &PodTemplate::default());
        let mut names: Vec<_> = plan
            .actions
            .iter()
            .map(|a| match a {
                Action::Create(p) => p.metadata.name.clone(),
                Action::Delete { .. } => unreachable!(),
            })
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 50);
    }

    #[test]
    fn scale_out_only_fills_the_deficit() {
        let plan = plan(&app(4), &classified(&["a"], &["b"]), &PodTemplate::default());
        assert_eq!(plan.delta, 2);
        assert_eq!(plan.actions.len(), 2);
    }

    #[test]
    fn scale_in_prefers_pending_then_latest_running() {
        // desired=2, running=[A,B,C], pending=[D] → delete C and D.
        let plan = plan(&app(2), &classified(&["A", "B", "C"], &["D"]), &PodTemplate::default());

        assert_eq!(plan.phase, ScalePhase::ScalingIn);
        assert_eq!(plan.delta, -2);
        assert_eq!(deleted_names(&plan), vec!["C", "D"]);
    }

    #[test]
    fn scale_in_takes_only_pending_when_enough() {
        let plan = plan(
            &app(2),
            &classified(&["A", "B"], &["P1", "P2"]),
            &PodTemplate::default(),
        );
        assert_eq!(deleted_names(&plan), vec!["P1", "P2"]);
    }

    #[test]
    fn scale_in_uses_configured_grace_period() {
        let template = PodTemplate {
            deletion_grace_period_seconds: 30,
            ..PodTemplate::default()
        };
        let plan = plan(&app(1), &classified(&["A", "B"], &[]), &template);
        assert_eq!(
            plan.actions,
            vec![Action::Delete {
                key: ObjectKey::new("default", "B"),
                grace_period_seconds: 30,
            }]
        );
    }

    #[test]
    fn negative_size_deletes_every_replica_without_panicking() {
        let plan = plan(&app(-1), &classified(&["A"], &["B"]), &PodTemplate::default());
        assert_eq!(plan.phase, ScalePhase::ScalingIn);
        assert_eq!(plan.delta, -3);
        assert_eq!(deleted_names(&plan), vec!["A", "B"]);
    }

    #[test]
    fn converged_plan_is_empty() {
        let plan = plan(&app(2), &classified(&["A"], &["B"]), &PodTemplate::default());
        assert_eq!(plan.phase, ScalePhase::Converged);
        assert_eq!(plan.delta, 0);
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn long_names_are_bounded() {
        let mut long = AppService::new("default", &"x".repeat(60), 1);
        long.metadata.uid = "u".to_string();
        let plan = plan(&long, &Classified::default(), &PodTemplate::default());
        let Action::Create(pod) = &plan.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(pod.metadata.name.len(), crate::naming::MAX_NAME_LENGTH);
        // The label carries the full resource name, not the truncated one.
        assert_eq!(pod.metadata.labels["app"], "x".repeat(60));
    }

    #[test]
    fn template_from_config() {
        let cfg = PodTemplateConfig {
            label_key: "service".to_string(),
            image: "nginx".to_string(),
            ..PodTemplateConfig::default()
        };
        let template = PodTemplate::from(&cfg);
        let sel = template.selector_for(&app(1));
        assert_eq!(sel.to_string(), "service=web");
        assert_eq!(template.image, "nginx");
    }
}
