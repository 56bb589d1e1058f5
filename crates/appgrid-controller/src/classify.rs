//! Instance classification — which listed pods belong to an AppService and
//! in which lifecycle bucket.

use appgrid_state::{Pod, PodPhase};

/// Owned, live pods split by phase. Both lists keep input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub running: Vec<Pod>,
    pub pending: Vec<Pod>,
    /// Owned, live pods in any other phase. Never counted and never
    /// deleted by the controller.
    pub other: usize,
}

impl Classified {
    /// Pods that count as replicas.
    pub fn total(&self) -> usize {
        self.running.len() + self.pending.len()
    }
}

/// True if `pod` is not being deleted and its first owner reference names
/// `owner_uid`. An empty `owner_uid` owns nothing.
pub fn is_owned_live(pod: &Pod, owner_uid: &str) -> bool {
    !owner_uid.is_empty() && !pod.is_deleting() && pod.owner_uid() == Some(owner_uid)
}

/// True if `pod` counts toward the replica total of `owner_uid`.
pub fn counts_as_replica(pod: &Pod, owner_uid: &str) -> bool {
    is_owned_live(pod, owner_uid)
        && matches!(pod.status.phase, PodPhase::Running | PodPhase::Pending)
}

/// Filter `candidates` to pods owned by `owner_uid` and bucket them.
///
/// Label matching is assumed to have happened already; this is the
/// ownership check on top of it.
pub fn classify(candidates: Vec<Pod>, owner_uid: &str) -> Classified {
    let mut out = Classified::default();
    for pod in candidates {
        if !is_owned_live(&pod, owner_uid) {
            continue;
        }
        match pod.status.phase {
            PodPhase::Running => out.running.push(pod),
            PodPhase::Pending => out.pending.push(pod),
            PodPhase::Succeeded | PodPhase::Failed | PodPhase::Unknown => out.other += 1,
        }
    }
    out
}
