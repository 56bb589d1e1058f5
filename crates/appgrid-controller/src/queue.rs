//! Work queue between change detection and the reconciler.
//!
//! Semantics follow the Kubernetes client workqueue:
//!
//! - A key that is already queued is not queued twice (coalescing).
//! - A key handed out by [`WorkQueue::get`] is *processing* until
//!   [`WorkQueue::done`]. Adding it meanwhile marks it dirty; it is queued
//!   again on `done`, so two passes for one key never overlap.
//! - [`WorkQueue::add_rate_limited`] re-adds a key after a per-key
//!   exponential backoff; [`WorkQueue::forget`] resets it.
//! - After [`WorkQueue::shut_down`], `get` returns `None` and adds are
//!   ignored. Keys still queued are dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use appgrid_state::ObjectKey;
use tokio::sync::Notify;
use tracing::trace;

/// Exponential per-key retry delay: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `failures` earlier failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<ObjectKey>,
    /// Keys that need a pass: everything in `queue` plus processing keys
    /// that were added again.
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// Coalescing, per-key serialized queue of AppService keys.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    policy: RetryPolicy,
}

impl WorkQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` for a pass.
    pub fn add(&self, key: ObjectKey) {
        let mut inner = self.lock();
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            trace!(%key, "key busy, will requeue when done");
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Queue `key` after `delay`. Needs a tokio runtime for non-zero delays.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queue `key` after its backoff delay and count the failure.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let delay = {
            let mut inner = self.lock();
            let failures = inner.failures.entry(key.clone()).or_insert(0);
            let delay = self.policy.backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    /// How many times `key` has been re-added with backoff since the last
    /// `forget`.
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            {
                let mut inner = self.lock();
                if inner.shutting_down {
                    drop(inner);
                    // Pass the wake-up on to the next waiter.
                    self.notify.notify_one();
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a key returned by `get` as finished.
    pub fn done(&self, key: &ObjectKey) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiter.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(5));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(10), Duration::from_secs(1));
        assert_eq!(policy.backoff(64), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn duplicate_adds_coalesce() {
        let q = WorkQueue::default();
        q.add(key("a"));
        q.add(key("a"));
        q.add(key("b"));
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await, Some(key("a")));
        assert_eq!(q.get().await, Some(key("b")));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn busy_key_is_requeued_on_done() {
        let q = WorkQueue::default();
        q.add(key("a"));
        let k = q.get().await.unwrap();

        // Added while processing: not handed out yet.
        q.add(key("a"));
        q.add(key("a"));
        assert!(q.is_empty());

        q.done(&k);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key("a")));
        q.done(&key("a"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let q = Arc::new(WorkQueue::default());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.add(key("late"));

        let got = timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(got, Some(key("late")));
    }

    #[tokio::test]
    async fn shutdown_releases_all_waiters() {
        let q = Arc::new(WorkQueue::default());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&q);
                tokio::spawn(async move { q.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        q.shut_down();
        for w in waiters {
            let got = timeout(Duration::from_secs(5), w).await.unwrap().unwrap();
            assert_eq!(got, None);
        }

        q.add(key("ignored"));
        assert!(q.is_empty());
        assert!(q.is_shutting_down());
    }

    #[tokio::test]
    async fn rate_limited_add_arrives_after_backoff() {
        let q = Arc::new(WorkQueue::new(RetryPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(50),
        }));

        assert_eq!(q.add_rate_limited(key("a")), Duration::from_millis(1));
        assert_eq!(q.add_rate_limited(key("a")), Duration::from_millis(2));
        assert_eq!(q.num_requeues(&key("a")), 2);

        let got = timeout(Duration::from_secs(5), q.get()).await.unwrap();
        assert_eq!(got, Some(key("a")));

        q.forget(&key("a"));
        assert_eq!(q.num_requeues(&key("a")), 0);
    }
}
