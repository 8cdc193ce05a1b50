//! Keyed work queue.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already waiting is a no-op; adding a key that a worker is processing marks
//! it so it is queued again when that worker calls [`WorkQueue::done`]. Two
//! passes for the same record therefore never overlap, and a change that
//! lands mid-pass is never lost.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::resource::ResourceKey;

/// Per-key exponential backoff: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
}

impl Backoff {
    /// Delay before retry number `failures` (1-based).
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1_u32 << exponent).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(500), max: Duration::from_secs(300) }
    }
}

#[derive(Default)]
struct QueueState {
    /// Keys ready to hand out, in arrival order.
    ready: VecDeque<ResourceKey>,
    /// Keys that need a pass: everything in `ready` plus re-adds of keys in flight.
    dirty: HashSet<ResourceKey>,
    /// Keys a worker currently holds.
    processing: HashSet<ResourceKey>,
    failures: HashMap<ResourceKey, u32>,
    shutting_down: bool,
}

/// Deduplicating queue of record keys shared by the workers.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: Backoff,
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(backoff: Backoff) -> Self {
        Self { state: Mutex::new(QueueState::default()), notify: Notify::new(), backoff }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules `key` for a pass.
    pub fn add(&self, key: ResourceKey) {
        let mut s = self.state();
        if s.shutting_down || s.dirty.contains(&key) {
            return;
        }
        s.dirty.insert(key.clone());
        if s.processing.contains(&key) {
            return;
        }
        s.ready.push_back(key);
        drop(s);
        self.notify.notify_one();
    }

    /// Schedules `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ResourceKey, delay: Duration) {
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

    /// Records a failure for `key` and schedules a retry after its backoff.
    /// Returns the delay chosen.
    pub fn add_rate_limited(self: &Arc<Self>, key: ResourceKey) -> Duration {
        let failures = {
            let mut s = self.state();
            let failures = s.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.backoff.delay(failures);
        self.add_after(key, delay);
        delay
    }

    /// Clears the failure history of `key`.
    pub fn forget(&self, key: &ResourceKey) {
        self.state().failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut s = self.state();
                if s.shutting_down {
                    return None;
                }
                if let Some(key) = s.ready.pop_front() {
                    s.dirty.remove(&key);
                    s.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Releases `key` after a pass, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &ResourceKey) {
        let mut s = self.state();
        s.processing.remove(key);
        if s.dirty.contains(key) && !s.shutting_down {
            s.ready.push_back(key.clone());
            drop(s);
            self.notify.notify_one();
        }
    }

    /// Stops handing out keys. Waiting and future [`WorkQueue::get`] calls return `None`.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().ready.len()
    }

    /// Returns `true` if no key is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
