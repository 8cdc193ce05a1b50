//! The control loop: store events and periodic resyncs feed a keyed work
//! queue, and a pool of workers runs one [`Reconciler`] pass per key.

pub mod finalizer;
pub mod queue;
pub mod reconciler;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ports::issues::IssueClientFactory;
use crate::ports::store::ResourceStore;
use crate::resource::ResourceKey;

pub use finalizer::{FinalizerEvent, FinalizerState};
pub use queue::{Backoff, WorkQueue};
pub use reconciler::{ReconcileOutcome, Reconciler, SyncAction};

/// Conflicts retried inline by [`Controller::run_once`] before giving up on a key.
const MAX_CONFLICT_RETRIES: usize = 5;

/// Tuning for [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent workers.
    pub workers: usize,
    /// Interval between full resyncs.
    pub resync_interval: Duration,
    /// Retry backoff for failed passes.
    pub backoff: Backoff,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { workers: 2, resync_interval: Duration::from_secs(300), backoff: Backoff::default() }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.workers,
            resync_interval: config.resync_interval,
            ..Self::default()
        }
    }
}

/// Tally of a [`Controller::run_once`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records whose issue now matches.
    pub synced: usize,
    /// Records whose deletion finished.
    pub released: usize,
    /// Malformed records skipped.
    pub invalid: usize,
    /// Records whose pass failed; they will be retried on the next sweep.
    pub failed: usize,
}

/// Runs reconciliation for every record in a store.
pub struct Controller {
    store: Arc<dyn ResourceStore>,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl Controller {
    /// Creates a controller over `store`, reaching the tracker through `issues`.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        issues: Arc<dyn IssueClientFactory>,
        config: ControllerConfig,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), issues));
        let queue = Arc::new(WorkQueue::new(config.backoff));
        Self { store, reconciler, queue, config }
    }

    /// The queue the workers drain.
    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Runs until `shutdown` turns `true`.
    ///
    /// On shutdown the queue stops handing out keys and every worker finishes
    /// its in-flight pass before this returns. Keys still waiting are dropped;
    /// the next start re-lists every record.
    ///
    /// # Errors
    ///
    /// Returns a store error if the initial listing fails.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut events = self.store.subscribe();
        self.enqueue_all()?;

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            workers.spawn(work(id, Arc::clone(&self.reconciler), Arc::clone(&self.queue)));
        }
        info!(
            workers = self.config.workers,
            resync_secs = self.config.resync_interval.as_secs(),
            "controller started"
        );

        let mut resync =
            interval_at(Instant::now() + self.config.resync_interval, self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        debug!(key = %event.key, kind = ?event.kind, "store event");
                        self.queue.add(event.key);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "store events dropped; resyncing");
                        self.resync();
                    }
                    Err(RecvError::Closed) => {
                        warn!("store event stream closed");
                        break;
                    }
                },
                _ = resync.tick() => self.resync(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("controller stopping; waiting for in-flight passes");
        self.queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker panicked");
            }
        }
        info!("controller stopped");
        Ok(())
    }

    /// Reconciles every record once, in key order, and returns the tally.
    ///
    /// Conflicts are retried immediately; other failures are logged and
    /// counted, leaving the record for the next sweep.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be listed.
    pub async fn run_once(&self) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        for key in self.store.list()? {
            match self.reconcile_with_retries(&key).await {
                Ok(ReconcileOutcome::Synced { .. }) => summary.synced += 1,
                Ok(ReconcileOutcome::Released) => summary.released += 1,
                Ok(ReconcileOutcome::Invalid) => summary.invalid += 1,
                Ok(ReconcileOutcome::Absent) => {}
                Err(e) => {
                    error!(%key, error = %e, "reconciliation failed");
                    summary.failed += 1;
                }
            }
        }
        info!(
            synced = summary.synced,
            released = summary.released,
            invalid = summary.invalid,
            failed = summary.failed,
            "sweep complete"
        );
        Ok(summary)
    }

    async fn reconcile_with_retries(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let mut attempt = 0;
        loop {
            match self.reconciler.reconcile(key).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(%key, attempt, "conflict; rereading record");
                }
                other => return other,
            }
        }
    }

    fn enqueue_all(&self) -> Result<()> {
        let keys = self.store.list()?;
        debug!(count = keys.len(), "enqueueing every record");
        for key in keys {
            self.queue.add(key);
        }
        Ok(())
    }

    fn resync(&self) {
        if let Err(e) = self.enqueue_all() {
            warn!(error = %e, "resync listing failed");
        }
    }
}

/// Worker loop: one pass per key until the queue shuts down.
async fn work(id: usize, reconciler: Arc<Reconciler>, queue: Arc<WorkQueue>) {
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(outcome) => {
                debug!(worker = id, %key, ?outcome, "pass complete");
                queue.forget(&key);
            }
            Err(e) => requeue(&queue, &key, &e, id),
        }
        queue.done(&key);
    }
    debug!(worker = id, "worker exiting");
}

fn requeue(queue: &Arc<WorkQueue>, key: &ResourceKey, e: &Error, worker: usize) {
    if e.is_conflict() {
        debug!(worker, %key, "conflict; requeueing");
        queue.add(key.clone());
    } else if e.is_retryable() {
        let delay = queue.add_rate_limited(key.clone());
        warn!(worker, %key, error = %e, retry_in = ?delay, "pass failed; retrying");
    } else {
        error!(worker, %key, error = %e, "pass failed; not retrying");
        queue.forget(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::{FakeTracker, Operation};
    use crate::adapters::live::clock::LiveClock;
    use crate::adapters::live::filesystem::LiveFileSystem;
    use crate::resource::{IssueResource, IssueSpec};
    use crate::store::{FileStore, MemoryStore};

    fn controller(store: &Arc<MemoryStore>, tracker: &FakeTracker) -> Controller {
        Controller::new(store.clone(), Arc::new(tracker.factory()), ControllerConfig::default())
    }

    fn declare(store: &MemoryStore, name: &str, repo: &str) {
        let spec = IssueSpec { repo: repo.into(), title: name.into(), description: String::new() };
        store.create(IssueResource::new(name, spec)).unwrap();
    }

    #[tokio::test]
    async fn sweep_tallies_outcomes() {
        let store = Arc::new(MemoryStore::new(Arc::new(LiveClock)));
        let tracker = FakeTracker::new();
        declare(&store, "a", "octo/widgets");
        declare(&store, "b", "octo/gadgets");
        tracker.fail_next(Operation::Create, 1);

        let summary = controller(&store, &tracker).run_once().await.unwrap();
        assert_eq!(summary, SweepSummary { synced: 1, failed: 1, ..SweepSummary::default() });

        let summary = controller(&store, &tracker).run_once().await.unwrap();
        assert_eq!(summary, SweepSummary { synced: 2, ..SweepSummary::default() });
        assert_eq!(tracker.issues("octo/gadgets").len(), 1);
    }

    #[tokio::test]
    async fn transport_failures_back_off() {
        let queue = Arc::new(WorkQueue::new(Backoff::default()));
        let key = ResourceKey::new("a");
        requeue(&queue, &key, &Error::transport("find", "boom"), 0);
        assert_eq!(queue.failures(&key), 1);
    }

    #[tokio::test]
    async fn terminal_failures_are_forgotten() {
        let queue = Arc::new(WorkQueue::new(Backoff::default()));
        let key = ResourceKey::new("a");
        requeue(&queue, &key, &Error::transport("find", "boom"), 0);
        requeue(&queue, &key, &Error::config("no token"), 0);
        assert_eq!(queue.failures(&key), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn conflicts_requeue_immediately() {
        let queue = Arc::new(WorkQueue::new(Backoff::default()));
        let key = ResourceKey::new("a");
        requeue(&queue, &key, &Error::conflict("a", "1", "2"), 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.failures(&key), 0);
    }

    #[tokio::test]
    async fn invalid_records_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = IssueResource::new(
            "broken",
            IssueSpec { repo: "no-slash".into(), title: "t1".into(), description: String::new() },
        );
        broken.metadata.resource_version = "1".into();
        std::fs::create_dir_all(dir.path().join("records")).unwrap();
        std::fs::write(
            dir.path().join("records/broken.yaml"),
            serde_yaml::to_string(&broken).unwrap(),
        )
        .unwrap();
        let store: Arc<dyn ResourceStore> =
            Arc::new(FileStore::new(Arc::new(LiveFileSystem), dir.path(), Arc::new(LiveClock)));
        let tracker = FakeTracker::new();

        let summary = Controller::new(
            store.clone(),
            Arc::new(tracker.factory()),
            ControllerConfig::default(),
        )
        .run_once()
        .await
        .unwrap();
        assert_eq!(summary, SweepSummary { invalid: 1, ..SweepSummary::default() });

        let queue = Arc::new(WorkQueue::new(Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(1),
        }));
        let key = ResourceKey::new("broken");
        queue.add(key.clone());
        let reconciler = Arc::new(Reconciler::new(store, Arc::new(tracker.factory())));
        let worker = tokio::spawn(work(0, reconciler, Arc::clone(&queue)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shut_down();
        worker.await.unwrap();

        assert_eq!(queue.failures(&key), 0);
        assert!(queue.is_empty());
        assert!(tracker.calls().is_empty());
    }
}
