//! One reconciliation pass for one record.
//!
//! The pass is stateless: everything it needs is re-read from the store and
//! the tracker, so running it again after a crash, a conflict, or a failed
//! tracker call re-derives the right action.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::finalizer::{FinalizerEvent, FinalizerState};
use crate::error::{Error, Result};
use crate::ports::issues::{Issue, IssueClient, IssueClientFactory, NewIssue};
use crate::ports::store::ResourceStore;
use crate::resource::{IssueResource, IssueStatus, RepoRef, ResourceKey, FINALIZER};

/// What the converge step did to the issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// No issue had the title; one was created.
    Created,
    /// The body drifted; it was rewritten.
    Edited,
    /// The issue already matched.
    Unchanged,
    /// The issue is closed and is left alone.
    LeftClosed,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Edited => "edited",
            Self::Unchanged => "unchanged",
            Self::LeftClosed => "left-closed",
        })
    }
}

/// Result of a pass that needs no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record no longer exists.
    Absent,
    /// Deletion finished: the issue is closed or was never there, and the
    /// finalizer is gone.
    Released,
    /// The record is malformed; nothing happens until it is fixed.
    Invalid,
    /// The issue matches the record and the status reflects the issue.
    Synced {
        /// What converge did.
        action: SyncAction,
        /// The issue the record is bound to.
        number: u64,
    },
}

/// Outcome of the title lookup. A failed lookup is not "absent".
enum Lookup {
    Found(Issue),
    Absent,
    Unknown(Error),
}

/// Runs reconciliation passes against a store and a tracker.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    issues: Arc<dyn IssueClientFactory>,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(store: Arc<dyn ResourceStore>, issues: Arc<dyn IssueClientFactory>) -> Self {
        Self { store, issues }
    }

    /// Drives the issue for `key` toward its record, once.
    ///
    /// Steps, in order: read the record, look up the issue by title, run the
    /// deletion branch if deletion was requested, register the finalizer,
    /// create or edit the issue, and write the observed status back.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the pass. Every returned error leaves
    /// the record safe to reconcile again: a conflict means the record moved
    /// on and the pass should be rerun from the start, and a transport error
    /// means a tracker call failed before the finalizer or status advanced.
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let Some(record) = self.store.get(key)? else {
            debug!(%key, "record gone; nothing to do");
            return Ok(ReconcileOutcome::Absent);
        };

        let repo = match record.repo_ref() {
            Ok(repo) => repo,
            Err(e) => {
                warn!(%key, error = %e, "record is invalid; skipping until it is fixed");
                return Ok(ReconcileOutcome::Invalid);
            }
        };

        let state = FinalizerState::of(&record);
        if state == FinalizerState::Released {
            debug!(%key, "deletion requested without our finalizer; nothing to clean up");
            return Ok(ReconcileOutcome::Released);
        }

        let client = self.issues.client_for(&repo)?;
        let lookup = match client.find_issue(&record.spec.title).await {
            Ok(Some(issue)) => Lookup::Found(issue),
            Ok(None) => Lookup::Absent,
            Err(e) => {
                warn!(%key, %repo, error = %e, "issue lookup failed");
                Lookup::Unknown(e)
            }
        };

        if state == FinalizerState::Closing {
            return self.release(record, &repo, client.as_ref(), lookup).await;
        }

        let record = if state == FinalizerState::NoFinalizer {
            self.register(record)?
        } else {
            record
        };

        let (issue, action) = match lookup {
            Lookup::Unknown(e) => return Err(e),
            Lookup::Absent => {
                (Self::create(&record, &repo, client.as_ref()).await?, SyncAction::Created)
            }
            Lookup::Found(issue) if issue.is_closed() => {
                debug!(%key, number = issue.number, "issue is closed; not editing");
                (issue, SyncAction::LeftClosed)
            }
            Lookup::Found(issue) if issue.body != record.spec.description => {
                (Self::edit(&record, &repo, client.as_ref(), &issue).await?, SyncAction::Edited)
            }
            Lookup::Found(issue) => (issue, SyncAction::Unchanged),
        };

        self.write_status(&record, &issue)?;
        Ok(ReconcileOutcome::Synced { action, number: issue.number })
    }

    /// Adds and persists the finalizer; must happen before any issue is created.
    fn register(&self, mut record: IssueResource) -> Result<IssueResource> {
        let key = record.key();
        record.add_finalizer(FINALIZER);
        let stored =
            self.store.update(&record)?.ok_or_else(|| Error::record_not_found(key.as_str()))?;
        let state = FinalizerState::NoFinalizer.transition(FinalizerEvent::Register);
        info!(%key, ?state, "finalizer registered");
        Ok(stored)
    }

    async fn create(
        record: &IssueResource,
        repo: &RepoRef,
        client: &dyn IssueClient,
    ) -> Result<Issue> {
        let key = record.key();
        let new =
            NewIssue { title: record.spec.title.clone(), body: record.spec.description.clone() };
        match client.create_issue(&new).await {
            Ok(issue) => {
                info!(%key, %repo, number = issue.number, "issue created");
                Ok(issue)
            }
            Err(e) => {
                warn!(%key, %repo, error = %e, "issue creation failed");
                Err(e)
            }
        }
    }

    async fn edit(
        record: &IssueResource,
        repo: &RepoRef,
        client: &dyn IssueClient,
        issue: &Issue,
    ) -> Result<Issue> {
        let key = record.key();
        match client.edit_issue(issue.number, &record.spec.description).await {
            Ok(edited) => {
                info!(%key, %repo, number = issue.number, "issue body realigned");
                Ok(edited)
            }
            Err(e) => {
                warn!(%key, %repo, number = issue.number, error = %e, "issue edit failed");
                Err(e)
            }
        }
    }

    /// Deletion branch: close the issue, then drop the finalizer.
    async fn release(
        &self,
        mut record: IssueResource,
        repo: &RepoRef,
        client: &dyn IssueClient,
        lookup: Lookup,
    ) -> Result<ReconcileOutcome> {
        let key = record.key();
        match lookup {
            Lookup::Unknown(e) => {
                let state = FinalizerState::Closing.transition(FinalizerEvent::Fail);
                warn!(%key, ?state, "cannot confirm the issue is closed; keeping finalizer");
                return Err(e);
            }
            Lookup::Found(issue) if !issue.is_closed() => {
                if let Err(e) = client.close_issue(issue.number).await {
                    warn!(
                        %key, %repo, number = issue.number, error = %e,
                        "issue close failed; keeping finalizer"
                    );
                    return Err(e);
                }
                info!(%key, %repo, number = issue.number, "issue closed");
            }
            Lookup::Found(issue) => {
                debug!(%key, number = issue.number, "issue already closed");
            }
            Lookup::Absent => {
                debug!(%key, %repo, "no issue to close");
            }
        }

        record.remove_finalizer(FINALIZER);
        let erased = self.store.update(&record)?.is_none();
        let state = FinalizerState::Closing.transition(FinalizerEvent::Release);
        info!(%key, ?state, erased, "finalizer released");
        Ok(ReconcileOutcome::Released)
    }

    /// Mirrors the issue into the record's status, conditional on the revision
    /// this pass holds. Skipped when nothing changed.
    fn write_status(&self, record: &IssueResource, issue: &Issue) -> Result<()> {
        let observed = IssueStatus {
            state: issue.state.as_str().to_string(),
            last_update_timestamp: issue.updated_at.clone(),
        };
        if record.status == observed {
            return Ok(());
        }
        let key = record.key();
        self.store.patch_status(&key, &record.metadata.resource_version, &observed)?;
        debug!(%key, state = %observed.state, "status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::{FakeTracker, Operation};
    use crate::adapters::live::clock::LiveClock;
    use crate::ports::issues::IssueState;
    use crate::resource::IssueSpec;
    use crate::store::MemoryStore;

    const REPO: &str = "octo/widgets";

    struct Harness {
        store: Arc<MemoryStore>,
        tracker: FakeTracker,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new(Arc::new(LiveClock)));
        let tracker = FakeTracker::new();
        let reconciler = Reconciler::new(store.clone(), Arc::new(tracker.factory()));
        Harness { store, tracker, reconciler }
    }

    fn declare(h: &Harness, name: &str, title: &str, description: &str) -> ResourceKey {
        let spec =
            IssueSpec { repo: REPO.into(), title: title.into(), description: description.into() };
        h.store.create(IssueResource::new(name, spec)).unwrap().key()
    }

    fn stored(h: &Harness, key: &ResourceKey) -> IssueResource {
        h.store.get(key).unwrap().unwrap()
    }

    #[tokio::test]
    async fn missing_record_is_a_no_op() {
        let h = harness();
        let outcome = h.reconciler.reconcile(&ResourceKey::new("ghost")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Absent);
        assert!(h.tracker.calls().is_empty());
    }

    #[tokio::test]
    async fn find_failure_registers_finalizer_but_creates_nothing() {
        let h = harness();
        let key = declare(&h, "a", "t1", "d1");
        h.tracker.fail_next(Operation::Find, 1);

        let err = h.reconciler.reconcile(&key).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(h.tracker.count(Operation::Create), 0);
        let record = stored(&h, &key);
        assert!(record.has_finalizer(FINALIZER));
        assert_eq!(record.status, IssueStatus::default());
    }

    #[tokio::test]
    async fn edit_failure_leaves_status_as_observed() {
        let h = harness();
        h.tracker.seed(REPO, "t1", "old", IssueState::Open);
        let key = declare(&h, "a", "t1", "new");
        h.tracker.fail_next(Operation::Edit, 1);

        assert!(h.reconciler.reconcile(&key).await.is_err());
        assert_eq!(stored(&h, &key).status, IssueStatus::default());

        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Synced { action: SyncAction::Edited, .. }));
    }

    #[tokio::test]
    async fn status_tracks_external_close() {
        let h = harness();
        let key = declare(&h, "a", "t1", "d1");
        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        let ReconcileOutcome::Synced { number, .. } = outcome else {
            panic!("expected synced");
        };
        h.tracker.set_state(REPO, number, IssueState::Closed);

        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Synced { action: SyncAction::LeftClosed, number });
        assert_eq!(stored(&h, &key).status.state, "closed");
    }

    #[tokio::test]
    async fn idle_pass_writes_nothing() {
        let h = harness();
        let key = declare(&h, "a", "t1", "d1");
        h.reconciler.reconcile(&key).await.unwrap();
        let revision = stored(&h, &key).metadata.resource_version;

        let outcome = h.reconciler.reconcile(&key).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Synced { action: SyncAction::Unchanged, .. }));
        assert_eq!(stored(&h, &key).metadata.resource_version, revision);
    }

    #[tokio::test]
    async fn deletion_of_absent_issue_releases() {
        let h = harness();
        let key = declare(&h, "a", "t1", "d1");
        let mut record = stored(&h, &key);
        record.add_finalizer(FINALIZER);
        h.store.update(&record).unwrap();
        h.store.request_deletion(&key).unwrap();

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), ReconcileOutcome::Released);
        assert_eq!(h.tracker.count(Operation::Close), 0);
        assert!(h.store.get(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn deletion_with_foreign_finalizer_keeps_record() {
        let h = harness();
        let key = declare(&h, "a", "t1", "d1");
        h.reconciler.reconcile(&key).await.unwrap();
        let mut record = stored(&h, &key);
        record.add_finalizer("someone.else/finalizer");
        h.store.update(&record).unwrap();
        h.store.request_deletion(&key).unwrap();

        assert_eq!(h.reconciler.reconcile(&key).await.unwrap(), ReconcileOutcome::Released);
        let record = stored(&h, &key);
        assert!(!record.has_finalizer(FINALIZER));
        assert!(record.deletion_requested());
        assert_eq!(h.tracker.count(Operation::Close), 1);
    }

    #[tokio::test]
    async fn stale_revision_surfaces_as_conflict() {
        let h = harness();
        let key = declare(&h, "a", "t1", "d1");
        let mut record = stored(&h, &key);
        record.metadata.resource_version = "0".into();
        let err = h.reconciler.register(record).unwrap_err();
        assert!(err.is_conflict());
    }
}
