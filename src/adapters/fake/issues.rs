//! In-memory issue tracker.
//!
//! A [`FakeTracker`] holds issues for any number of repositories, keyed by
//! `owner/name`, in creation order. Clones share state, so a test keeps one
//! handle for inspection and gives [`FakeTracker::factory`] to the code under
//! test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};
use crate::ports::issues::{
    Issue, IssueClient, IssueClientFactory, IssueFuture, IssueState, NewIssue,
};
use crate::resource::RepoRef;

/// 2024-01-01T00:00:00Z; update times tick forward one second per change.
const FIRST_STAMP: i64 = 1_704_067_200;

/// A tracker operation, for counting calls and injecting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `find_issue`
    Find,
    /// `create_issue`
    Create,
    /// `edit_issue`
    Edit,
    /// `close_issue`
    Close,
}

impl Operation {
    const fn name(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Close => "close",
        }
    }
}

/// One recorded call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    /// A title lookup.
    Find {
        /// Repository slug.
        repo: String,
        /// Title searched for.
        title: String,
    },
    /// An issue creation.
    Create {
        /// Repository slug.
        repo: String,
        /// Title of the new issue.
        title: String,
    },
    /// A body edit.
    Edit {
        /// Repository slug.
        repo: String,
        /// Target issue.
        number: u64,
    },
    /// A close.
    Close {
        /// Repository slug.
        repo: String,
        /// Target issue.
        number: u64,
    },
}

impl TrackerCall {
    /// The operation this call performed.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Find { .. } => Operation::Find,
            Self::Create { .. } => Operation::Create,
            Self::Edit { .. } => Operation::Edit,
            Self::Close { .. } => Operation::Close,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Times(usize),
    Always,
}

#[derive(Default)]
struct TrackerState {
    repos: HashMap<String, Vec<Issue>>,
    next_number: u64,
    ticks: i64,
    calls: Vec<TrackerCall>,
    failures: HashMap<Operation, Failure>,
}

impl TrackerState {
    fn stamp(&mut self) -> String {
        self.ticks += 1;
        DateTime::<Utc>::from_timestamp(FIRST_STAMP + self.ticks, 0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn take_failure(&mut self, op: Operation) -> Option<Error> {
        let fail = match self.failures.get(&op).copied()? {
            Failure::Always => true,
            Failure::Times(0) => false,
            Failure::Times(n) => {
                self.failures.insert(op, Failure::Times(n - 1));
                true
            }
        };
        fail.then(|| Error::transport(op.name(), "injected failure"))
    }

    fn issue_mut(&mut self, repo: &str, number: u64) -> Option<&mut Issue> {
        self.repos.get_mut(repo)?.iter_mut().find(|i| i.number == number)
    }
}

/// Shared in-memory tracker.
#[derive(Clone, Default)]
pub struct FakeTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl FakeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a factory whose clients operate on this tracker.
    #[must_use]
    pub fn factory(&self) -> FakeClientFactory {
        FakeClientFactory { tracker: self.clone() }
    }

    /// Adds an issue directly, bypassing call recording. Returns its number.
    pub fn seed(&self, repo: &str, title: &str, body: &str, state: IssueState) -> u64 {
        let mut s = self.state();
        s.next_number += 1;
        let number = s.next_number;
        let updated_at = s.stamp();
        s.repos.entry(repo.to_string()).or_default().push(Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state,
            updated_at,
        });
        number
    }

    /// Changes an issue's state as a person using the tracker would.
    pub fn set_state(&self, repo: &str, number: u64, state: IssueState) {
        let mut s = self.state();
        let stamp = s.stamp();
        if let Some(issue) = s.issue_mut(repo, number) {
            issue.state = state;
            issue.updated_at = stamp;
        }
    }

    /// Snapshot of every issue in `repo`, in tracker order.
    #[must_use]
    pub fn issues(&self, repo: &str) -> Vec<Issue> {
        self.state().repos.get(repo).cloned().unwrap_or_default()
    }

    /// Snapshot of one issue.
    #[must_use]
    pub fn issue(&self, repo: &str, number: u64) -> Option<Issue> {
        self.issues(repo).into_iter().find(|i| i.number == number)
    }

    /// Every call made through any client, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TrackerCall> {
        self.state().calls.clone()
    }

    /// Number of calls made for `op`.
    #[must_use]
    pub fn count(&self, op: Operation) -> usize {
        self.state().calls.iter().filter(|c| c.operation() == op).count()
    }

    /// Number of create, edit, and close calls.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state().calls.iter().filter(|c| c.operation() != Operation::Find).count()
    }

    /// Makes the next `times` calls of `op` fail with a transport error.
    pub fn fail_next(&self, op: Operation, times: usize) {
        self.state().failures.insert(op, Failure::Times(times));
    }

    /// Makes every call of `op` fail until [`FakeTracker::heal`].
    pub fn fail_always(&self, op: Operation) {
        self.state().failures.insert(op, Failure::Always);
    }

    /// Clears injected failures for `op`.
    pub fn heal(&self, op: Operation) {
        self.state().failures.remove(&op);
    }

    fn find(&self, repo: &str, title: &str) -> Result<Option<Issue>> {
        let mut s = self.state();
        s.calls.push(TrackerCall::Find { repo: repo.to_string(), title: title.to_string() });
        if let Some(err) = s.take_failure(Operation::Find) {
            return Err(err);
        }
        Ok(s.repos.get(repo).and_then(|issues| issues.iter().find(|i| i.title == title)).cloned())
    }

    fn create(&self, repo: &str, new: &NewIssue) -> Result<Issue> {
        {
            let mut s = self.state();
            s.calls.push(TrackerCall::Create { repo: repo.to_string(), title: new.title.clone() });
            if let Some(err) = s.take_failure(Operation::Create) {
                return Err(err);
            }
        }
        let number = self.seed(repo, &new.title, &new.body, IssueState::Open);
        self.issue(repo, number)
            .ok_or_else(|| Error::transport("create", "created issue vanished"))
    }

    fn edit(&self, repo: &str, number: u64, body: &str) -> Result<Issue> {
        let mut s = self.state();
        s.calls.push(TrackerCall::Edit { repo: repo.to_string(), number });
        if let Some(err) = s.take_failure(Operation::Edit) {
            return Err(err);
        }
        let stamp = s.stamp();
        let issue = s
            .issue_mut(repo, number)
            .ok_or_else(|| Error::transport("edit", format!("no issue #{number} in {repo}")))?;
        issue.body = body.to_string();
        issue.updated_at = stamp;
        Ok(issue.clone())
    }

    fn close(&self, repo: &str, number: u64) -> Result<()> {
        let mut s = self.state();
        s.calls.push(TrackerCall::Close { repo: repo.to_string(), number });
        if let Some(err) = s.take_failure(Operation::Close) {
            return Err(err);
        }
        let stamp = s.stamp();
        let issue = s
            .issue_mut(repo, number)
            .ok_or_else(|| Error::transport("close", format!("no issue #{number} in {repo}")))?;
        if !issue.is_closed() {
            issue.state = IssueState::Closed;
            issue.updated_at = stamp;
        }
        Ok(())
    }
}

/// Builds [`FakeIssueClient`]s over a shared [`FakeTracker`].
#[derive(Clone)]
pub struct FakeClientFactory {
    tracker: FakeTracker,
}

impl IssueClientFactory for FakeClientFactory {
    fn client_for(&self, repo: &RepoRef) -> Result<Box<dyn IssueClient>> {
        Ok(Box::new(FakeIssueClient { tracker: self.tracker.clone(), repo: repo.slug() }))
    }
}

/// Issue client bound to one repository of a [`FakeTracker`].
pub struct FakeIssueClient {
    tracker: FakeTracker,
    repo: String,
}

impl IssueClient for FakeIssueClient {
    fn find_issue<'a>(&'a self, title: &'a str) -> IssueFuture<'a, Option<Issue>> {
        Box::pin(async move { self.tracker.find(&self.repo, title) })
    }

    fn create_issue<'a>(&'a self, issue: &'a NewIssue) -> IssueFuture<'a, Issue> {
        Box::pin(async move { self.tracker.create(&self.repo, issue) })
    }

    fn edit_issue<'a>(&'a self, number: u64, body: &'a str) -> IssueFuture<'a, Issue> {
        Box::pin(async move { self.tracker.edit(&self.repo, number, body) })
    }

    fn close_issue(&self, number: u64) -> IssueFuture<'_, ()> {
        Box::pin(async move { self.tracker.close(&self.repo, number) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(tracker: &FakeTracker) -> Box<dyn IssueClient> {
        tracker.factory().client_for(&RepoRef::parse("octo/widgets").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn created_issues_are_open_and_numbered_in_order() {
        let tracker = FakeTracker::new();
        let c = client(&tracker);
        let a = c.create_issue(&NewIssue { title: "a".into(), body: String::new() }).await.unwrap();
        let b = c.create_issue(&NewIssue { title: "b".into(), body: String::new() }).await.unwrap();
        assert!(b.number > a.number);
        assert_eq!(a.state, IssueState::Open);
        assert_eq!(tracker.count(Operation::Create), 2);
    }

    #[tokio::test]
    async fn repositories_are_isolated() {
        let tracker = FakeTracker::new();
        tracker.seed("octo/other", "t1", "", IssueState::Open);
        assert!(client(&tracker).find_issue("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_returns_first_match_in_tracker_order() {
        let tracker = FakeTracker::new();
        let first = tracker.seed("octo/widgets", "t1", "one", IssueState::Closed);
        tracker.seed("octo/widgets", "t1", "two", IssueState::Open);
        let found = client(&tracker).find_issue("t1").await.unwrap().unwrap();
        assert_eq!(found.number, first);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let tracker = FakeTracker::new();
        tracker.fail_next(Operation::Find, 1);
        let c = client(&tracker);
        assert!(matches!(c.find_issue("t1").await, Err(Error::Transport { .. })));
        assert!(c.find_issue("t1").await.is_ok());
        assert_eq!(tracker.count(Operation::Find), 2);
    }

    #[tokio::test]
    async fn always_failing_until_healed() {
        let tracker = FakeTracker::new();
        let number = tracker.seed("octo/widgets", "t1", "", IssueState::Open);
        tracker.fail_always(Operation::Close);
        let c = client(&tracker);
        for _ in 0..3 {
            assert!(c.close_issue(number).await.is_err());
        }
        tracker.heal(Operation::Close);
        c.close_issue(number).await.unwrap();
        assert!(tracker.issue("octo/widgets", number).unwrap().is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let tracker = FakeTracker::new();
        let number = tracker.seed("octo/widgets", "t1", "", IssueState::Closed);
        let before = tracker.issue("octo/widgets", number).unwrap();
        client(&tracker).close_issue(number).await.unwrap();
        assert_eq!(tracker.issue("octo/widgets", number).unwrap(), before);
    }

    #[tokio::test]
    async fn edit_bumps_update_time() {
        let tracker = FakeTracker::new();
        let number = tracker.seed("octo/widgets", "t1", "old", IssueState::Open);
        let before = tracker.issue("octo/widgets", number).unwrap();
        let edited = client(&tracker).edit_issue(number, "new").await.unwrap();
        assert_eq!(edited.body, "new");
        assert_ne!(edited.updated_at, before.updated_at);
        assert_eq!(tracker.mutation_count(), 1);
    }
}
