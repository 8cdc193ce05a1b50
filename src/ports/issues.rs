//! Issue client port: the four tracker operations the reconciler needs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::RepoRef;

/// Boxed future type alias used by [`IssueClient`] to keep the trait dyn-compatible.
pub type IssueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Lifecycle state of a tracker issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    /// The issue is open.
    Open,
    /// The issue was closed, by the reconciler or by someone else.
    Closed,
}

impl IssueState {
    /// Returns the tracker's spelling of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an issue as the tracker reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker-assigned number, stable once created.
    pub number: u64,
    /// Issue title.
    pub title: String,
    /// Issue body.
    pub body: String,
    /// Open or closed.
    pub state: IssueState,
    /// Tracker-side last-modified time, verbatim.
    pub updated_at: String,
}

impl Issue {
    /// Returns `true` if the issue is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == IssueState::Closed
    }
}

/// Fields sent when creating an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    /// Issue title.
    pub title: String,
    /// Issue body.
    pub body: String,
}

/// Operations against one repository on an external issue tracker.
///
/// Every method is a single tracker call with no internal retry; callers
/// own retry and backoff. Transport failures, timeouts included, surface as
/// [`crate::Error::Transport`].
pub trait IssueClient: Send + Sync {
    /// Lists every issue (all states) and returns the first whose title equals
    /// `title`, in tracker order. `Ok(None)` means no such issue.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the issues cannot be listed or decoded.
    fn find_issue<'a>(&'a self, title: &'a str) -> IssueFuture<'a, Option<Issue>>;

    /// Creates an issue and returns the tracker's record of it.
    ///
    /// # Errors
    ///
    /// Returns a transport error unless the tracker acknowledges the creation.
    fn create_issue<'a>(&'a self, issue: &'a NewIssue) -> IssueFuture<'a, Issue>;

    /// Replaces the body of issue `number` and returns the refreshed snapshot.
    /// Never touches title, state, or number.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the edit is not acknowledged.
    fn edit_issue<'a>(&'a self, number: u64, body: &'a str) -> IssueFuture<'a, Issue>;

    /// Closes issue `number`. Closing an already-closed issue succeeds.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the close is not acknowledged.
    fn close_issue(&self, number: u64) -> IssueFuture<'_, ()>;
}

/// Builds an [`IssueClient`] bound to one repository.
///
/// Construction needs the repository reference and a credential; the
/// factory owns the credential so it never travels with the records.
pub trait IssueClientFactory: Send + Sync {
    /// Returns a client for `repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed (e.g. a malformed credential).
    fn client_for(&self, repo: &RepoRef) -> Result<Box<dyn IssueClient>>;
}
