//! Deletion protocol: the finalizer lifecycle of one record.
//!
//! ```text
//! NoFinalizer ──Register──▶ Registered ──RequestDeletion──▶ Closing ──Release──▶ Released
//! ```
//!
//! The state is derived only from persisted fields (finalizer list and
//! deletion timestamp), so it survives restarts. A failed step never moves
//! the state, and there is no edge out of `Closing` except `Release`.

use crate::resource::{IssueResource, FINALIZER};

/// Where a record stands in the deletion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Not yet protected; no issue has been created for it.
    NoFinalizer,
    /// Protected; every issue it creates will get a close attempt.
    Registered,
    /// Deletion requested while protected; the issue must be closed first.
    Closing,
    /// Deletion requested and not (or no longer) protected; the store may erase it.
    Released,
}

/// Something that happened to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerEvent {
    /// The finalizer token was added and persisted.
    Register,
    /// The user asked for the record to be deleted.
    RequestDeletion,
    /// The issue was closed (or confirmed absent) and the token removal persisted.
    Release,
    /// A close or persistence step failed.
    Fail,
}

impl FinalizerState {
    /// Derives the state of `record` from its persisted fields.
    #[must_use]
    pub fn of(record: &IssueResource) -> Self {
        match (record.has_finalizer(FINALIZER), record.deletion_requested()) {
            (false, false) => Self::NoFinalizer,
            (true, false) => Self::Registered,
            (true, true) => Self::Closing,
            (false, true) => Self::Released,
        }
    }

    /// Applies `event`. Events that are not valid in the current state leave it unchanged.
    #[must_use]
    pub const fn transition(self, event: FinalizerEvent) -> Self {
        match (self, event) {
            (Self::NoFinalizer, FinalizerEvent::Register) => Self::Registered,
            (Self::NoFinalizer, FinalizerEvent::RequestDeletion)
            | (Self::Closing, FinalizerEvent::Release) => Self::Released,
            (Self::Registered, FinalizerEvent::RequestDeletion) => Self::Closing,
            (state, _) => state,
        }
    }
}
