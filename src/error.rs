//! Crate-wide error type.
//!
//! "Issue not found" is not a variant: a missing issue is data
//! (`Option<Issue>`), never a fault.

use thiserror::Error;

/// Errors raised by the issue client, the record store, and the controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A call to the issue tracker failed (network, timeout, unexpected status, bad payload).
    #[error("tracker {operation} failed: {message}")]
    Transport {
        /// The tracker operation that failed (`find`, `create`, `edit`, `close`).
        operation: String,
        /// Human-readable cause.
        message: String,
    },

    /// An optimistic-concurrency write was rejected because the record moved on.
    #[error("conflict writing record {key}: expected revision {expected}, found {actual}")]
    Conflict {
        /// The record identity.
        key: String,
        /// The revision the writer read.
        expected: String,
        /// The revision currently stored.
        actual: String,
    },

    /// A declared record is malformed and cannot be reconciled until a user fixes it.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The offending field (e.g. `spec.repo`).
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The record store could not be read or written.
    #[error("store error: {message}")]
    Store {
        /// Human-readable cause.
        message: String,
    },

    /// An update or patch targeted a record that no longer exists.
    #[error("record {key} not found")]
    RecordNotFound {
        /// The record identity.
        key: String,
    },

    /// Process configuration is missing or malformed.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable cause.
        message: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a transport error for the given tracker operation.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { operation: operation.into(), message: message.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(
        key: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Conflict { key: key.into(), expected: expected.into(), actual: actual.into() }
    }

    /// Creates a validation error for the given field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Creates a record-not-found error.
    pub fn record_not_found(key: impl Into<String>) -> Self {
        Self::RecordNotFound { key: key.into() }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Returns `true` when redelivering the same key may succeed without user action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Conflict { .. } | Self::Store { .. })
    }

    /// Returns `true` for optimistic-concurrency rejections.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
