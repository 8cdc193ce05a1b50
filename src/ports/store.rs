//! Resource store port: persistence and change notification for declared records.

use tokio::sync::broadcast;

use crate::error::Result;
use crate::resource::{IssueResource, IssueStatus, ResourceKey};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// The record was created or written.
    Applied,
    /// The record was erased.
    Deleted,
}

/// One change notification, emitted per mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// The record that changed.
    pub key: ResourceKey,
    /// The kind of change.
    pub kind: StoreEventKind,
}

impl StoreEvent {
    /// An `Applied` event for `key`.
    #[must_use]
    pub const fn applied(key: ResourceKey) -> Self {
        Self { key, kind: StoreEventKind::Applied }
    }

    /// A `Deleted` event for `key`.
    #[must_use]
    pub const fn deleted(key: ResourceKey) -> Self {
        Self { key, kind: StoreEventKind::Deleted }
    }
}

/// Holds declared records with optimistic concurrency.
///
/// Every write bumps `metadata.resource_version`. Writes that carry a stale
/// revision are rejected with [`crate::Error::Conflict`]. The deletion
/// timestamp, once set, is never cleared, and a record whose deletion was
/// requested is erased as soon as its finalizer list becomes empty.
pub trait ResourceStore: Send + Sync {
    /// Fetches a record. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a store error if the record cannot be read.
    fn get(&self, key: &ResourceKey) -> Result<Option<IssueResource>>;

    /// Lists every record identity, sorted.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be enumerated.
    fn list(&self) -> Result<Vec<ResourceKey>>;

    /// Stores a new record after schema validation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed record, or a conflict if the
    /// name is taken.
    fn create(&self, resource: IssueResource) -> Result<IssueResource>;

    /// Writes metadata and spec, conditional on `resource.metadata.resource_version`
    /// matching the stored revision. The status in `resource` is ignored.
    ///
    /// Returns `Ok(None)` when the write released the last finalizer of a
    /// record under deletion and the record was erased.
    ///
    /// # Errors
    ///
    /// Returns a conflict on a stale revision, or not-found if the record is gone.
    fn update(&self, resource: &IssueResource) -> Result<Option<IssueResource>>;

    /// Merges `status` into the stored record, conditional on `expected_version`.
    /// Metadata and spec are left as stored.
    ///
    /// # Errors
    ///
    /// Returns a conflict on a stale revision, or not-found if the record is gone.
    fn patch_status(
        &self,
        key: &ResourceKey,
        expected_version: &str,
        status: &IssueStatus,
    ) -> Result<IssueResource>;

    /// Marks a record for deletion. The first request stamps the deletion
    /// timestamp; later requests leave it unchanged. A record without
    /// finalizers is erased immediately and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns not-found if the record does not exist.
    fn request_deletion(&self, key: &ResourceKey) -> Result<Option<IssueResource>>;

    /// Subscribes to change notifications for mutations made after this call.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
