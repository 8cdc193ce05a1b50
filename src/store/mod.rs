//! Record stores: persistence layer for declared issue records.
//!
//! [`RecordStore`] owns the store semantics (revisions, conflict detection,
//! the monotonic deletion timestamp, finalizer-gated erasure, change events)
//! and delegates raw reads and writes to a [`Backend`]:
//!
//! - [`MemoryStore`]: records in a map, for tests and embedding.
//! - [`FileStore`]: one YAML document per record under `<root>/records/`.

pub mod file;
pub mod memory;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ports::clock::Clock;
use crate::ports::filesystem::Held;
use crate::ports::store::{ResourceStore, StoreEvent};
use crate::resource::{validate, IssueResource, IssueStatus, ResourceKey};

pub use file::{FileBackend, FileStore};
pub use memory::{MemoryBackend, MemoryStore};

/// Buffered change notifications per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Raw record persistence without any store semantics.
pub trait Backend: Send + Sync {
    /// Reads a record, `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the record cannot be read or decoded.
    fn load(&self, key: &ResourceKey) -> Result<Option<IssueResource>>;

    /// Writes a record, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns a store error if the record cannot be encoded or written.
    fn save(&self, resource: &IssueResource) -> Result<()>;

    /// Erases a record. Erasing an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns a store error if the record cannot be erased.
    fn erase(&self, key: &ResourceKey) -> Result<()>;

    /// Lists stored identities, sorted.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be enumerated.
    fn keys(&self) -> Result<Vec<ResourceKey>>;

    /// Excludes writers sharing this backend's storage, including other
    /// processes, until the returned value is dropped.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lock cannot be taken.
    fn lock(&self) -> Result<Held> {
        Ok(Box::new(()))
    }

    /// Starts forwarding changes made outside this handle into `events`.
    /// Calling it again once a watch is running does nothing.
    ///
    /// # Errors
    ///
    /// Returns a store error if the watch cannot be established.
    fn watch(&self, _events: &broadcast::Sender<StoreEvent>) -> Result<()> {
        Ok(())
    }
}

/// Outcome of applying a write to the current stored record.
#[derive(Debug)]
enum Mutation {
    Put(IssueResource),
    Remove,
    Unchanged(IssueResource),
}

/// A [`ResourceStore`] over any [`Backend`].
pub struct RecordStore<B> {
    backend: B,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
    clock: Arc<dyn Clock>,
}

impl<B: Backend> RecordStore<B> {
    /// Wraps a backend.
    pub fn with_backend(backend: B, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { backend, write_lock: Mutex::new(()), events, clock }
    }

    /// Serializes load-check-save, first within this handle, then across
    /// every handle on the same storage.
    fn lock(&self) -> Result<(MutexGuard<'_, ()>, Held)> {
        let local = self.write_lock.lock().map_err(|_| Error::store("store write lock poisoned"))?;
        let shared = self.backend.lock()?;
        Ok((local, shared))
    }

    fn load_existing(&self, key: &ResourceKey) -> Result<IssueResource> {
        self.backend.load(key)?.ok_or_else(|| Error::record_not_found(key.as_str()))
    }

    fn commit(&self, key: &ResourceKey, mutation: Mutation) -> Result<Option<IssueResource>> {
        match mutation {
            Mutation::Put(resource) => {
                self.backend.save(&resource)?;
                debug!(%key, revision = %resource.metadata.resource_version, "record written");
                self.emit(StoreEvent::applied(key.clone()));
                Ok(Some(resource))
            }
            Mutation::Remove => {
                self.backend.erase(key)?;
                debug!(%key, "record erased");
                self.emit(StoreEvent::deleted(key.clone()));
                Ok(None)
            }
            Mutation::Unchanged(resource) => Ok(Some(resource)),
        }
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine; events only matter to a running controller.
        let _ = self.events.send(event);
    }
}

impl<B: Backend> ResourceStore for RecordStore<B> {
    fn get(&self, key: &ResourceKey) -> Result<Option<IssueResource>> {
        self.backend.load(key)
    }

    fn list(&self) -> Result<Vec<ResourceKey>> {
        self.backend.keys()
    }

    fn create(&self, resource: IssueResource) -> Result<IssueResource> {
        let _guard = self.lock()?;
        let key = resource.key();
        let existing = self.backend.load(&key)?;
        let created = prepare_create(resource, existing.as_ref())?;
        self.commit(&key, Mutation::Put(created))?
            .ok_or_else(|| Error::store(format!("record {key} vanished during create")))
    }

    fn update(&self, resource: &IssueResource) -> Result<Option<IssueResource>> {
        let _guard = self.lock()?;
        let key = resource.key();
        let current = self.load_existing(&key)?;
        let mutation = prepare_update(&current, resource)?;
        self.commit(&key, mutation)
    }

    fn patch_status(
        &self,
        key: &ResourceKey,
        expected_version: &str,
        status: &IssueStatus,
    ) -> Result<IssueResource> {
        let _guard = self.lock()?;
        let current = self.load_existing(key)?;
        let patched = prepare_status(&current, expected_version, status)?;
        self.commit(key, Mutation::Put(patched))?
            .ok_or_else(|| Error::store(format!("record {key} vanished during status patch")))
    }

    fn request_deletion(&self, key: &ResourceKey) -> Result<Option<IssueResource>> {
        let _guard = self.lock()?;
        let current = self.load_existing(key)?;
        let mutation = prepare_deletion(current, self.clock.now());
        self.commit(key, mutation)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        let receiver = self.events.subscribe();
        if let Err(e) = self.backend.watch(&self.events) {
            warn!(error = %e, "cannot watch for outside changes; relying on resync");
        }
        receiver
    }
}

fn next_revision(current: &str) -> String {
    current.parse::<u64>().map_or(1, |n| n.saturating_add(1)).to_string()
}

fn ensure_revision(current: &IssueResource, expected: &str) -> Result<()> {
    if current.metadata.resource_version == expected {
        Ok(())
    } else {
        Err(Error::conflict(
            current.metadata.name.as_str(),
            expected,
            current.metadata.resource_version.as_str(),
        ))
    }
}

fn prepare_create(
    mut resource: IssueResource,
    existing: Option<&IssueResource>,
) -> Result<IssueResource> {
    validate(&resource)?;
    if let Some(existing) = existing {
        return Err(Error::conflict(
            resource.metadata.name.as_str(),
            "",
            existing.metadata.resource_version.as_str(),
        ));
    }
    resource.metadata.resource_version = next_revision("");
    resource.metadata.deletion_timestamp = None;
    resource.status = IssueStatus::default();
    Ok(resource)
}

fn prepare_update(current: &IssueResource, incoming: &IssueResource) -> Result<Mutation> {
    ensure_revision(current, &incoming.metadata.resource_version)?;

    let mut next = incoming.clone();
    next.status = current.status.clone();
    next.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
    validate(&next)?;

    if next.deletion_requested() && next.metadata.finalizers.is_empty() {
        return Ok(Mutation::Remove);
    }
    next.metadata.resource_version = next_revision(&current.metadata.resource_version);
    Ok(Mutation::Put(next))
}

fn prepare_status(
    current: &IssueResource,
    expected_version: &str,
    status: &IssueStatus,
) -> Result<IssueResource> {
    ensure_revision(current, expected_version)?;
    let mut next = current.clone();
    next.status = status.clone();
    next.metadata.resource_version = next_revision(&current.metadata.resource_version);
    Ok(next)
}

fn prepare_deletion(mut current: IssueResource, now: chrono::DateTime<chrono::Utc>) -> Mutation {
    if current.metadata.finalizers.is_empty() {
        return Mutation::Remove;
    }
    if current.deletion_requested() {
        return Mutation::Unchanged(current);
    }
    current.metadata.deletion_timestamp = Some(now);
    current.metadata.resource_version = next_revision(&current.metadata.resource_version);
    Mutation::Put(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{IssueSpec, FINALIZER};

    fn sample(name: &str) -> IssueResource {
        IssueResource::new(
            name,
            IssueSpec { repo: "octo/widgets".into(), title: "t1".into(), description: "d1".into() },
        )
    }

    #[test]
    fn revisions_count_up_from_one() {
        assert_eq!(next_revision(""), "1");
        assert_eq!(next_revision("41"), "42");
        assert_eq!(next_revision("garbage"), "1");
    }

    #[test]
    fn create_clears_store_owned_fields() {
        let mut res = sample("a");
        res.status.state = "open".into();
        res.metadata.deletion_timestamp = Some(chrono::Utc::now());
        let created = prepare_create(res, None).unwrap();
        assert_eq!(created.metadata.resource_version, "1");
        assert!(!created.deletion_requested());
        assert_eq!(created.status, IssueStatus::default());
    }

    #[test]
    fn create_rejects_taken_name() {
        let existing = prepare_create(sample("a"), None).unwrap();
        let err = prepare_create(sample("a"), Some(&existing)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn update_with_stale_revision_conflicts() {
        let current = prepare_create(sample("a"), None).unwrap();
        let mut stale = current.clone();
        stale.metadata.resource_version = "0".into();
        assert!(prepare_update(&current, &stale).unwrap_err().is_conflict());
    }

    #[test]
    fn update_cannot_clear_deletion_or_status() {
        let mut current = prepare_create(sample("a"), None).unwrap();
        current.add_finalizer(FINALIZER);
        current.status.state = "open".into();
        let Mutation::Put(current) = prepare_deletion(current, chrono::Utc::now()) else {
            panic!("expected put");
        };

        let mut incoming = current.clone();
        incoming.metadata.deletion_timestamp = None;
        incoming.status = IssueStatus::default();
        let Mutation::Put(next) = prepare_update(&current, &incoming).unwrap() else {
            panic!("expected put");
        };
        assert!(next.deletion_requested());
        assert_eq!(next.status.state, "open");
    }

    #[test]
    fn releasing_last_finalizer_under_deletion_removes() {
        let mut current = prepare_create(sample("a"), None).unwrap();
        current.add_finalizer(FINALIZER);
        let Mutation::Put(current) = prepare_deletion(current, chrono::Utc::now()) else {
            panic!("expected put");
        };
        let mut released = current.clone();
        released.remove_finalizer(FINALIZER);
        assert!(matches!(prepare_update(&current, &released).unwrap(), Mutation::Remove));
    }

    #[test]
    fn deletion_without_finalizers_removes_immediately() {
        let current = prepare_create(sample("a"), None).unwrap();
        assert!(matches!(prepare_deletion(current, chrono::Utc::now()), Mutation::Remove));
    }

    #[test]
    fn repeated_deletion_keeps_first_timestamp() {
        let mut current = prepare_create(sample("a"), None).unwrap();
        current.add_finalizer(FINALIZER);
        let first = chrono::Utc::now();
        let Mutation::Put(marked) = prepare_deletion(current, first) else {
            panic!("expected put");
        };
        let later = first + chrono::Duration::seconds(30);
        let Mutation::Unchanged(again) = prepare_deletion(marked.clone(), later) else {
            panic!("expected unchanged");
        };
        assert_eq!(again.metadata.deletion_timestamp, Some(first));
        assert_eq!(again.metadata.resource_version, marked.metadata.resource_version);
    }

    #[test]
    fn status_patch_preserves_spec_and_checks_revision() {
        let current = prepare_create(sample("a"), None).unwrap();
        let status = IssueStatus { state: "open".into(), last_update_timestamp: "ts".into() };
        let patched = prepare_status(&current, "1", &status).unwrap();
        assert_eq!(patched.spec, current.spec);
        assert_eq!(patched.status, status);
        assert_eq!(patched.metadata.resource_version, "2");
        assert!(prepare_status(&patched, "1", &status).unwrap_err().is_conflict());
    }
}
