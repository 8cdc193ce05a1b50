//! In-memory record store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{Backend, RecordStore};
use crate::error::{Error, Result};
use crate::ports::clock::Clock;
use crate::resource::{IssueResource, ResourceKey};

/// Records held in a sorted map.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<ResourceKey, IssueResource>>,
}

impl MemoryBackend {
    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ResourceKey, IssueResource>>> {
        self.records.lock().map_err(|_| Error::store("memory store lock poisoned"))
    }
}

impl Backend for MemoryBackend {
    fn load(&self, key: &ResourceKey) -> Result<Option<IssueResource>> {
        Ok(self.records()?.get(key).cloned())
    }

    fn save(&self, resource: &IssueResource) -> Result<()> {
        self.records()?.insert(resource.key(), resource.clone());
        Ok(())
    }

    fn erase(&self, key: &ResourceKey) -> Result<()> {
        self.records()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<ResourceKey>> {
        Ok(self.records()?.keys().cloned().collect())
    }
}

/// A record store that lives only as long as the process.
pub type MemoryStore = RecordStore<MemoryBackend>;

impl RecordStore<MemoryBackend> {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(MemoryBackend::default(), clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::live::clock::LiveClock;
    use crate::ports::store::{ResourceStore, StoreEvent};
    use crate::resource::{IssueSpec, IssueStatus, FINALIZER};

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(LiveClock))
    }

    fn sample(name: &str) -> IssueResource {
        IssueResource::new(
            name,
            IssueSpec { repo: "octo/widgets".into(), title: "t1".into(), description: "d1".into() },
        )
    }

    #[test]
    fn create_then_get() {
        let store = store();
        store.create(sample("a")).unwrap();
        let got = store.get(&ResourceKey::new("a")).unwrap().unwrap();
        assert_eq!(got.metadata.resource_version, "1");
        assert!(store.get(&ResourceKey::new("b")).unwrap().is_none());
    }

    #[test]
    fn create_rejects_malformed_repo() {
        let store = store();
        let mut res = sample("a");
        res.spec.repo = "no-slash".into();
        assert!(matches!(store.create(res), Err(Error::Validation { .. })));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn list_is_sorted() {
        let store = store();
        for name in ["c", "a", "b"] {
            store.create(sample(name)).unwrap();
        }
        let keys: Vec<String> =
            store.list().unwrap().iter().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn concurrent_writers_conflict() {
        let store = store();
        let created = store.create(sample("a")).unwrap();

        let mut first = created.clone();
        first.add_finalizer(FINALIZER);
        store.update(&first).unwrap();

        let mut second = created;
        second.spec.description = "d2".into();
        assert!(store.update(&second).unwrap_err().is_conflict());
    }

    #[test]
    fn status_patch_against_stale_revision_conflicts() {
        let store = store();
        let created = store.create(sample("a")).unwrap();
        let status = IssueStatus { state: "open".into(), last_update_timestamp: "ts".into() };
        store.patch_status(&created.key(), "1", &status).unwrap();
        assert!(store.patch_status(&created.key(), "1", &status).unwrap_err().is_conflict());
    }

    #[test]
    fn deletion_waits_for_finalizers() {
        let store = store();
        let mut res = sample("a");
        res.add_finalizer(FINALIZER);
        store.create(res).unwrap();
        let key = ResourceKey::new("a");

        let marked = store.request_deletion(&key).unwrap().unwrap();
        assert!(marked.deletion_requested());

        let mut released = marked;
        released.remove_finalizer(FINALIZER);
        assert!(store.update(&released).unwrap().is_none());
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn mutations_emit_events() {
        let store = store();
        let mut events = store.subscribe();
        store.create(sample("a")).unwrap();
        store.request_deletion(&ResourceKey::new("a")).unwrap();

        assert_eq!(events.try_recv().unwrap(), StoreEvent::applied(ResourceKey::new("a")));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::deleted(ResourceKey::new("a")));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn update_of_missing_record_is_not_found() {
        let store = store();
        let err = store.update(&sample("ghost")).unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));
    }
}
