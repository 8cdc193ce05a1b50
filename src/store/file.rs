//! File-backed record store.
//!
//! Directory layout:
//!
//! ```text
//! <root>/
//!   ├── records/
//!   │     ├── readme-typo.yaml
//!   │     └── ...
//!   └── records.lock
//! ```
//!
//! Writers hold an exclusive lock on `records.lock` for the whole
//! load-check-save sequence, so handles in different processes see each
//! other's revisions. Subscribers also receive events for record files
//! changed by other handles.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use super::{Backend, RecordStore};
use crate::error::{Error, Result};
use crate::ports::clock::Clock;
use crate::ports::filesystem::{FileSystem, Held};
use crate::ports::store::StoreEvent;
use crate::resource::{IssueResource, ResourceKey};

/// Records stored as YAML files through the `FileSystem` port.
pub struct FileBackend {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    watch: Mutex<Option<Held>>,
}

impl FileBackend {
    /// Creates a backend rooted at `root`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, root: &Path) -> Self {
        Self { fs, root: root.to_path_buf(), watch: Mutex::new(None) }
    }

    fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    fn record_path(&self, key: &ResourceKey) -> PathBuf {
        self.records_dir().join(format!("{key}.yaml"))
    }
}

impl Backend for FileBackend {
    fn load(&self, key: &ResourceKey) -> Result<Option<IssueResource>> {
        let path = self.record_path(key);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let contents = self
            .fs
            .read_to_string(&path)
            .map_err(|e| Error::store(format!("failed to read record {key}: {e}")))?;
        let resource: IssueResource = serde_yaml::from_str(&contents)
            .map_err(|e| Error::store(format!("failed to parse record {key}: {e}")))?;
        if resource.metadata.name != key.as_str() {
            return Err(Error::store(format!(
                "record file {key}.yaml declares name {:?}",
                resource.metadata.name
            )));
        }
        Ok(Some(resource))
    }

    fn save(&self, resource: &IssueResource) -> Result<()> {
        let key = resource.key();
        let yaml = serde_yaml::to_string(resource)
            .map_err(|e| Error::store(format!("failed to serialize record {key}: {e}")))?;
        self.fs
            .write(&self.record_path(&key), &yaml)
            .map_err(|e| Error::store(format!("failed to write record {key}: {e}")))
    }

    fn erase(&self, key: &ResourceKey) -> Result<()> {
        self.fs
            .remove_file(&self.record_path(key))
            .map_err(|e| Error::store(format!("failed to remove record {key}: {e}")))
    }

    fn keys(&self) -> Result<Vec<ResourceKey>> {
        let dir = self.records_dir();
        if !self.fs.exists(&dir) {
            return Ok(Vec::new());
        }
        let entries = self
            .fs
            .list_dir(&dir)
            .map_err(|e| Error::store(format!("failed to list records directory: {e}")))?;
        let mut keys: Vec<ResourceKey> = entries
            .iter()
            .filter_map(|name| name.strip_suffix(".yaml"))
            .map(ResourceKey::new)
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn lock(&self) -> Result<Held> {
        self.fs
            .lock_exclusive(&self.root.join("records.lock"))
            .map_err(|e| Error::store(format!("failed to lock records directory: {e}")))
    }

    fn watch(&self, events: &broadcast::Sender<StoreEvent>) -> Result<()> {
        let mut watch = self.watch.lock().map_err(|_| Error::store("record watch poisoned"))?;
        if watch.is_some() {
            return Ok(());
        }
        let fs = Arc::clone(&self.fs);
        let events = events.clone();
        let handler = Box::new(move |path: &Path| {
            if let Some(event) = change_event(fs.as_ref(), path) {
                debug!(key = %event.key, "record file changed");
                let _ = events.send(event);
            }
        });
        *watch = self
            .fs
            .watch_dir(&self.records_dir(), handler)
            .map_err(|e| Error::store(format!("failed to watch records directory: {e}")))?;
        Ok(())
    }
}

/// Maps a changed path under `records/` to the event for its record.
fn change_event(fs: &dyn FileSystem, path: &Path) -> Option<StoreEvent> {
    if path.extension()? != "yaml" {
        return None;
    }
    let key = ResourceKey::new(path.file_stem()?.to_str()?);
    Some(if fs.exists(path) { StoreEvent::applied(key) } else { StoreEvent::deleted(key) })
}

/// A record store persisted under a directory.
pub type FileStore = RecordStore<FileBackend>;

impl RecordStore<FileBackend> {
    /// Opens (or lazily creates) a store rooted at `root`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, root: &Path, clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(FileBackend::new(fs, root), clock)
    }
}
