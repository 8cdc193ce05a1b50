//! Live filesystem adapter: `std::fs` for I/O, `fs4` advisory locks, and
//! `notify` directory watches.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use fs4::fs_std::FileExt;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::ports::filesystem::{ChangeHandler, FileSystem, Held};

/// Real disk I/O.
pub struct LiveFileSystem;

impl FileSystem for LiveFileSystem {
    fn read_to_string(
        &self,
        path: &Path,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn write(
        &self,
        path: &Path,
        contents: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        // Each writer stages under its own unique name, then renames over the target.
        let mut staging = NamedTempFile::new_in(parent)?;
        staging.write_all(contents.as_bytes())?;
        staging.persist(path)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(
        &self,
        path: &Path,
    ) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn lock_exclusive(
        &self,
        path: &Path,
    ) -> Result<Held, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
        file.lock_exclusive()?;
        // Closing the file releases the lock.
        Ok(Box::new(file))
    }

    fn watch_dir(
        &self,
        dir: &Path,
        on_change: ChangeHandler,
    ) -> Result<Option<Held>, Box<dyn std::error::Error + Send + Sync>> {
        std::fs::create_dir_all(dir)?;
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                for path in &event.paths {
                    on_change(path);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "directory watch error"),
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(Some(Box::new(watcher)))
    }
}
