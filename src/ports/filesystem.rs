//! Filesystem port used by the file-backed record store.

use std::any::Any;
use std::path::Path;

/// A lock or watch that stays in force until dropped.
pub type Held = Box<dyn Any + Send>;

/// Receives the path of each directory entry that changed.
pub type ChangeHandler = Box<dyn Fn(&Path) + Send + Sync + 'static>;

/// Provides filesystem access for reading and writing record files.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or is not valid UTF-8.
    fn read_to_string(
        &self,
        path: &Path,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;

    /// Writes the given contents to a file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (permissions, disk full, etc.).
    fn write(
        &self,
        path: &Path,
        contents: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Removes a file. Removing a file that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    fn remove_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Returns `true` if the path exists on the filesystem.
    fn exists(&self, path: &Path) -> bool;

    /// Lists the entries in a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a directory or cannot be read.
    fn list_dir(
        &self,
        path: &Path,
    ) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>>;

    /// Takes an exclusive advisory lock on `path`, creating the file if needed.
    /// Any other holder of the same path, in this process or another, blocks
    /// until the returned guard is dropped.
    ///
    /// The default holds nothing, which is enough for a filesystem only one
    /// handle can see.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked.
    fn lock_exclusive(
        &self,
        _path: &Path,
    ) -> Result<Held, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Box::new(()))
    }

    /// Calls `on_change` for every entry created, modified, or removed in `dir`
    /// until the returned guard is dropped. `Ok(None)` means this filesystem
    /// cannot watch, which is the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be established.
    fn watch_dir(
        &self,
        _dir: &Path,
        _on_change: ChangeHandler,
    ) -> Result<Option<Held>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(None)
    }
}
