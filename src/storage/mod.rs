//! Storage capability used by the download cache
//!
//! The coordinator never touches the filesystem directly. Everything goes
//! through the [`Storage`] trait so the lock protocol can run against any store
//! that offers two atomic primitives:
//!
//! - a create-if-absent write ([`Storage::write_atomic`] with `overwrite = false`)
//! - a no-overwrite directory rename ([`Storage::rename_dir`])
//!
//! Network filesystems rarely support robust advisory locks, so nothing here
//! relies on `flock` or similar OS primitives.
//!
//! [`LocalStorage`] implements the trait on top of `tokio::fs`.

mod local;

pub use local::LocalStorage;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// A single directory entry as reported by [`Storage::list_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// File name of the entry (not the full path)
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (meaningful for files only)
    pub len: u64,
}

/// Filesystem capability required by the download cache
///
/// All failures are reported as [`crate::Error::Storage`] so callers can tell
/// "already gone" ([`crate::Error::is_not_found`]) and "already there"
/// ([`crate::Error::is_already_exists`]) apart from genuine failures.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether a file or directory exists at `path`
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read a whole file as UTF-8
    async fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Atomically write `contents` to `path`
    ///
    /// Readers never observe a partially written file. With `overwrite = false`
    /// the write fails with an already-exists error when `path` is present.
    async fn write_atomic(&self, path: &Path, contents: &str, overwrite: bool) -> Result<()>;

    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove a single file
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory and everything below it
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Atomically rename directory `from` to `to`
    ///
    /// Fails with an already-exists error when `to` holds content. An empty
    /// directory at `to` is not a published module and may be replaced.
    async fn rename_dir(&self, from: &Path, to: &Path) -> Result<()>;

    /// List the direct children of a directory
    async fn list_dir(&self, path: &Path) -> Result<Vec<EntryInfo>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Total size in bytes of all files below `path`
    async fn dir_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in self.list_dir(&dir).await? {
                if entry.is_dir {
                    pending.push(dir.join(&entry.name));
                } else {
                    total = total.saturating_add(entry.len);
                }
            }
        }
        Ok(total)
    }
}
