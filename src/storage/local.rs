//! Local filesystem storage backed by `tokio::fs`

use super::{EntryInfo, Storage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// [`Storage`] implementation for local (or locally mounted) filesystems
///
/// Create-if-absent writes stage the content in a sibling file and publish it
/// with `hard_link`, which fails atomically when the target exists. The target
/// filesystem therefore has to support hard links.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Create a local storage handle
    pub fn new() -> Self {
        Self
    }
}

/// Sibling path used to stage an atomic write
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{:016x}.partial", rand::random::<u64>()));
    PathBuf::from(name)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| Error::storage("stat", path, e))
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::storage("read", path, e))
    }

    async fn write_atomic(&self, path: &Path, contents: &str, overwrite: bool) -> Result<()> {
        let staging = staging_path(path);
        tokio::fs::write(&staging, contents)
            .await
            .map_err(|e| Error::storage("write", &staging, e))?;

        let published = if overwrite {
            tokio::fs::rename(&staging, path).await
        } else {
            tokio::fs::hard_link(&staging, path).await
        };

        // After a rename the staging file is gone; after a link it is a second name.
        if let Err(e) = tokio::fs::remove_file(&staging).await
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::debug!(staging = %staging.display(), error = %e, "failed to remove staging file");
        }

        published.map_err(|e| Error::storage("write", path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| Error::storage("create_dir_all", path, e))
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| Error::storage("remove_file", path, e))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| Error::storage("remove_dir_all", path, e))
    }

    /// A non-empty destination fails with `ENOTEMPTY`/`EEXIST`. rename(2)
    /// replaces an empty destination directory, which therefore counts as
    /// unpublished.
    async fn rename_dir(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| Error::storage("rename", to, e))
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<EntryInfo>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| Error::storage("list", path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Error::storage("list", path, e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| Error::storage("stat", entry.path(), e))?;
            entries.push(EntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                len: metadata.len(),
            });
        }
        Ok(entries)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
