use super::Resolver;
use super::archive;
use crate::cache::DownloadCoordinator;
use crate::cache::paths::module_dir_name;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

const ARCHIVE_SUFFIXES: [&str; 3] = [".tar", ".tar.gz", ".tgz"];

/// Resolves handles naming a local `.tar`, `.tar.gz` or `.tgz` archive
///
/// Both plain paths and `file://` URLs are accepted. The archive is unpacked
/// into the cache once, exactly like a downloaded module.
pub struct ArchiveFileResolver {
    cache_dir: PathBuf,
    coordinator: DownloadCoordinator,
}

impl ArchiveFileResolver {
    /// Cache unpacked archives under `cache_dir`
    pub fn new(cache_dir: PathBuf, coordinator: DownloadCoordinator) -> Self {
        Self {
            cache_dir,
            coordinator,
        }
    }

    /// Where `handle` is cached: `<cache_dir>/<sha256 of handle>`
    pub fn module_dir(&self, handle: &str) -> PathBuf {
        self.cache_dir.join(module_dir_name(handle))
    }
}

/// The archive file a handle names, if it looks like one
fn archive_path(handle: &str) -> Option<PathBuf> {
    if !ARCHIVE_SUFFIXES.iter().any(|suffix| handle.ends_with(suffix)) {
        return None;
    }
    if handle.starts_with("file://") {
        return Url::parse(handle).ok()?.to_file_path().ok();
    }
    Some(PathBuf::from(handle))
}

#[async_trait]
impl Resolver for ArchiveFileResolver {
    async fn is_supported(&self, handle: &str) -> bool {
        let Some(path) = archive_path(handle) else {
            return false;
        };
        self.coordinator.storage().exists(&path).await.unwrap_or(false)
    }

    async fn resolve(&self, handle: &str) -> Result<PathBuf> {
        let archive_file = archive_path(handle).ok_or_else(|| Error::UnsupportedHandle {
            handle: handle.to_string(),
            message: self.unsupported_message(handle),
        })?;
        let module_dir = self.module_dir(handle);
        let cancel = self.coordinator.cancel_token().clone();

        self.coordinator
            .acquire(handle, &module_dir, move |_handle, temp_dir| async move {
                let file = tokio::fs::File::open(&archive_file)
                    .await
                    .map_err(|e| Error::storage("open", &archive_file, e))?;
                let source = archive_file.display().to_string();
                archive::unpack_async(file, temp_dir, source, cancel).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "archive-file"
    }
}
