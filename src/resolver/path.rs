use super::Resolver;
use crate::error::Result;
use crate::storage::{LocalStorage, Storage};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolves handles that already name a module directory on the filesystem
pub struct PathResolver {
    storage: Arc<dyn Storage>,
}

impl PathResolver {
    /// Check handle existence through `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(Arc::new(LocalStorage::new()))
    }
}

#[async_trait]
impl Resolver for PathResolver {
    async fn is_supported(&self, handle: &str) -> bool {
        if handle.is_empty() {
            return false;
        }
        match self.storage.exists(Path::new(handle)).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::debug!(handle = %handle, error = %e, "treating unreadable path as unsupported");
                false
            }
        }
    }

    async fn resolve(&self, handle: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(handle))
    }

    fn name(&self) -> &'static str {
        "path"
    }
}
