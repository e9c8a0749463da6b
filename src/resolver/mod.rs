//! Handle resolvers
//!
//! A [`Resolver`] maps a handle (a URL, an archive path, a directory) to a
//! local module directory. Resolvers that download go through a shared
//! [`DownloadCoordinator`], so every process resolving the same handle against
//! the same cache root downloads it at most once.
//!
//! ```no_run
//! use modcache::config::Config;
//! use modcache::resolver::{Resolver, default_resolver};
//!
//! # async fn example() -> modcache::Result<()> {
//! let resolver = default_resolver(&Config::default())?;
//! let dir = resolver
//!     .get_module_path("https://example.com/models/encoder/1")
//!     .await?;
//! println!("module at {}", dir.display());
//! # Ok(())
//! # }
//! ```

pub mod archive;
mod archive_file;
mod http;
mod path;

pub use archive_file::ArchiveFileResolver;
pub use http::HttpCompressedResolver;
pub use path::PathResolver;

use crate::cache::DownloadCoordinator;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

const SUPPORTED_FORMATS: &str = "Currently supported handle formats: URLs pointing to a TGZ file \
     (e.g. http://address/module.tgz), local TAR or TGZ archives (e.g. /tmp/module.tgz), \
     or Local File System directory (e.g. /tmp/my_local_module).";

/// Maps handles to local module directories
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Whether this resolver understands `handle`
    ///
    /// Must not fail: anything that prevents a decision counts as unsupported.
    async fn is_supported(&self, handle: &str) -> bool;

    /// Resolve a handle this resolver supports
    ///
    /// Callers go through [`Resolver::get_module_path`], which checks support first.
    async fn resolve(&self, handle: &str) -> Result<PathBuf>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Message carried by [`Error::UnsupportedHandle`] for `handle`
    fn unsupported_message(&self, handle: &str) -> String {
        unsupported_handle_message(handle)
    }

    /// Resolve `handle` to a module directory
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedHandle`] if the handle format is not supported,
    /// otherwise whatever resolution fails with.
    async fn get_module_path(&self, handle: &str) -> Result<PathBuf> {
        if self.is_supported(handle).await {
            self.resolve(handle).await
        } else {
            Err(Error::UnsupportedHandle {
                handle: handle.to_string(),
                message: self.unsupported_message(handle),
            })
        }
    }
}

/// Base explanation for a handle no resolver accepts
pub fn unsupported_handle_message(handle: &str) -> String {
    format!(
        "unsupported handle format '{handle}'. No resolvers found that can successfully \
         resolve it. If the handle points to the local filesystem, the error indicates \
         that the module directory does not exist."
    )
}

/// Delegates each handle to the first child resolver that supports it
pub struct FirstSupportingResolver {
    resolvers: Vec<Box<dyn Resolver>>,
    descriptive_errors: bool,
}

impl FirstSupportingResolver {
    /// Compose `resolvers`, tried in order
    ///
    /// With `descriptive_errors`, unsupported-handle errors also list the
    /// supported handle formats.
    pub fn new(resolvers: Vec<Box<dyn Resolver>>, descriptive_errors: bool) -> Self {
        Self {
            resolvers,
            descriptive_errors,
        }
    }

    /// Names of the child resolvers, in order
    pub fn resolver_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    async fn first_supported(&self, handle: &str) -> Option<&dyn Resolver> {
        for resolver in &self.resolvers {
            if resolver.is_supported(handle).await {
                return Some(resolver.as_ref());
            }
        }
        None
    }
}

impl std::fmt::Debug for FirstSupportingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirstSupportingResolver")
            .field("resolvers", &self.resolver_names())
            .field("descriptive_errors", &self.descriptive_errors)
            .finish()
    }
}

#[async_trait]
impl Resolver for FirstSupportingResolver {
    async fn is_supported(&self, handle: &str) -> bool {
        self.first_supported(handle).await.is_some()
    }

    async fn resolve(&self, handle: &str) -> Result<PathBuf> {
        match self.first_supported(handle).await {
            Some(resolver) => {
                tracing::debug!(handle = %handle, resolver = resolver.name(), "resolving handle");
                resolver.get_module_path(handle).await
            }
            None => Err(Error::UnsupportedHandle {
                handle: handle.to_string(),
                message: self.unsupported_message(handle),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "first-supporting"
    }

    fn unsupported_message(&self, handle: &str) -> String {
        let base = unsupported_handle_message(handle);
        if self.descriptive_errors {
            format!("{base} {SUPPORTED_FORMATS}")
        } else {
            base
        }
    }
}

/// The default resolver chain for `config`: HTTP, then local archives, then directories
///
/// All downloading resolvers share one local-filesystem coordinator using
/// `config.lock`.
pub fn default_resolver(config: &Config) -> Result<FirstSupportingResolver> {
    default_resolver_with(config, DownloadCoordinator::local(config.lock.clone()))
}

/// The default resolver chain, downloading through `coordinator`
///
/// Use this to share a cancellation token or a custom storage backend.
pub fn default_resolver_with(
    config: &Config,
    coordinator: DownloadCoordinator,
) -> Result<FirstSupportingResolver> {
    config.validate()?;
    let cache_dir = config.resolve_cache_dir()?;
    let storage = Arc::clone(coordinator.storage());

    let resolvers: Vec<Box<dyn Resolver>> = vec![
        Box::new(HttpCompressedResolver::new(
            cache_dir.clone(),
            coordinator.clone(),
            config.http.clone(),
        )?),
        Box::new(ArchiveFileResolver::new(cache_dir, coordinator)),
        Box::new(PathResolver::new(storage)),
    ];
    Ok(FirstSupportingResolver::new(resolvers, config.descriptive_errors))
}
