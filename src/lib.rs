//! # modcache
//!
//! Multi-process-safe download cache for model modules.
//!
//! Many processes (possibly on different machines sharing a network
//! filesystem) may ask for the same module at once. modcache guarantees that
//! at most one of them downloads it while the others wait and then reuse the
//! published directory. Coordination uses nothing but files next to the module
//! directory, so it works on stores without advisory locking:
//!
//! - `<module_dir>.lock` marks the current downloader
//! - `<module_dir>.<uid>.tmp` is that downloader's private staging area
//! - an atomic rename publishes the finished directory
//!
//! Downloaders that die leave a lock behind; waiters reclaim it once the
//! holder shows no progress for a whole timeout window.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modcache::{Config, Resolver, default_resolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = default_resolver(&Config::default())?;
//!     let dir = resolver
//!         .get_module_path("https://example.com/models/encoder/1")
//!         .await?;
//!     println!("module unpacked at {}", dir.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download coordination and on-disk layout
pub mod cache;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Handle resolvers
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Storage capability
pub mod storage;

pub use cache::DownloadCoordinator;
pub use config::{Config, HttpConfig, LockConfig, RetryConfig};
pub use error::{Error, Result};
pub use resolver::{
    ArchiveFileResolver, FirstSupportingResolver, HttpCompressedResolver, PathResolver, Resolver,
    default_resolver, default_resolver_with,
};
pub use storage::{LocalStorage, Storage};

use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Resolve `handle`, cancelling cleanly on SIGTERM/SIGINT (Ctrl+C on Windows)
///
/// `cancel` must be the token observed by the resolver's coordinator (see
/// [`DownloadCoordinator::with_cancel_token`] and [`default_resolver_with`]).
/// On a signal the token is cancelled and the resolution is awaited, so the
/// temporary directory and lock are removed before this returns
/// [`Error::Cancelled`].
///
/// # Example
///
/// ```no_run
/// use modcache::{Config, DownloadCoordinator, default_resolver_with, resolve_with_shutdown};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let cancel = CancellationToken::new();
///     let coordinator =
///         DownloadCoordinator::local(config.lock.clone()).with_cancel_token(cancel.clone());
///     let resolver = default_resolver_with(&config, coordinator)?;
///
///     let dir = resolve_with_shutdown(&resolver, "https://example.com/m/1", &cancel).await?;
///     println!("{}", dir.display());
///     Ok(())
/// }
/// ```
pub async fn resolve_with_shutdown(
    resolver: &dyn Resolver,
    handle: &str,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    resolve_until(resolver, handle, cancel, wait_for_signal()).await
}

async fn resolve_until(
    resolver: &dyn Resolver,
    handle: &str,
    cancel: &CancellationToken,
    shutdown: impl Future<Output = ()>,
) -> Result<PathBuf> {
    let resolution = resolver.get_module_path(handle);
    tokio::pin!(resolution);

    tokio::select! {
        result = &mut resolution => result,
        _ = shutdown => {
            tracing::info!(handle = %handle, "Shutdown requested, cancelling module resolution");
            cancel.cancel();
            resolution.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
