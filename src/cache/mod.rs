//! Download cache coordinator
//!
//! Resolves a handle to a local module directory so that, across every task,
//! process and machine sharing the cache filesystem, at most one caller runs
//! the download while the others wait and then reuse the published result.
//!
//! ## Protocol
//!
//! Each call to [`DownloadCoordinator::acquire`] runs a small state machine:
//!
//! - **CheckFast**: the module directory exists, return it without locking.
//! - **TryLock**: create `<module_dir>.lock` with a create-if-absent write. On
//!   success re-check the module directory (another task may have published in
//!   between) and either finish or start downloading. If the lock exists, wait.
//! - **Wait**: poll until the lock disappears. A holder whose temporary
//!   directory size and lock contents stay unchanged for a whole timeout window
//!   is presumed dead and its lock is deleted. Then try to lock again.
//! - **Download**: run the download callback into `<module_dir>.<uid>.tmp`.
//! - **Publish**: write the descriptor and rename the temporary directory onto
//!   the module directory. A destination that already exists counts as success.
//! - **Cleanup**: remove the temporary directory and, if the lock still carries
//!   our identity, the lock file. Runs on every exit path.
//!
//! ## Example
//!
//! ```no_run
//! use modcache::cache::DownloadCoordinator;
//! use modcache::config::LockConfig;
//! use std::path::Path;
//!
//! # async fn example() -> modcache::Result<()> {
//! let coordinator = DownloadCoordinator::local(LockConfig::default());
//! let dir = coordinator
//!     .acquire("my-module", Path::new("/var/cache/modules/abc"), |handle, temp_dir| async move {
//!         tokio::fs::write(temp_dir.join("payload.txt"), handle).await?;
//!         Ok::<(), modcache::Error>(())
//!     })
//!     .await?;
//! println!("module available at {}", dir.display());
//! # Ok(())
//! # }
//! ```

pub mod descriptor;
pub mod lock;
pub mod paths;
pub mod staleness;

pub use lock::LockIdentity;
pub use paths::CachePaths;
pub use staleness::{Observation, StalenessTracker};

use crate::config::LockConfig;
use crate::error::{Error, Result, ignore_not_found};
use crate::storage::{LocalStorage, Storage};
use lock::LockGuard;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// States of one [`DownloadCoordinator::acquire`] call
enum Phase {
    CheckFast,
    TryLock,
    Wait,
    Download(LockGuard),
    Publish(LockGuard),
    Cleanup {
        guard: LockGuard,
        outcome: Result<()>,
    },
}

/// Coordinates concurrent downloads of module directories
///
/// Cheap to clone; clones share storage and the cancellation token.
#[derive(Clone)]
pub struct DownloadCoordinator {
    storage: Arc<dyn Storage>,
    lock: LockConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("storage", &self.storage.name())
            .field("lock", &self.lock)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl DownloadCoordinator {
    /// Create a coordinator on top of the given storage
    pub fn new(storage: Arc<dyn Storage>, lock: LockConfig) -> Self {
        Self {
            storage,
            lock,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a coordinator on the local filesystem
    pub fn local(lock: LockConfig) -> Self {
        Self::new(Arc::new(LocalStorage::new()), lock)
    }

    /// Use `token` to cancel waits and downloads
    ///
    /// A cancelled call still cleans up its temporary directory and lock
    /// before returning [`Error::Cancelled`].
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token observed by this coordinator
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The storage this coordinator operates on
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Lock protocol timing
    pub fn lock_config(&self) -> &LockConfig {
        &self.lock
    }

    /// Return `module_dir`, downloading it first if nobody has published it yet
    ///
    /// `download` receives the handle and a private, freshly created temporary
    /// directory to populate. It runs at most once per call, and only while
    /// this call holds the lock for `module_dir`.
    ///
    /// # Errors
    ///
    /// - Any error returned by `download`, unchanged, after cleanup ran
    /// - [`Error::Storage`] for genuine storage failures (permissions, disk full)
    /// - [`Error::Cancelled`] if the cancellation token fired
    pub async fn acquire<F, Fut>(&self, handle: &str, module_dir: &Path, download: F) -> Result<PathBuf>
    where
        F: FnOnce(String, PathBuf) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let paths = CachePaths::for_module_dir(module_dir)?;
        let identity = LockIdentity::generate();
        let contents = identity.contents();
        let mut download = Some(download);
        let mut phase = Phase::CheckFast;

        loop {
            phase = match phase {
                Phase::CheckFast => {
                    if self.storage.exists(paths.module_dir()).await? {
                        return Ok(paths.module_dir().to_path_buf());
                    }
                    if let Some(parent) = paths.module_dir().parent() {
                        self.storage.create_dir_all(parent).await?;
                    }
                    Phase::TryLock
                }

                Phase::TryLock => {
                    match self
                        .storage
                        .write_atomic(paths.lock_file(), &contents, false)
                        .await
                    {
                        Ok(()) => {
                            let guard = LockGuard::new(
                                Arc::clone(&self.storage),
                                paths.lock_file().to_path_buf(),
                                paths.temp_dir(identity.task_uid()),
                                contents.clone(),
                            );
                            // Another task may have published and unlocked since CheckFast.
                            match self.storage.exists(paths.module_dir()).await {
                                Ok(true) => Phase::Cleanup {
                                    guard,
                                    outcome: Ok(()),
                                },
                                Ok(false) => Phase::Download(guard),
                                Err(e) => Phase::Cleanup {
                                    guard,
                                    outcome: Err(e),
                                },
                            }
                        }
                        Err(e) if e.is_already_exists() => Phase::Wait,
                        Err(e) => return Err(e),
                    }
                }

                Phase::Wait => {
                    self.wait_for_lock_release(handle, paths.lock_file()).await?;
                    Phase::TryLock
                }

                Phase::Download(guard) => {
                    let outcome = match download.take() {
                        Some(download) => self.run_download(handle, &guard, download).await,
                        None => Err(Error::Other(
                            "download callback already consumed".to_string(),
                        )),
                    };
                    match outcome {
                        Ok(()) => Phase::Publish(guard),
                        Err(e) => Phase::Cleanup {
                            guard,
                            outcome: Err(e),
                        },
                    }
                }

                Phase::Publish(guard) => {
                    let outcome = self.publish(handle, &paths, &identity, &guard).await;
                    Phase::Cleanup { guard, outcome }
                }

                Phase::Cleanup { guard, outcome } => {
                    let released = guard.release().await;
                    return match (outcome, released) {
                        (Ok(()), Ok(())) => Ok(paths.module_dir().to_path_buf()),
                        (Ok(()), Err(e)) => Err(e),
                        (Err(e), Ok(())) => Err(e),
                        (Err(e), Err(cleanup)) => {
                            warn!(
                                handle = %handle,
                                error = %cleanup,
                                "cleanup failed after unsuccessful download"
                            );
                            Err(e)
                        }
                    };
                }
            };
        }
    }

    async fn run_download<F, Fut>(&self, handle: &str, guard: &LockGuard, download: F) -> Result<()>
    where
        F: FnOnce(String, PathBuf) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        info!(handle = %handle, "Downloading module");
        self.storage.create_dir_all(guard.temp_dir()).await?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!(handle = %handle, "Download cancelled");
                Err(Error::Cancelled)
            }
            result = download(handle.to_string(), guard.temp_dir().to_path_buf()) => result,
        }
    }

    async fn publish(
        &self,
        handle: &str,
        paths: &CachePaths,
        identity: &LockIdentity,
        guard: &LockGuard,
    ) -> Result<()> {
        if let Err(e) =
            descriptor::write_descriptor(self.storage.as_ref(), paths, handle, identity).await
        {
            warn!(handle = %handle, error = %e, "failed to write module descriptor");
        }

        match self
            .storage
            .rename_dir(guard.temp_dir(), paths.module_dir())
            .await
        {
            Ok(()) => {
                info!(handle = %handle, module_dir = %paths.module_dir().display(), "Downloaded module");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                warn!(
                    handle = %handle,
                    module_dir = %paths.module_dir().display(),
                    "Module already exists, keeping the published copy"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Block until the lock file is gone, reclaiming it if its holder looks dead
    async fn wait_for_lock_release(&self, handle: &str, lock_file: &Path) -> Result<()> {
        let module_dir = paths::module_dir_from_lock(lock_file)?;
        let mut tracker = StalenessTracker::new(self.lock.timeout, Instant::now());
        let mut polls: u64 = 0;

        while self.storage.exists(lock_file).await? {
            match self
                .inspect_holder(handle, lock_file, &module_dir, &mut tracker, polls)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_not_found() => {
                    debug!(lock = %lock_file.display(), "lock or temp dir vanished during check");
                }
                Err(e) => return Err(e),
            }
            polls += 1;
            self.pause().await?;
        }
        Ok(())
    }

    /// One poll of a held lock; returns true when the lock was reclaimed
    async fn inspect_holder(
        &self,
        handle: &str,
        lock_file: &Path,
        module_dir: &Path,
        tracker: &mut StalenessTracker,
        polls: u64,
    ) -> Result<bool> {
        let owner = self.storage.read_to_string(lock_file).await?;

        if polls % u64::from(self.lock.log_every_n.max(1)) == 0 {
            info!(handle = %handle, owner = %owner, "Module already being downloaded, waiting");
        }

        if !tracker.is_due(Instant::now()) {
            return Ok(false);
        }

        let holder_temp =
            paths::temp_dir_for(module_dir, paths::task_uid_from_lock_contents(&owner));
        let size = match self.storage.dir_size(&holder_temp).await {
            Ok(size) => size,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };
        let current = self.storage.read_to_string(lock_file).await?;

        match tracker.observe(Instant::now(), size, &current) {
            Observation::Abandoned => {
                warn!(
                    lock = %lock_file.display(),
                    owner = %current,
                    "Deleting lock file due to inactivity"
                );
                ignore_not_found(self.storage.remove_file(lock_file).await)?;
                Ok(true)
            }
            Observation::Progressing => {
                debug!(owner = %current, size, "lock holder made progress");
                Ok(false)
            }
            Observation::NotDue => Ok(false),
        }
    }

    async fn pause(&self) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.lock.poll_interval) => Ok(()),
        }
    }
}
