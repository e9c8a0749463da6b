//! Lock file identity and the scoped guard that releases it

use crate::error::{Result, ignore_not_found};
use crate::storage::Storage;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

const TEMP_REMOVAL_ATTEMPTS: u32 = 50;
const TEMP_REMOVAL_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Identity written into a lock file: `host.pid.task_uid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockIdentity {
    hostname: String,
    pid: u32,
    task_uid: String,
}

impl LockIdentity {
    /// Identity for a fresh download attempt of this process
    pub fn generate() -> Self {
        Self::new(hostname(), std::process::id(), new_task_uid())
    }

    /// Build an identity from its parts
    pub fn new(hostname: impl Into<String>, pid: u32, task_uid: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            task_uid: task_uid.into(),
        }
    }

    /// Host the attempt runs on
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Process id of the attempt
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Random uid correlating the lock with its temporary directory
    pub fn task_uid(&self) -> &str {
        &self.task_uid
    }

    /// Lock file contents for this identity
    pub fn contents(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.hostname, self.pid, self.task_uid)
    }
}

/// 32 random hex digits
pub fn new_task_uid() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Name of the local host, cached for the life of the process
pub fn hostname() -> String {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME
        .get_or_init(|| system_hostname().unwrap_or_else(|| "localhost".to_string()))
        .clone()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for writes of buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| !name.is_empty())
}

/// Release what one download attempt owns
///
/// Removes the attempt's temporary directory, then deletes the lock file only
/// if it still carries `contents`. "Not found" failures are swallowed; both
/// steps always run and the first real failure is returned.
pub(crate) async fn release_owned(
    storage: &dyn Storage,
    lock_file: &Path,
    temp_dir: &Path,
    contents: &str,
) -> Result<()> {
    let temp = remove_temp_dir(storage, temp_dir).await;
    let lock = release_lock_if_owned(storage, lock_file, contents).await;
    temp.and(lock)
}

/// Remove a temp dir that an unpacker may still be winding down in
///
/// Entries created while the tree is being removed make the final rmdir fail
/// with "directory not empty"; retry until the writer has stopped.
async fn remove_temp_dir(storage: &dyn Storage, temp_dir: &Path) -> Result<()> {
    let mut attempt = 1;
    loop {
        match ignore_not_found(storage.remove_dir_all(temp_dir).await) {
            Err(e)
                if e.io_kind() == Some(io::ErrorKind::DirectoryNotEmpty)
                    && attempt < TEMP_REMOVAL_ATTEMPTS =>
            {
                debug!(
                    temp_dir = %temp_dir.display(),
                    attempt,
                    "temp dir still being written, retrying removal"
                );
                attempt += 1;
                tokio::time::sleep(TEMP_REMOVAL_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

async fn release_lock_if_owned(storage: &dyn Storage, lock_file: &Path, contents: &str) -> Result<()> {
    let current = match storage.read_to_string(lock_file).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    if current != contents {
        debug!(
            lock = %lock_file.display(),
            owner = %current,
            "lock now owned by another task, leaving it in place"
        );
        return Ok(());
    }

    ignore_not_found(storage.remove_file(lock_file).await)
}

/// Scoped ownership of a lock file and its temporary directory
///
/// Call [`LockGuard::release`] on every normal exit path. If the guard is
/// dropped instead (the owning future was cancelled), the same cleanup is
/// spawned on the current Tokio runtime. Without a runtime nothing can be
/// cleaned up and the lock is left for staleness reclamation.
pub(crate) struct LockGuard {
    storage: Arc<dyn Storage>,
    lock_file: PathBuf,
    temp_dir: PathBuf,
    contents: String,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        lock_file: PathBuf,
        temp_dir: PathBuf,
        contents: String,
    ) -> Self {
        Self {
            storage,
            lock_file,
            temp_dir,
            contents,
            released: false,
        }
    }

    pub(crate) fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Remove the temporary directory and release the lock if still owned
    pub(crate) async fn release(mut self) -> Result<()> {
        let result = release_owned(
            self.storage.as_ref(),
            &self.lock_file,
            &self.temp_dir,
            &self.contents,
        )
        .await;
        self.released = true;
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                lock = %self.lock_file.display(),
                "no runtime to release lock on drop, leaving it for staleness reclamation"
            );
            return;
        };

        let storage = Arc::clone(&self.storage);
        let lock_file = std::mem::take(&mut self.lock_file);
        let temp_dir = std::mem::take(&mut self.temp_dir);
        let contents = std::mem::take(&mut self.contents);

        handle.spawn(async move {
            if let Err(e) = release_owned(storage.as_ref(), &lock_file, &temp_dir, &contents).await {
                warn!(
                    lock = %lock_file.display(),
                    error = %e,
                    "failed to clean up after cancelled download"
                );
            }
        });
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::{EntryInfo, LocalStorage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Reports "directory not empty" for the first few removals, like a tree
    /// that is still being written to
    struct BusyTempStorage {
        inner: LocalStorage,
        busy_removals: AtomicU32,
    }

    #[async_trait]
    impl Storage for BusyTempStorage {
        async fn exists(&self, path: &Path) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn read_to_string(&self, path: &Path) -> Result<String> {
            self.inner.read_to_string(path).await
        }

        async fn write_atomic(&self, path: &Path, contents: &str, overwrite: bool) -> Result<()> {
            self.inner.write_atomic(path, contents, overwrite).await
        }

        async fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.inner.create_dir_all(path).await
        }

        async fn remove_file(&self, path: &Path) -> Result<()> {
            self.inner.remove_file(path).await
        }

        async fn remove_dir_all(&self, path: &Path) -> Result<()> {
            let busy = self
                .busy_removals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if busy {
                return Err(Error::storage(
                    "remove_dir_all",
                    path,
                    io::Error::from(io::ErrorKind::DirectoryNotEmpty),
                ));
            }
            self.inner.remove_dir_all(path).await
        }

        async fn rename_dir(&self, from: &Path, to: &Path) -> Result<()> {
            self.inner.rename_dir(from, to).await
        }

        async fn list_dir(&self, path: &Path) -> Result<Vec<EntryInfo>> {
            self.inner.list_dir(path).await
        }

        fn name(&self) -> &'static str {
            "busy-temp"
        }
    }

    #[test]
    fn test_identity_format() {
        let identity = LockIdentity::new("worker.example", 4242, "abc123");
        assert_eq!(identity.contents(), "worker.example.4242.abc123");
        assert_eq!(
            crate::cache::paths::task_uid_from_lock_contents(&identity.contents()),
            "abc123"
        );
    }

    #[test]
    fn test_generated_identities_are_unique() {
        let a = LockIdentity::generate();
        let b = LockIdentity::generate();
        assert_ne!(a.task_uid(), b.task_uid());
        assert_eq!(a.task_uid().len(), 32);
        assert!(a.task_uid().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.pid(), std::process::id());
        assert!(!a.hostname().is_empty());
    }

    #[tokio::test]
    async fn test_release_removes_own_lock_and_temp_dir() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("m.lock");
        let tmp_dir = temp.path().join("m.uid.tmp");
        std::fs::write(&lock, "me.1.uid").unwrap();
        std::fs::create_dir_all(tmp_dir.join("nested")).unwrap();

        release_owned(&LocalStorage, &lock, &tmp_dir, "me.1.uid")
            .await
            .unwrap();

        assert!(!lock.exists());
        assert!(!tmp_dir.exists());
    }

    #[tokio::test]
    async fn test_release_retries_temp_dir_still_being_written() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("m.lock");
        let tmp_dir = temp.path().join("m.uid.tmp");
        std::fs::write(&lock, "me.1.uid").unwrap();
        std::fs::create_dir_all(tmp_dir.join("variables")).unwrap();
        let storage = BusyTempStorage {
            inner: LocalStorage,
            busy_removals: AtomicU32::new(3),
        };

        release_owned(&storage, &lock, &tmp_dir, "me.1.uid")
            .await
            .unwrap();

        assert!(!tmp_dir.exists());
        assert!(!lock.exists());
        assert_eq!(storage.busy_removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_release_gives_up_on_a_temp_dir_that_never_settles() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("m.lock");
        let tmp_dir = temp.path().join("m.uid.tmp");
        std::fs::write(&lock, "me.1.uid").unwrap();
        std::fs::create_dir(&tmp_dir).unwrap();
        let storage = BusyTempStorage {
            inner: LocalStorage,
            busy_removals: AtomicU32::new(u32::MAX),
        };

        let err = release_owned(&storage, &lock, &tmp_dir, "me.1.uid")
            .await
            .unwrap_err();

        assert_eq!(err.io_kind(), Some(io::ErrorKind::DirectoryNotEmpty));
        assert!(!lock.exists(), "lock released even when the temp dir is stuck");
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_lock() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("m.lock");
        std::fs::write(&lock, "other.2.theirs").unwrap();

        release_owned(&LocalStorage, &lock, &temp.path().join("m.mine.tmp"), "me.1.mine")
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&lock).unwrap(), "other.2.theirs");
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_files() {
        let temp = TempDir::new().unwrap();
        release_owned(
            &LocalStorage,
            &temp.path().join("m.lock"),
            &temp.path().join("m.x.tmp"),
            "me.1.x",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_cleans_up_in_background() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("m.lock");
        let tmp_dir = temp.path().join("m.uid.tmp");
        std::fs::write(&lock, "me.1.uid").unwrap();
        std::fs::create_dir(&tmp_dir).unwrap();

        let guard = LockGuard::new(
            Arc::new(LocalStorage),
            lock.clone(),
            tmp_dir.clone(),
            "me.1.uid".to_string(),
        );
        drop(guard);

        for _ in 0..100 {
            if !lock.exists() && !tmp_dir.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dropped guard did not release lock and temp dir");
    }
}
