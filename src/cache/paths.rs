//! On-disk layout around a module directory
//!
//! | Path | Meaning |
//! |---|---|
//! | `<module_dir>` | Published module content |
//! | `<module_dir>.lock` | Ownership marker, content `host.pid.task_uid` |
//! | `<module_dir>.<task_uid>.tmp` | Private staging area of one download attempt |
//! | `<module_dir>.descriptor.txt` | Informational provenance file |

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const LOCK_SUFFIX: &str = ".lock";
const TEMP_SUFFIX: &str = ".tmp";
const DESCRIPTOR_SUFFIX: &str = ".descriptor.txt";

/// Paths derived from one module directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    module_dir: PathBuf,
    lock_file: PathBuf,
    descriptor_file: PathBuf,
}

impl CachePaths {
    /// Derive the layout for `module_dir`, made absolute against the current directory
    pub fn for_module_dir(module_dir: &Path) -> Result<Self> {
        let module_dir =
            std::path::absolute(module_dir).map_err(|e| Error::storage("absolute", module_dir, e))?;
        Ok(Self {
            lock_file: with_suffix(&module_dir, LOCK_SUFFIX),
            descriptor_file: with_suffix(&module_dir, DESCRIPTOR_SUFFIX),
            module_dir,
        })
    }

    /// The final, published module directory
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// `<module_dir>.lock`
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// `<module_dir>.descriptor.txt`
    pub fn descriptor_file(&self) -> &Path {
        &self.descriptor_file
    }

    /// `<module_dir>.<task_uid>.tmp`
    pub fn temp_dir(&self, task_uid: &str) -> PathBuf {
        temp_dir_for(&self.module_dir, task_uid)
    }
}

/// `<module_dir>.<task_uid>.tmp`
pub fn temp_dir_for(module_dir: &Path, task_uid: &str) -> PathBuf {
    with_suffix(module_dir, &format!(".{task_uid}{TEMP_SUFFIX}"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Recover the module directory from its lock file path
///
/// # Errors
///
/// Returns an error if `lock_file` does not end with `.lock`.
pub fn module_dir_from_lock(lock_file: &Path) -> Result<PathBuf> {
    lock_file
        .to_str()
        .and_then(|s| s.strip_suffix(LOCK_SUFFIX))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::Other(format!(
                "lock file name ({}) has to end with {}",
                lock_file.display(),
                LOCK_SUFFIX
            ))
        })
}

/// Task uid recorded in lock file contents (`host.pid.task_uid`)
///
/// Hostnames may contain dots, so the uid is whatever follows the last one.
pub fn task_uid_from_lock_contents(contents: &str) -> &str {
    contents
        .trim()
        .rsplit_once('.')
        .map_or(contents.trim(), |(_, uid)| uid)
}

/// Deterministic directory name for a handle (hex SHA-256)
pub fn module_dir_name(handle: &str) -> String {
    format!("{:x}", Sha256::digest(handle.as_bytes()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_sibling_of_module_dir() {
        let paths = CachePaths::for_module_dir(Path::new("/cache/abc")).unwrap();
        assert_eq!(paths.module_dir(), Path::new("/cache/abc"));
        assert_eq!(paths.lock_file(), Path::new("/cache/abc.lock"));
        assert_eq!(
            paths.descriptor_file(),
            Path::new("/cache/abc.descriptor.txt")
        );
        assert_eq!(paths.temp_dir("f00d"), PathBuf::from("/cache/abc.f00d.tmp"));
    }

    #[test]
    fn test_relative_module_dir_made_absolute() {
        let paths = CachePaths::for_module_dir(Path::new("modules/abc")).unwrap();
        assert!(paths.module_dir().is_absolute());
        assert!(paths.lock_file().is_absolute());
        assert!(paths.module_dir().ends_with("modules/abc"));
    }

    #[test]
    fn test_module_dir_from_lock_round_trips() {
        let paths = CachePaths::for_module_dir(Path::new("/cache/abc")).unwrap();
        assert_eq!(
            module_dir_from_lock(paths.lock_file()).unwrap(),
            paths.module_dir()
        );
    }

    #[test]
    fn test_holder_temp_dir_derived_from_lock_file() {
        let paths = CachePaths::for_module_dir(Path::new("/cache/abc")).unwrap();
        let module_dir = module_dir_from_lock(paths.lock_file()).unwrap();
        assert_eq!(temp_dir_for(&module_dir, "f00d"), paths.temp_dir("f00d"));
    }

    #[test]
    fn test_module_dir_from_lock_rejects_other_names() {
        assert!(module_dir_from_lock(Path::new("/cache/abc.descriptor.txt")).is_err());
        assert!(module_dir_from_lock(Path::new(".lock")).is_err());
    }

    #[test]
    fn test_task_uid_survives_dotted_hostnames() {
        assert_eq!(
            task_uid_from_lock_contents("worker-3.cluster.local.4242.9f86d081"),
            "9f86d081"
        );
        assert_eq!(task_uid_from_lock_contents("host.1.abc\n"), "abc");
        assert_eq!(task_uid_from_lock_contents("nodots"), "nodots");
        assert_eq!(task_uid_from_lock_contents(""), "");
    }

    #[test]
    fn test_module_dir_name_is_stable_hex() {
        let name = module_dir_name("https://example.com/models/mobilenet/1");
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, module_dir_name("https://example.com/models/mobilenet/1"));
        assert_ne!(name, module_dir_name("https://example.com/models/mobilenet/2"));
    }
}
