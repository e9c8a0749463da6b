//! Error types for modcache
//!
//! A single [`Error`] enum covers every failure the cache can surface:
//! - Handles that no resolver understands ([`Error::UnsupportedHandle`])
//! - Storage failures with the operation and path that failed ([`Error::Storage`])
//! - Download failures raised by resolvers (network, HTTP status, broken archives)
//! - Cancellation of an in-flight resolution ([`Error::Cancelled`])
//!
//! Lock contention and publish races are never surfaced; the coordinator handles
//! them internally.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for modcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modcache
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cache_dir")
        key: Option<String>,
    },

    /// No resolver can map the handle to a module directory
    #[error("{message}")]
    UnsupportedHandle {
        /// The handle that could not be resolved
        handle: String,
        /// Full explanation, including supported formats when enabled
        message: String,
    },

    /// A storage capability call failed
    #[error("storage error during {operation} on {}: {source}", .path.display())]
    Storage {
        /// The storage operation that failed (e.g., "rename", "write")
        operation: &'static str,
        /// The path the operation was applied to
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} while fetching {url}")]
    Http {
        /// The requested URL
        url: String,
        /// HTTP status code of the response
        status: u16,
    },

    /// The downloaded content is not a usable module archive
    #[error("invalid module archive {handle}: {reason}")]
    InvalidArchive {
        /// The handle (or URL) the archive came from
        handle: String,
        /// Why the archive was rejected
        reason: String,
    },

    /// Download callback failure that does not fit another variant
    #[error("download error: {0}")]
    Download(String),

    /// Resolution was cancelled before it completed
    #[error("resolution cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an I/O error raised by a storage operation on `path`
    pub fn storage(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    /// The I/O error kind behind this error, if it came from the filesystem
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Storage { source, .. } => Some(source.kind()),
            Error::Io(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Whether the thing operated on was already gone
    ///
    /// Cleanup paths swallow these: a concurrent actor may have removed the
    /// file or directory first.
    pub fn is_not_found(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::NotFound)
    }

    /// Whether a create-if-absent write or a no-overwrite rename hit an existing target
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self.io_kind(),
            Some(io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty)
        )
    }
}

/// Turn "already gone" failures into success
pub(crate) fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
