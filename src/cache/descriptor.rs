//! Provenance file written next to a published module
//!
//! Purely informational: nothing in the cache protocol reads it back.

use super::lock::LockIdentity;
use super::paths::CachePaths;
use crate::error::Result;
use crate::storage::Storage;
use chrono::{DateTime, Local};

/// Descriptor contents for a module fetched from `handle`
pub fn descriptor_contents(handle: &str, identity: &LockIdentity, at: DateTime<Local>) -> String {
    format!(
        "Module: {}\nDownload Time: {}\nDownloader Hostname: {} (PID:{})",
        handle,
        at.format("%Y-%m-%d %H:%M:%S%.6f"),
        identity.hostname(),
        identity.pid()
    )
}

/// Write the descriptor, replacing one left behind by a crashed downloader
pub(crate) async fn write_descriptor(
    storage: &dyn Storage,
    paths: &CachePaths,
    handle: &str,
    identity: &LockIdentity,
) -> Result<()> {
    let contents = descriptor_contents(handle, identity, Local::now());
    storage
        .write_atomic(paths.descriptor_file(), &contents, true)
        .await
}
