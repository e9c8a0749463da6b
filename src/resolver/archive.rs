//! Streaming tar / tar.gz unpacker
//!
//! Compression is detected from the gzip magic bytes rather than the file
//! name, since HTTP handles rarely carry a meaningful extension. Only regular
//! files and directories are extracted; links and device nodes are rejected.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tokio::io::AsyncRead;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Unpack an archive read from `reader` into `dest` on the blocking pool
///
/// `source` names the archive in error messages. Unpacking stops with
/// [`Error::Cancelled`] once `cancel` fires, and also when this future is
/// dropped before completion: the blocking task is not left writing into a
/// directory its caller is about to remove.
pub async fn unpack_async<R>(
    reader: R,
    dest: PathBuf,
    source: String,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stop = cancel.child_token();
    let _stop_on_drop = stop.clone().drop_guard();
    let bridge = SyncIoBridge::new(reader);
    let task = tokio::task::spawn_blocking(move || unpack(bridge, &dest, &source, &stop));
    match task.await {
        Ok(result) => result,
        Err(e) => Err(Error::Other(format!("archive unpacking task failed: {e}"))),
    }
}

/// Unpack a `.tar` or gzip-compressed tar stream into `dest`
///
/// `dest` must already exist.
pub fn unpack<R: Read>(
    mut reader: R,
    dest: &Path,
    source: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        match reader.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return Err(not_a_module(source)),
        }
    }

    let input = Cursor::new(magic[..filled].to_vec()).chain(reader);
    if filled == magic.len() && magic == GZIP_MAGIC {
        extract(Archive::new(GzDecoder::new(input)), dest, source, cancel)
    } else {
        extract(Archive::new(input), dest, source, cancel)
    }
}

fn extract<R: Read>(
    mut archive: Archive<R>,
    dest: &Path,
    source: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let entries = archive.entries().map_err(|_| not_a_module(source))?;
    let mut extracted = 0usize;

    for entry in entries {
        ensure_active(dest, cancel)?;
        let mut entry = entry.map_err(|_| not_a_module(source))?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
            continue;
        }

        let name = entry.path().map_err(|_| not_a_module(source))?.into_owned();
        let relative = contained_path(&name).ok_or_else(|| {
            invalid(source, "Module archive contains files outside its directory")
        })?;
        let target = dest.join(&relative);

        if kind.is_dir() {
            create_dirs_below(dest, &relative)?;
        } else if kind.is_file() {
            if relative.as_os_str().is_empty() {
                return Err(invalid(source, "Module archive contains files outside its directory"));
            }
            if let Some(parent) = relative.parent() {
                create_dirs_below(dest, parent)?;
            }
            copy_entry(&mut entry, &target, source, dest, cancel)?;
        } else {
            return Err(invalid(
                source,
                &format!("Unexpected object type in tar archive: {:?}", kind),
            ));
        }
        extracted += 1;
    }

    if extracted == 0 {
        return Err(not_a_module(source));
    }
    Ok(())
}

fn copy_entry(
    entry: &mut impl Read,
    target: &Path,
    source: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut file = File::create(target).map_err(|e| Error::storage("create", target, e))?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Err(not_a_module(source)),
        };
        file.write_all(&buf[..n])
            .map_err(|e| Error::storage("write", target, e))?;
        ensure_active(dest, cancel)?;
    }
    Ok(())
}

/// Create `relative` below `dest` one component at a time
///
/// `dest` itself is never created, so a destination removed by cleanup stays gone.
fn create_dirs_below(dest: &Path, relative: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => {}
            Err(e) => return Err(Error::storage("create_dir", &current, e)),
        }
    }
    Ok(())
}

/// Stop once the caller gave up, so a cleaned-up temp dir is never recreated
fn ensure_active(dest: &Path, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if !dest.is_dir() {
        return Err(Error::Other(format!(
            "unpack destination {} disappeared",
            dest.display()
        )));
    }
    Ok(())
}

/// `name` relative to the archive root, or None if it would escape it
///
/// A leading `/` is dropped, as are `.` components.
fn contained_path(name: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => relative.push(part),
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

fn invalid(source: &str, reason: &str) -> Error {
    Error::InvalidArchive {
        handle: source.to_string(),
        reason: reason.to_string(),
    }
}

fn not_a_module(source: &str) -> Error {
    invalid(source, &format!("{source} does not appear to be a valid module."))
}
