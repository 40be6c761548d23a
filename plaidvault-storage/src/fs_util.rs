//! Atomic file replacement and JSON helpers for the file store.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces `path` with `bytes` so that readers see the old or the new
/// content, never a partial write.
///
/// The data is written to a temp file in the same directory, flushed to
/// disk, then renamed over the target. Temp files are created with mode
/// 0600 on Unix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Corrupt(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;

    sync_dir(parent);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Makes the rename itself durable. The new content is already in place,
    // so a failure here is reported but not returned.
    let synced = std::fs::File::open(dir).and_then(|handle| handle.sync_all());
    if let Err(e) = synced {
        tracing::warn!(dir = %dir.display(), "directory fsync failed, rename may not survive a crash: {e}");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Reads and parses a JSON file. A missing file is `None`; an unparsable one
/// is [`StorageError::Corrupt`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))
}

pub fn read_text(path: &Path) -> StorageResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Returns whether the file existed.
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
