//! Lenient reads of files shared with other processes.
//!
//! The diagnostic log, session log, notification cache, and context cache
//! all have a single external writer and may be missing, empty, or
//! half-written at any moment. Every read goes through these helpers,
//! which map any failure to "absent" and record the cause at `debug`.
//!
//! Files the relay itself owns are replaced with [`write_atomic`] so a
//! concurrent reader never sees a partial write.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{AppError, Result};

/// Read a file to a string, or `None` if it is missing or unreadable.
#[must_use]
pub fn read_lenient(path: &Path) -> Option<String> {
    read_bytes_lenient(path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Read a file's raw bytes, or `None` if it is missing or unreadable.
#[must_use]
pub fn read_bytes_lenient(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            debug!(path = %path.display(), %err, "treating unreadable file as absent");
            None
        }
    }
}

/// Current length of a file in bytes; `0` when it does not exist.
#[must_use]
pub fn len_or_zero(path: &Path) -> u64 {
    fs::metadata(path).map_or(0, |meta| meta.len())
}

/// Age of a file's last modification, or `None` if it cannot be stat'ed.
///
/// A modification time in the future counts as age zero.
#[must_use]
pub fn modified_age(path: &Path) -> Option<Duration> {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(time) => time,
        Err(err) => {
            debug!(path = %path.display(), %err, "no modification time");
            return None;
        }
    };
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

/// Replace the file at `path` with `content`.
///
/// Creates parent directories, writes a temporary file next to the target,
/// then atomically renames (`persist`) it over the target.
///
/// # Errors
///
/// Returns `AppError::Io` on directory creation, temp file write, or
/// rename failure.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(content)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist file to {}: {err}", path.display()))
    })?;
    Ok(())
}
