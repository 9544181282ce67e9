//! Startup and shutdown housekeeping of relay-owned files.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

use crate::files;

/// Trim the diagnostic log once it exceeds `max_bytes`.
///
/// Keeps the last `truncate_bytes`, starting at the first complete line.
/// Returns whether the log was rotated; failures are logged.
pub fn rotate_log(path: &Path, max_bytes: u64, truncate_bytes: u64) -> bool {
    let size = files::len_or_zero(path);
    if size <= max_bytes {
        return false;
    }

    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(path = %path.display(), %err, "log rotation failed");
            return false;
        }
    };
    let keep = usize::try_from(truncate_bytes).unwrap_or(usize::MAX);
    let mut tail = &content[content.len().saturating_sub(keep)..];
    if let Some(pos) = tail.iter().position(|&b| b == b'\n') {
        if pos + 1 < tail.len() {
            tail = &tail[pos + 1..];
        }
    }

    match files::write_atomic(path, tail) {
        Ok(()) => {
            info!(path = %path.display(), was_bytes = size, "diagnostic log rotated");
            true
        }
        Err(err) => {
            warn!(%err, "log rotation failed");
            false
        }
    }
}

/// Remove the scalar context cache so a new session starts from zero.
pub fn cleanup_context_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "context cache cleared"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), %err, "failed to clear context cache"),
    }
}
