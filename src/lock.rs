//! Exclusive single-instance lock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Held for the lifetime of a relay process; released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Try to become the only running relay.
    ///
    /// Returns `Ok(None)` when another process holds the lock. On success
    /// the lock file contains this process's pid.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` if the lock file cannot be created or the
    /// lock cannot be queried.
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Lock(format!("cannot create {}: {err}", parent.display()))
            })?;
        }

        // Opened without truncation so a holder's pid survives a failed attempt.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| AppError::Lock(format!("cannot open {}: {err}", path.display())))?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == ErrorKind::WouldBlock
                || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                debug!(path = %path.display(), "instance lock held elsewhere");
                return Ok(None);
            }
            return Err(AppError::Lock(format!(
                "cannot lock {}: {err}",
                path.display()
            )));
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|err| AppError::Lock(format!("cannot record pid: {err}")))?;

        info!(path = %path.display(), pid = std::process::id(), "instance lock acquired");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(%err, "failed to release instance lock");
        }
    }
}
