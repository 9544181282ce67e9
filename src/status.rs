//! Status side-channel for external observers.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::files;
use crate::models::status::RelayStatus;

/// Document written to the status file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusDocument {
    /// Current relay state.
    pub status: RelayStatus,
    /// RFC 3339 timestamp of the transition.
    pub updated: String,
    /// Session being supervised, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Goal extracted from the handoff document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

/// Overwrites the status file on every state transition.
///
/// Writes are atomic and best-effort: a failure is logged and the relay
/// carries on.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: PathBuf,
}

impl StatusWriter {
    /// Publish to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the status file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish `status`.
    pub fn set(&self, status: RelayStatus, session_id: Option<&str>, goal: Option<&str>) {
        let doc = StatusDocument {
            status,
            updated: Utc::now().to_rfc3339(),
            session_id: session_id.map(str::to_owned),
            goal: goal.map(str::to_owned),
        };
        let body = match serde_json::to_vec(&doc) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "failed to serialize status");
                return;
            }
        };
        match files::write_atomic(&self.path, &body) {
            Ok(()) => debug!(%status, "status published"),
            Err(err) => warn!(%err, %status, "failed to publish status"),
        }
    }

    /// Read back the last published document.
    #[must_use]
    pub fn read(&self) -> Option<StatusDocument> {
        serde_json::from_str(&files::read_lenient(&self.path)?).ok()
    }
}
