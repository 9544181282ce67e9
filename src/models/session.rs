//! Session identity and the relay loop's mutable counters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logical conversation with the agent.
///
/// A session may span many process launches (resumes). It is abandoned,
/// never reused, whenever the relay decides to start fresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Opaque session identifier handed to the agent CLI.
    pub id: String,
    /// Workspace the agent runs in.
    pub workspace: PathBuf,
    /// `false` until a turn exists that can be resumed.
    pub established: bool,
}

impl Session {
    /// Construct a new, not-yet-established session with a generated id.
    #[must_use]
    pub fn fresh(workspace: &Path) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace: workspace.to_path_buf(),
            established: false,
        }
    }
}

/// Mutable counters owned by the relay orchestrator for the whole run.
///
/// Only the error classifier and the post-success policy mutate these;
/// their reset rules are part of those components' contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    /// Current session.
    pub session: Session,
    /// Message fed to the agent on the next resume.
    pub resume_reason: String,
    /// Consecutive generic crashes.
    pub crash_count: u32,
    /// Consecutive exits mid tool call.
    pub incomplete_count: u32,
    /// Consecutive idle resumes.
    pub idle_continuation_count: u32,
    /// Consecutive launches that wrote nothing to the session log.
    pub no_output_count: u32,
}

impl LoopState {
    /// Start the run with a fresh session in `workspace`.
    #[must_use]
    pub fn new(workspace: &Path) -> Self {
        Self {
            session: Session::fresh(workspace),
            resume_reason: String::new(),
            crash_count: 0,
            incomplete_count: 0,
            idle_continuation_count: 0,
            no_output_count: 0,
        }
    }

    /// Identifier of the current session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// Whether the next launch resumes rather than starting fresh.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.session.established
    }

    /// Mark the session resumable with the given follow-up instruction.
    pub fn establish(&mut self, resume_reason: impl Into<String>) {
        self.session.established = true;
        self.resume_reason = resume_reason.into();
    }

    /// Abandon the current session and start over from the base prompt.
    pub fn new_session(&mut self) {
        self.session = Session::fresh(&self.session.workspace);
        self.resume_reason.clear();
    }

    /// Reset error counters after a clean outcome.
    ///
    /// The idle continuation count is governed separately and survives.
    pub fn reset_counters(&mut self) {
        self.crash_count = 0;
        self.incomplete_count = 0;
        self.no_output_count = 0;
    }
}
