//! Session orchestration modules.
//!
//! Covers agent process spawning and supervision, hang detection, outcome
//! classification, the sleep/wake cycle, and the top-level relay loop.

pub mod classifier;
pub mod hang_detector;
pub mod relay;
pub mod scheduler;
pub mod spawner;
pub mod supervisor;
pub mod wake_cycle;

use std::future::Future;
use std::pin::Pin;

use crate::models::outcome::{LogOffset, RunOutcome};
use crate::Result;

use self::scheduler::SleepResult;

/// The agent process as seen by the relay loop and the wake cycle.
///
/// [`supervisor::SessionSupervisor`] is the production implementation.
pub trait AgentRunner: Send {
    /// Session currently bound.
    fn session_id(&self) -> &str;

    /// Bind to another session for subsequent launches.
    fn bind_session(&mut self, session_id: &str);

    /// Launch a new session with the base prompt.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`](crate::AppError::Config) when the prompt
    /// cannot be prepared, [`AppError::Spawn`](crate::AppError::Spawn) when
    /// the process cannot start, or
    /// [`AppError::Transport`](crate::AppError::Transport) when its input
    /// cannot be written.
    fn start_fresh(&mut self) -> Pin<Box<dyn Future<Output = Result<LogOffset>> + Send + '_>>;

    /// Relaunch the bound session with a follow-up message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) when the process
    /// cannot start, or [`AppError::Transport`](crate::AppError::Transport)
    /// when the message cannot be written.
    fn resume<'a>(
        &'a mut self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LogOffset>> + Send + 'a>>;

    /// Block until the launch ends and report how it went.
    fn monitor(&mut self, offset: LogOffset) -> Pin<Box<dyn Future<Output = RunOutcome> + Send + '_>>;

    /// Replace every embedded image in the session log; returns the count.
    fn strip_all_images(&mut self) -> usize;

    /// Whether the last agent turn ended with text output.
    fn ended_with_text(&self) -> bool;

    /// Whether the last agent answer was too brief to be decisive.
    fn last_output_is_idle(&self) -> bool;
}

/// Source of wake-ups while the agent sleeps.
///
/// [`scheduler::SleepWakeScheduler`] is the production implementation.
pub trait WakeSource: Send {
    /// Sleep until something should wake the agent or the budget runs out.
    fn auto_sleep_and_wake(&mut self) -> Pin<Box<dyn Future<Output = SleepResult> + Send + '_>>;
}
