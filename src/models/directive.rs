//! Side-effect directives produced by the error classifier.

use std::time::Duration;

use super::status::RelayStatus;

/// What the relay loop does after applying a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run another loop iteration.
    Continue,
    /// Give up and finish the run.
    Break,
}

/// Arguments for a crash alert: how many failures, and the last exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashNotice {
    /// Consecutive failures counted so far.
    pub count: u32,
    /// Exit code of the last failure (`0` for no-output exits).
    pub exit_code: i32,
}

/// The only channel through which the classifier causes side effects.
///
/// The classifier performs none itself; the orchestrator logs, publishes
/// the status, alerts, and sleeps as directed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDirective {
    /// Continue or give up.
    pub action: Action,
    /// Pause before the next iteration.
    pub delay_seconds: u64,
    /// Status to publish, if any.
    pub status: Option<RelayStatus>,
    /// Human-readable log line.
    pub log_message: String,
    /// Alert to raise, if any.
    pub notify: Option<CrashNotice>,
}

impl ErrorDirective {
    /// Continue after `delay_seconds`.
    #[must_use]
    pub fn retry(delay_seconds: u64, log_message: impl Into<String>) -> Self {
        Self {
            action: Action::Continue,
            delay_seconds,
            status: None,
            log_message: log_message.into(),
            notify: None,
        }
    }

    /// Give up, raising a crash alert.
    #[must_use]
    pub fn give_up(notice: CrashNotice, log_message: impl Into<String>) -> Self {
        Self {
            action: Action::Break,
            delay_seconds: 0,
            status: None,
            log_message: log_message.into(),
            notify: Some(notice),
        }
    }

    /// Attach a status label.
    #[must_use]
    pub fn with_status(mut self, status: RelayStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether an alert should be raised.
    #[must_use]
    pub fn should_notify(&self) -> bool {
        self.notify.is_some()
    }

    /// Delay as a [`Duration`].
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}
