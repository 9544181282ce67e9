//! Result of one monitored agent process launch.

/// Line offset into the shared diagnostic log, recorded before a launch so
/// that only output produced by that launch is scanned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogOffset(pub usize);

/// Immutable value returned by the supervisor's `monitor`.
///
/// Several flags may be set at once; the error classifier resolves them
/// with a fixed priority order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// Process exit code; negative signal number when killed by a signal.
    pub exit_code: i32,
    /// Killed after an error signature or prolonged session-log silence.
    pub hung: bool,
    /// Killed because the run budget expired.
    pub timed_out: bool,
    /// The session log did not grow at all during the launch.
    pub no_output: bool,
    /// The session log ends on a tool result (killed mid tool call).
    pub incomplete: bool,
    /// The API rejected the request as too large for the context window.
    pub context_too_large: bool,
    /// The API rejected an embedded image.
    pub bad_image: bool,
    /// The API reported a rate limit.
    pub rate_limited: bool,
    /// Context fill percentage after the launch.
    pub context_pct: f64,
}

impl RunOutcome {
    /// Outcome of a clean exit at the given context fill.
    #[must_use]
    pub fn clean(context_pct: f64) -> Self {
        Self {
            context_pct,
            ..Self::default()
        }
    }

    /// Whether the launch should be retried in place by a wake cycle.
    #[must_use]
    pub fn needs_wake_retry(&self) -> bool {
        self.incomplete || self.hung || self.no_output
    }
}
