//! Fixed wall-clock budget for a relay run.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the run budget from process start.
///
/// Built on [`tokio::time::Instant`] so a paused test clock drives it.
#[derive(Debug, Clone, Copy)]
pub struct RunTimer {
    start: Instant,
    budget: Duration,
    successor_reserve: Duration,
}

impl RunTimer {
    /// Start a timer now.
    ///
    /// `successor_reserve` is the least remaining budget for which handing
    /// off to a fresh successor session is still worthwhile.
    #[must_use]
    pub fn new(budget: Duration, successor_reserve: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
            successor_reserve,
        }
    }

    /// Time since the run started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Budget left; never negative.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the budget is used up.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Whether enough budget is left to justify spawning a successor.
    #[must_use]
    pub fn has_successor_time(&self) -> bool {
        !self.is_expired() && self.remaining() >= self.successor_reserve
    }

    /// Poll interval for blocking loops: 1 s in the last minute, 5 s in the
    /// last five minutes, 30 s otherwise.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        let remaining = self.remaining();
        if remaining <= Duration::from_secs(60) {
            Duration::from_secs(1)
        } else if remaining <= Duration::from_secs(300) {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(30)
        }
    }
}
