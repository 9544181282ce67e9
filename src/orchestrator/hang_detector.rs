//! Hang and failure-signature detection.
//!
//! Two independent hang signals feed the supervisor's monitor loop:
//!
//! - an error line in the shared diagnostic log (checked on a fixed cadence
//!   once an initial delay has elapsed), and
//! - no growth of the session log for longer than the silence timeout.
//!
//! After a launch ends, [`TailSignatures::scan`] classifies the new
//! diagnostic output into the API rejections the classifier reacts to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::files;
use crate::models::outcome::LogOffset;

/// Line prefixes the agent CLI prints when an API call has failed for good.
pub const HANG_PREFIXES: &[&str] = &["No messages returned", "API Error"];

/// Substrings reporting a request larger than the context window.
pub const CONTEXT_TOO_LARGE_MARKERS: &[&str] = &["Request too large", "prompt is too long"];

/// Substrings reporting an image the API could not decode.
pub const BAD_IMAGE_MARKERS: &[&str] = &["Could not process image"];

/// Substrings reporting an API rate limit.
pub const RATE_LIMIT_MARKERS: &[&str] = &["rate_limit_error", "Rate limit reached"];

/// The shared append-only log receiving every child's stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    /// Wrap the log at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end of the log, in lines.
    #[must_use]
    pub fn offset(&self) -> LogOffset {
        LogOffset(
            files::read_lenient(&self.path).map_or(0, |text| text.lines().count()),
        )
    }

    /// Lines written after `offset`.
    #[must_use]
    pub fn lines_since(&self, offset: LogOffset) -> Vec<String> {
        files::read_lenient(&self.path)
            .map(|text| text.lines().skip(offset.0).map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Whether any line after `offset` starts with a hang signature.
    ///
    /// Only line starts count, so agent prose quoting the message does not
    /// trigger a kill.
    #[must_use]
    pub fn has_hang_signature(&self, offset: LogOffset) -> bool {
        self.lines_since(offset).iter().any(|line| {
            let line = line.trim();
            HANG_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
        })
    }
}

/// API rejections found in a launch's diagnostic output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailSignatures {
    /// Request exceeded the context window.
    pub context_too_large: bool,
    /// An image was rejected.
    pub bad_image: bool,
    /// Rate limited.
    pub rate_limited: bool,
}

impl TailSignatures {
    /// Scan diagnostic lines for rejection markers.
    #[must_use]
    pub fn scan(lines: &[String]) -> Self {
        let any = |markers: &[&str]| {
            lines
                .iter()
                .any(|line| markers.iter().any(|marker| line.contains(marker)))
        };
        Self {
            context_too_large: any(CONTEXT_TOO_LARGE_MARKERS),
            bad_image: any(BAD_IMAGE_MARKERS),
            rate_limited: any(RATE_LIMIT_MARKERS),
        }
    }
}

/// Why a launch was judged hung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangSignal {
    /// A hang signature appeared in the diagnostic log.
    ErrorPattern,
    /// The session log stopped growing for this long.
    Silence(Duration),
}

/// Per-launch hang detector, polled from the monitor loop.
#[derive(Debug)]
pub struct HangDetector {
    log: DiagnosticLog,
    offset: LogOffset,
    check_delay: Duration,
    silence_timeout: Duration,
    started: Instant,
    last_pattern_check: Duration,
    last_size: u64,
    last_activity: Instant,
}

impl HangDetector {
    /// Start tracking a launch whose diagnostic output begins at `offset`
    /// and whose session log was `initial_size` bytes at launch.
    #[must_use]
    pub fn new(
        log: DiagnosticLog,
        offset: LogOffset,
        initial_size: u64,
        check_delay: Duration,
        silence_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            log,
            offset,
            check_delay,
            silence_timeout,
            started: now,
            last_pattern_check: Duration::ZERO,
            last_size: initial_size,
            last_activity: now,
        }
    }

    /// Check both hang signals given the session log's current size.
    pub fn poll(&mut self, session_size: u64) -> Option<HangSignal> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.check_delay
            && elapsed.saturating_sub(self.last_pattern_check) >= self.check_delay
        {
            self.last_pattern_check = elapsed;
            if self.log.has_hang_signature(self.offset) {
                return Some(HangSignal::ErrorPattern);
            }
        }

        if session_size > self.last_size {
            self.last_size = session_size;
            self.last_activity = Instant::now();
            debug!(session_size, "session log grew");
        } else if self.last_activity.elapsed() > self.silence_timeout {
            return Some(HangSignal::Silence(self.silence_timeout));
        }

        None
    }
}
