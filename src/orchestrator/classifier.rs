//! Outcome classification.
//!
//! [`classify`] is a pure state machine over a [`RunOutcome`] and the
//! relay's [`LoopState`]. It mutates only the loop counters and session
//! bookkeeping, and describes every side effect (sleep, status, alert) in
//! the returned [`ErrorDirective`].
//!
//! Flags are evaluated as a strict priority chain; the first match wins:
//! hung, rate limited, no output, bad image, context too large, incomplete,
//! non-zero exit.

use crate::config::RetryConfig;
use crate::models::directive::{CrashNotice, ErrorDirective};
use crate::models::outcome::RunOutcome;
use crate::models::session::LoopState;
use crate::models::status::RelayStatus;

/// Upper bound of any backoff delay, in seconds.
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Resume reason after a hang.
pub const HUNG_RESUME_REASON: &str = "An API error was detected (no response or repeated failures). Please proceed with the original instructions.";

/// Resume reason after a fresh launch produced nothing.
pub const NO_OUTPUT_RESUME_REASON: &str =
    "Your previous session exited without output. Please proceed.";

/// Resume reason after the API rejected an image.
pub const BAD_IMAGE_RESUME_REASON: &str = "A screenshot was corrupted and the API rejected it. All images have been stripped from your history. Continue where you left off.";

/// Resume reason after the agent was killed mid tool call.
pub const CONTINUE_REASON: &str = "Continue where you left off.";

/// `min(base * 2^(attempt-1), 60)` seconds; attempt `0` is treated as `1`.
#[must_use]
pub fn backoff_delay(base_seconds: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    base_seconds
        .saturating_mul(1_u64 << exponent)
        .min(MAX_BACKOFF_SECONDS)
}

/// Decide how to react to `outcome`.
///
/// Returns `None` for a clean outcome; the caller then runs its
/// post-success policy and calls [`LoopState::reset_counters`].
pub fn classify(
    outcome: &RunOutcome,
    state: &mut LoopState,
    retry: &RetryConfig,
) -> Option<ErrorDirective> {
    if outcome.hung {
        state.establish(HUNG_RESUME_REASON);
        return Some(
            ErrorDirective::retry(15, "Hung, resuming...").with_status(RelayStatus::Crashed),
        );
    }

    if outcome.rate_limited {
        return Some(
            ErrorDirective::retry(60, "API rate limit, waiting 60s before retry")
                .with_status(RelayStatus::RateLimited),
        );
    }

    if outcome.no_output {
        state.no_output_count += 1;
        let count = state.no_output_count;
        if count > retry.max_incomplete_retries {
            return Some(ErrorDirective::give_up(
                CrashNotice {
                    count,
                    exit_code: 0,
                },
                format!("No output {count} times in a row, giving up"),
            ));
        }
        let delay = backoff_delay(retry.incomplete_base_delay_seconds, count);
        if state.is_established() {
            state.new_session();
            return Some(ErrorDirective::retry(
                delay,
                format!(
                    "Resume failed ({count}/{}), starting fresh...",
                    retry.max_incomplete_retries
                ),
            ));
        }
        state.establish(NO_OUTPUT_RESUME_REASON);
        return Some(ErrorDirective::retry(
            delay,
            format!(
                "No output ({count}/{}), retrying in {delay}s...",
                retry.max_incomplete_retries
            ),
        ));
    }

    if outcome.bad_image && !outcome.context_too_large {
        state.establish(BAD_IMAGE_RESUME_REASON);
        return Some(ErrorDirective::retry(
            5,
            "Corrupted image rejected, resuming with images stripped...",
        ));
    }

    if outcome.context_too_large {
        state.new_session();
        state.incomplete_count = 0;
        return Some(ErrorDirective::retry(
            5,
            "Context too large, starting fresh session...",
        ));
    }

    if outcome.incomplete {
        state.incomplete_count += 1;
        let count = state.incomplete_count;
        if count > retry.max_incomplete_retries {
            state.new_session();
            state.incomplete_count = 0;
            return Some(ErrorDirective::retry(
                15,
                format!("Incomplete {count} times, starting fresh session..."),
            ));
        }
        let delay = backoff_delay(retry.incomplete_base_delay_seconds, count);
        state.establish(CONTINUE_REASON);
        return Some(ErrorDirective::retry(
            delay,
            format!(
                "Exited mid tool call ({count}/{}), resuming in {delay}s...",
                retry.max_incomplete_retries
            ),
        ));
    }

    if outcome.exit_code != 0 {
        state.crash_count += 1;
        let count = state.crash_count;
        let exit_code = outcome.exit_code;
        if count > retry.max_retries {
            return Some(
                ErrorDirective::give_up(
                    CrashNotice { count, exit_code },
                    format!("Crashed {count} times (exit code {exit_code}), giving up"),
                )
                .with_status(RelayStatus::Crashed),
            );
        }
        state.new_session();
        return Some(
            ErrorDirective::retry(
                15,
                format!(
                    "Crashed with exit code {exit_code} ({count}/{}), restarting...",
                    retry.max_retries
                ),
            )
            .with_status(RelayStatus::Crashed),
        );
    }

    None
}
