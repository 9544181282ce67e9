//! Sleep/wake cycle.
//!
//! Between tasks the agent sleeps until a notification arrives, then is
//! resumed with the formatted wake message. Hangs, incomplete turns, and
//! silent launches are retried in place with exponential backoff; the
//! cycle returns to the relay loop only when the session can no longer
//! continue (context too large, or filled past the spawn threshold).

use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};

use super::classifier::backoff_delay;
use super::{AgentRunner, WakeSource};
use crate::config::RetryConfig;
use crate::models::outcome::RunOutcome;
use crate::timer::RunTimer;

/// Settle time between a wake (or crash) and the resume.
const SETTLE: Duration = Duration::from_secs(3);

/// Pause before retrying a wake whose resume could not be delivered.
const RESUME_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Resume message after a hang during a wake cycle.
pub const HUNG_WAKE_MESSAGE: &str = "An API error was detected. Continue where you left off.";

/// Resume message after an incomplete or silent launch during a wake cycle.
pub const CONTINUE_WAKE_MESSAGE: &str = "Continue where you left off.";

/// Resume message after stripping every image.
pub const IMAGES_STRIPPED_MESSAGE: &str =
    "A screenshot was corrupted. All images stripped. Continue.";

/// Resume message after a crash during a wake cycle.
pub const CRASH_WAKE_MESSAGE: &str = "You crashed and were resumed. Continue where you left off.";

fn retry_kind(outcome: &RunOutcome) -> &'static str {
    if outcome.hung {
        "hung"
    } else if outcome.incomplete {
        "incomplete"
    } else {
        "no output"
    }
}

/// Run sleep/wake iterations until the session must be replaced.
///
/// Returns the final outcome when the orchestrator should spawn a fresh
/// session, or `None` when the budget ran out (or the wake source gave up).
pub async fn run_wake_cycle<R, W>(
    runner: &mut R,
    wake: &mut W,
    timer: &RunTimer,
    retry: &RetryConfig,
    threshold_pct: f64,
) -> Option<RunOutcome>
where
    R: AgentRunner + ?Sized,
    W: WakeSource + ?Sized,
{
    let span = info_span!("wake_cycle", session_id = %runner.session_id());
    wake_cycle_inner(runner, wake, timer, retry, threshold_pct)
        .instrument(span)
        .await
}

async fn wake_cycle_inner<R, W>(
    runner: &mut R,
    wake: &mut W,
    timer: &RunTimer,
    retry: &RetryConfig,
    threshold_pct: f64,
) -> Option<RunOutcome>
where
    R: AgentRunner + ?Sized,
    W: WakeSource + ?Sized,
{
    let max = retry.max_incomplete_retries;
    let mut resume_failures = 0_u32;

    loop {
        let woke = wake.auto_sleep_and_wake().await;
        if !woke.woken {
            return None;
        }
        tokio::time::sleep(SETTLE).await;

        let offset = match runner.resume(&woke.wake_message).await {
            Ok(offset) => offset,
            Err(err) => {
                resume_failures += 1;
                if resume_failures > max {
                    warn!(%err, resume_failures, "resume failed too many times, leaving wake cycle");
                    return None;
                }
                warn!(%err, resume_failures, max, "resume failed on wake, sleeping again");
                tokio::time::sleep(RESUME_RETRY_PAUSE).await;
                continue;
            }
        };
        let mut outcome = runner.monitor(offset).await;
        if outcome.timed_out {
            return None;
        }

        let mut attempts = 0_u32;
        while outcome.needs_wake_retry() {
            if timer.is_expired() {
                return None;
            }
            attempts += 1;
            if attempts > max {
                warn!(attempts, "too many wake retries, giving up on this wake");
                break;
            }
            let delay = backoff_delay(retry.incomplete_base_delay_seconds, attempts);
            let message = if outcome.hung {
                HUNG_WAKE_MESSAGE
            } else {
                CONTINUE_WAKE_MESSAGE
            };
            info!(
                kind = retry_kind(&outcome),
                attempts,
                max,
                delay_secs = delay,
                "retrying during wake"
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;

            let offset = match runner.resume(message).await {
                Ok(offset) => offset,
                Err(err) => {
                    warn!(%err, "resume failed in wake retry");
                    break;
                }
            };
            outcome = runner.monitor(offset).await;
            if outcome.timed_out {
                return None;
            }
        }

        if outcome.bad_image && !outcome.context_too_large {
            let stripped = runner.strip_all_images();
            info!(stripped, "bad image during wake, stripped all images");
            tokio::time::sleep(SETTLE).await;
            match runner.resume(IMAGES_STRIPPED_MESSAGE).await {
                Ok(offset) => outcome = runner.monitor(offset).await,
                Err(err) => {
                    warn!(%err, "resume after image strip failed");
                    return Some(outcome);
                }
            }
        }

        if outcome.context_too_large {
            info!("request too large, returning for a fresh session");
            return Some(outcome);
        }

        if outcome.exit_code != 0 {
            info!(exit_code = outcome.exit_code, "crashed during wake, resuming");
            tokio::time::sleep(SETTLE).await;
            match runner.resume(CRASH_WAKE_MESSAGE).await {
                Ok(offset) => outcome = runner.monitor(offset).await,
                Err(err) => warn!(%err, "resume after wake crash failed"),
            }
        }

        if outcome.context_pct >= threshold_pct {
            return Some(outcome);
        }
    }
}
