//! Top-level relay loop.
//!
//! Launches (or resumes) the agent, classifies each outcome, applies the
//! resulting directive, and after a clean turn decides between a successor
//! session, another idle continuation, and the sleep/wake cycle. Runs
//! until the budget is spent or the classifier gives up.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use super::classifier::classify;
use super::scheduler::{HttpAcknowledger, SleepWakeScheduler};
use super::supervisor::SessionSupervisor;
use super::wake_cycle::run_wake_cycle;
use super::{AgentRunner, WakeSource};
use crate::alerts::Alerter;
use crate::config::{ContextConfig, GlobalConfig, RetryConfig};
use crate::handoff;
use crate::housekeeping;
use crate::models::directive::{Action, ErrorDirective};
use crate::models::outcome::RunOutcome;
use crate::models::session::LoopState;
use crate::models::status::RelayStatus;
use crate::status::StatusWriter;
use crate::timer::RunTimer;
use crate::{AppError, Result};

/// Settle time after spawning a successor.
const SUCCESSOR_SETTLE: Duration = Duration::from_secs(3);

/// Pause before resuming a turn that ended without text.
const NO_TEXT_PAUSE: Duration = Duration::from_secs(2);

/// Exit code recorded when the agent's input could not be written.
pub const INPUT_FAILURE_EXIT_CODE: i32 = -1;

/// What to do after a clean outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PostSuccess {
    /// Context is full and time remains: start a successor session.
    SpawnSuccessor,
    /// The agent went idle early: resume it with this instruction.
    ContinueIdle(String),
    /// Enter the sleep/wake cycle.
    Sleep,
}

/// Idle/successor policy applied after a clean outcome.
///
/// Updates only `state.idle_continuation_count`: it grows with each idle
/// turn below the threshold, and drops to zero on any other turn or once
/// it exceeds the configured maximum.
pub fn post_success_policy(
    context_pct: f64,
    has_successor_time: bool,
    last_output_idle: bool,
    state: &mut LoopState,
    retry: &RetryConfig,
    context: &ContextConfig,
) -> PostSuccess {
    if context_pct >= context.threshold_pct && has_successor_time {
        return PostSuccess::SpawnSuccessor;
    }

    if context_pct < context.threshold_pct && last_output_idle {
        state.idle_continuation_count += 1;
        if state.idle_continuation_count <= retry.max_idle_continuations {
            return PostSuccess::ContinueIdle(format!(
                "Context at {context_pct:.0}% \u{2014} keep doing useful work until {:.0}%, then write your handoff.",
                context.handoff_target_pct
            ));
        }
        info!(
            idle_count = state.idle_continuation_count,
            "idle output too many times in a row, going to sleep"
        );
    }

    state.idle_continuation_count = 0;
    PostSuccess::Sleep
}

/// Message resuming a turn that ended on tool calls only.
#[must_use]
pub fn no_text_resume_reason(silence_timeout_seconds: u64) -> String {
    format!(
        "Your previous API call failed after {silence_timeout_seconds} seconds. Please proceed with the original instructions."
    )
}

/// Drives the agent for the whole run.
pub struct RelayOrchestrator<R, W> {
    config: Arc<GlobalConfig>,
    timer: RunTimer,
    state: LoopState,
    runner: R,
    wake: W,
    status: StatusWriter,
    alerter: Alerter,
}

impl RelayOrchestrator<SessionSupervisor, SleepWakeScheduler> {
    /// Wire the production supervisor and scheduler from configuration.
    ///
    /// The run budget starts now.
    #[must_use]
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let timer = RunTimer::new(
            Duration::from_secs(config.timing.run_budget_seconds),
            Duration::from_secs(config.timing.successor_reserve_seconds),
        );
        let state = LoopState::new(config.workspace_root());
        let status = StatusWriter::new(config.paths.status_file.clone());
        let runner = SessionSupervisor::new(Arc::clone(&config), timer, state.session_id());
        let wake = SleepWakeScheduler::from_config(
            &config,
            timer,
            status.clone(),
            Box::new(HttpAcknowledger::new(config.alerts.notifications_url.clone())),
        );
        let alerter = Alerter::new(config.alerts.clone());
        Self::new(config, timer, state, runner, wake, status, alerter)
    }
}

impl<R: AgentRunner, W: WakeSource> RelayOrchestrator<R, W> {
    /// Assemble an orchestrator from its parts.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        timer: RunTimer,
        state: LoopState,
        runner: R,
        wake: W,
        status: StatusWriter,
        alerter: Alerter,
    ) -> Self {
        Self {
            config,
            timer,
            state,
            runner,
            wake,
            status,
            alerter,
        }
    }

    /// Loop counters and current session.
    #[must_use]
    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// The agent runner.
    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run until the budget is spent or the classifier gives up.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the prompt cannot be prepared, or
    /// `AppError::Spawn`/`AppError::Io` if the agent cannot be launched.
    pub async fn run(&mut self) -> Result<()> {
        let span = info_span!(
            "relay_run",
            workspace = %self.config.workspace_root().display()
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<()> {
        housekeeping::cleanup_context_file(&self.config.paths.context_pct_file);
        self.runner.bind_session(self.state.session_id());
        info!(session_id = %self.state.session_id(), "starting relay run");

        while !self.timer.is_expired() {
            self.status
                .set(RelayStatus::Working, Some(self.state.session_id()), None);

            let outcome = self.launch_and_monitor().await?;
            if self.timer.is_expired() {
                break;
            }

            if let Some(directive) = classify(&outcome, &mut self.state, &self.config.retry) {
                let action = directive.action;
                self.apply(directive).await;
                match action {
                    Action::Continue => continue,
                    Action::Break => break,
                }
            }

            if !self.runner.ended_with_text() {
                info!("turn ended without text output, resuming");
                self.state.establish(no_text_resume_reason(
                    self.config.timing.silence_timeout_seconds,
                ));
                tokio::time::sleep(NO_TEXT_PAUSE).await;
                continue;
            }

            self.state.session.established = true;
            self.state.reset_counters();

            let idle = outcome.context_pct < self.config.context.threshold_pct
                && self.runner.last_output_is_idle();
            match post_success_policy(
                outcome.context_pct,
                self.timer.has_successor_time(),
                idle,
                &mut self.state,
                &self.config.retry,
                &self.config.context,
            ) {
                PostSuccess::SpawnSuccessor => {
                    self.spawn_successor(&format!(
                        "Context at {:.0}%, spawning successor",
                        outcome.context_pct
                    ))
                    .await;
                    continue;
                }
                PostSuccess::ContinueIdle(reason) => {
                    info!(
                        idle_count = self.state.idle_continuation_count,
                        "idle output, asking agent to keep working"
                    );
                    self.state.resume_reason = reason;
                    continue;
                }
                PostSuccess::Sleep => {}
            }

            let woke = run_wake_cycle(
                &mut self.runner,
                &mut self.wake,
                &self.timer,
                &self.config.retry,
                self.config.context.threshold_pct,
            )
            .await;
            match woke {
                Some(result) if result.context_too_large && !self.timer.is_expired() => {
                    self.spawn_successor("Request too large after wake").await;
                }
                Some(result)
                    if result.context_pct >= self.config.context.threshold_pct
                        && self.timer.has_successor_time() =>
                {
                    self.spawn_successor(&format!(
                        "Context at {:.0}% after wake",
                        result.context_pct
                    ))
                    .await;
                }
                _ => break,
            }
        }

        self.finish();
        Ok(())
    }

    /// Start or resume the agent and wait for the launch to end.
    ///
    /// An input stream failure is reported as a crash so the classifier's
    /// retry ceiling bounds it.
    async fn launch_and_monitor(&mut self) -> Result<RunOutcome> {
        let launched = if self.state.is_established() {
            let reason = self.state.resume_reason.clone();
            self.runner.resume(&reason).await
        } else {
            self.runner.start_fresh().await
        };

        match launched {
            Ok(offset) => Ok(self.runner.monitor(offset).await),
            Err(AppError::Transport(msg)) => {
                warn!(%msg, "could not hand input to agent, treating as crash");
                Ok(RunOutcome {
                    exit_code: INPUT_FAILURE_EXIT_CODE,
                    ..RunOutcome::default()
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Carry out a classifier directive.
    async fn apply(&mut self, directive: ErrorDirective) {
        match directive.action {
            Action::Continue => info!(
                delay_secs = directive.delay_seconds,
                "{}", directive.log_message
            ),
            Action::Break => error!("{}", directive.log_message),
        }
        if let Some(status) = directive.status {
            self.status.set(status, Some(self.state.session_id()), None);
        }
        if let Some(notice) = directive.notify {
            self.alerter
                .notify_crash(notice.count, notice.exit_code)
                .await;
        }
        if directive.delay_seconds > 0 {
            tokio::time::sleep(directive.delay()).await;
        }
        self.runner.bind_session(self.state.session_id());
    }

    /// Replace the session with a fresh successor.
    async fn spawn_successor(&mut self, reason: &str) {
        info!(
            remaining_min = self.timer.remaining().as_secs() / 60,
            "{reason}"
        );
        housekeeping::cleanup_context_file(&self.config.paths.context_pct_file);
        self.state.new_session();
        self.state.crash_count = 0;
        self.state.idle_continuation_count = 0;
        self.runner.bind_session(self.state.session_id());
        info!(session_id = %self.state.session_id(), "successor session");
        self.alerter
            .notify_lifecycle("successor spawned", reason)
            .await;
        tokio::time::sleep(SUCCESSOR_SETTLE).await;
    }

    /// Validate the handoff and publish the final status.
    fn finish(&self) {
        let goal = self
            .config
            .paths
            .handoff_file
            .as_deref()
            .and_then(handoff::validate_and_log);
        self.status.set(RelayStatus::Off, None, goal.as_deref());
        housekeeping::cleanup_context_file(&self.config.paths.context_pct_file);
        info!("relay run complete");
    }
}
