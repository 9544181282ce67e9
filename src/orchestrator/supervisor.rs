//! Agent process supervisor.
//!
//! Owns at most one agent child process at a time. `start_fresh` and
//! `resume` launch it; `monitor` blocks in a cooperative poll loop until the
//! child exits or is killed (budget expiry, hang), then derives the
//! [`RunOutcome`] from the session log and the new diagnostic output.

use std::future::Future;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tracing::{debug, info, info_span, warn, Instrument};

use super::hang_detector::{DiagnosticLog, HangDetector, TailSignatures};
use super::spawner::{spawn_agent, LaunchMode};
use super::AgentRunner;
use crate::config::GlobalConfig;
use crate::context_budget::ContextBudgetTracker;
use crate::models::outcome::{LogOffset, RunOutcome};
use crate::prompt::build_prompt;
use crate::session_log::SessionLog;
use crate::timer::RunTimer;
use crate::{AppError, Result};

/// Grace period after SIGTERM before escalating to SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Grace period after SIGKILL before abandoning the process handle.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// Time allowed for a process that outlived the monitor loop to exit.
const REAP_GRACE: Duration = Duration::from_secs(30);

/// Supervises the agent child process for the current session.
pub struct SessionSupervisor {
    config: Arc<GlobalConfig>,
    timer: RunTimer,
    session_id: String,
    child: Option<Child>,
    diagnostic: DiagnosticLog,
    context: ContextBudgetTracker,
    context_warning_sent: bool,
}

impl SessionSupervisor {
    /// Construct a supervisor bound to `session_id`.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, timer: RunTimer, session_id: impl Into<String>) -> Self {
        let diagnostic = DiagnosticLog::new(config.paths.diagnostic_log.clone());
        let context = ContextBudgetTracker::new(
            config.paths.context_pct_file.clone(),
            config.context.window_tokens,
        );
        Self {
            config,
            timer,
            session_id: session_id.into(),
            child: None,
            diagnostic,
            context,
            context_warning_sent: false,
        }
    }

    /// Rebind to another session (after the classifier starts fresh).
    pub fn bind_session(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
    }

    /// Session currently supervised.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Structured log of the current session.
    #[must_use]
    pub fn session_log(&self) -> SessionLog {
        SessionLog::locate(
            &self.config.paths.projects_dir,
            self.config.workspace_root(),
            &self.session_id,
        )
    }

    /// Current context fill percentage.
    #[must_use]
    pub fn context_fill(&self) -> f64 {
        self.context.fill_pct(&self.session_log())
    }

    /// Whether a child process is held (running or not yet reaped).
    #[must_use]
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Launch a new session, piping the prepared prompt to it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the prompt template is unreadable,
    /// `AppError::Spawn`/`AppError::Io` if the process cannot be launched,
    /// or `AppError::Transport` if the prompt cannot be written.
    pub async fn start_fresh(&mut self) -> Result<LogOffset> {
        self.terminate().await;
        self.context_warning_sent = false;
        let prompt = build_prompt(&self.config)?;
        let offset = self.diagnostic.offset();
        let mut child = spawn_agent(&self.config, &self.session_id, LaunchMode::Fresh)?;
        let fed = feed_stdin(&mut child, &prompt).await;
        self.child = Some(child);
        fed?;
        Ok(offset)
    }

    /// Relaunch the current session and hand it `message`.
    ///
    /// Any still-running prior process is terminated first, and old images
    /// are stripped from the session log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn`/`AppError::Io` if the process cannot be
    /// launched, or `AppError::Transport` if the message cannot be written.
    pub async fn resume(&mut self, message: &str) -> Result<LogOffset> {
        self.terminate().await;
        self.context_warning_sent = false;

        let stripped = self
            .session_log()
            .strip_old_images(self.config.context.keep_images);
        if stripped > 0 {
            info!(stripped, "stripped old screenshots from session log before resume");
        }

        let offset = self.diagnostic.offset();
        let mut child = spawn_agent(&self.config, &self.session_id, LaunchMode::Resume)?;
        let fed = feed_stdin(&mut child, message.as_bytes()).await;
        self.child = Some(child);
        if let Err(err) = &fed {
            warn!(%err, "could not write resume message");
        }
        fed?;
        Ok(offset)
    }

    /// Strip every embedded image from the current session log.
    #[must_use]
    pub fn strip_all_images(&self) -> usize {
        self.session_log().strip_all_images()
    }

    /// Block until the child exits or is killed, then report the outcome.
    pub async fn monitor(&mut self, offset: LogOffset) -> RunOutcome {
        let span = info_span!("monitor", session_id = %self.session_id);
        self.monitor_inner(offset).instrument(span).await
    }

    async fn monitor_inner(&mut self, offset: LogOffset) -> RunOutcome {
        let log = self.session_log();
        let initial_size = log.size();
        let mut detector = HangDetector::new(
            self.diagnostic.clone(),
            offset,
            initial_size,
            self.config.timing.hang_check_delay(),
            self.config.timing.silence_timeout(),
        );
        let mut hung = false;
        let mut timed_out = false;

        loop {
            let Some(child) = self.child.as_mut() else {
                break;
            };
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "failed to poll agent process");
                    break;
                }
            }

            if self.timer.is_expired() {
                info!("time limit reached, terminating agent");
                self.terminate().await;
                timed_out = true;
                break;
            }

            if let Some(signal) = detector.poll(log.size()) {
                warn!(?signal, "hang detected, killing agent");
                hung = true;
                self.terminate().await;
                break;
            }

            if !self.context_warning_sent {
                let fill = self.context_fill();
                if fill >= self.config.context.threshold_pct {
                    info!(fill = format!("{fill:.0}"), "context threshold crossed, agent hook handles wrap-up");
                    self.context_warning_sent = true;
                }
            }

            let interval = self.timer.poll_interval();
            if let Some(child) = self.child.as_mut() {
                tokio::select! {
                    _ = child.wait() => {}
                    () = tokio::time::sleep(interval) => {}
                }
            }
        }

        self.reap().await;

        let exit_code = self
            .child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
            .map_or(0, exit_code);
        let signatures = TailSignatures::scan(&self.diagnostic.lines_since(offset));
        if signatures.context_too_large || signatures.bad_image {
            info!(
                context_too_large = signatures.context_too_large,
                bad_image = signatures.bad_image,
                "API rejected the request"
            );
        }

        RunOutcome {
            exit_code,
            hung,
            timed_out,
            no_output: log.size() == initial_size,
            incomplete: log.ends_mid_tool_call(),
            context_too_large: signatures.context_too_large,
            bad_image: signatures.bad_image,
            rate_limited: signatures.rate_limited,
            context_pct: self.context_fill(),
        }
    }

    /// Wait for a process that outlived the monitor loop, killing it if it
    /// does not exit in time.
    async fn reap(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }
        if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!("agent process stuck, force killing");
        if let Err(err) = child.start_kill() {
            debug!(%err, "kill failed");
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
            warn!("agent process did not die");
        }
    }

    /// Terminate the running child: SIGTERM, 5 s grace, SIGKILL, 10 s grace,
    /// then drop the handle. Never fails; a no-op when nothing is running.
    pub async fn terminate(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => debug!(%err, "could not poll agent before terminating"),
        }

        info!(session_id = %self.session_id, "terminating agent process");
        send_sigterm(child);
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }

        if let Err(err) = child.start_kill() {
            debug!(%err, "kill failed");
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }

        warn!("agent process did not die, releasing its handles");
        drop(child.stdin.take());
        drop(child.stdout.take());
        drop(child.stderr.take());
        self.child = None;
    }
}

impl AgentRunner for SessionSupervisor {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn bind_session(&mut self, session_id: &str) {
        SessionSupervisor::bind_session(self, session_id);
    }

    fn start_fresh(&mut self) -> Pin<Box<dyn Future<Output = Result<LogOffset>> + Send + '_>> {
        Box::pin(SessionSupervisor::start_fresh(self))
    }

    fn resume<'a>(
        &'a mut self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LogOffset>> + Send + 'a>> {
        Box::pin(SessionSupervisor::resume(self, message))
    }

    fn monitor(&mut self, offset: LogOffset) -> Pin<Box<dyn Future<Output = RunOutcome> + Send + '_>> {
        Box::pin(SessionSupervisor::monitor(self, offset))
    }

    fn strip_all_images(&mut self) -> usize {
        SessionSupervisor::strip_all_images(self)
    }

    fn ended_with_text(&self) -> bool {
        self.session_log().ended_with_text()
    }

    fn last_output_is_idle(&self) -> bool {
        self.session_log()
            .last_output_is_idle(self.config.context.idle_max_chars)
    }
}

/// Write `payload` to the child's stdin and close it.
async fn feed_stdin(child: &mut Child, payload: &[u8]) -> Result<()> {
    let Some(mut stdin) = child.stdin.take() else {
        return Err(AppError::Transport("agent stdin unavailable".into()));
    };
    stdin
        .write_all(payload)
        .await
        .map_err(|err| AppError::Transport(format!("could not write to agent stdin: {err}")))?;
    stdin
        .flush()
        .await
        .map_err(|err| AppError::Transport(format!("could not flush agent stdin: {err}")))?;
    drop(stdin);
    Ok(())
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(%err, pid, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "terminate failed");
    }
}

/// Exit code of a finished process; the negated signal number when it was
/// killed by a signal.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(1))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
