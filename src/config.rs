//! Global configuration parsing and validation.
//!
//! Every policy constant of the relay (retry ceilings, thresholds, poll
//! cadences) lives here with a serde default, so a minimal config only
//! names the workspace.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
}

fn default_agent_cli() -> String {
    "claude".into()
}

// ── Paths ────────────────────────────────────────────────────────────────────

/// File locations shared with the agent and external collaborators.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    /// Directory holding relay-owned state (pid, prompt, lock).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Append-only log receiving the child's stdout and stderr.
    #[serde(default = "default_diagnostic_log")]
    pub diagnostic_log: PathBuf,
    /// JSON array maintained by the external notification poller.
    #[serde(default = "default_notifications_cache")]
    pub notifications_cache: PathBuf,
    /// Plain-text context percentage written by the agent's hook.
    #[serde(default = "default_context_pct_file")]
    pub context_pct_file: PathBuf,
    /// Status side-channel for external observers.
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Exclusive instance lock.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    /// Prompt template piped to fresh sessions.
    #[serde(default = "default_prompt_file")]
    pub prompt_file: PathBuf,
    /// Optional orientation text appended to the prompt.
    #[serde(default)]
    pub memory_file: Option<PathBuf>,
    /// Optional handoff document validated at the end of a run.
    #[serde(default)]
    pub handoff_file: Option<PathBuf>,
    /// Root under which the agent keeps per-workspace session logs.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    home_dir().join(".agent-relay")
}

fn default_diagnostic_log() -> PathBuf {
    default_state_dir().join("relay.log")
}

fn default_notifications_cache() -> PathBuf {
    PathBuf::from("/tmp/agent-relay-notifications-cache.json")
}

fn default_context_pct_file() -> PathBuf {
    PathBuf::from("/tmp/agent-relay-context-pct")
}

fn default_status_file() -> PathBuf {
    default_state_dir().join("relay-status.json")
}

fn default_lock_file() -> PathBuf {
    default_state_dir().join("relay.lock")
}

fn default_prompt_file() -> PathBuf {
    default_state_dir().join("PROMPT.md")
}

fn default_projects_dir() -> PathBuf {
    home_dir().join(".claude").join("projects")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            diagnostic_log: default_diagnostic_log(),
            notifications_cache: default_notifications_cache(),
            context_pct_file: default_context_pct_file(),
            status_file: default_status_file(),
            lock_file: default_lock_file(),
            prompt_file: default_prompt_file(),
            memory_file: None,
            handoff_file: None,
            projects_dir: default_projects_dir(),
        }
    }
}

// ── Prompt ───────────────────────────────────────────────────────────────────

/// Variable substitutions applied to the prompt template.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PromptConfig {
    /// `{KEY}` placeholders and their replacement text.
    #[serde(default)]
    pub substitutions: HashMap<String, String>,
}

// ── Timing ───────────────────────────────────────────────────────────────────

/// Wall-clock budget and poll cadences (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Total run budget measured from process start.
    #[serde(default = "default_run_budget")]
    pub run_budget_seconds: u64,
    /// Minimum remaining budget that justifies spawning a successor.
    #[serde(default = "default_successor_reserve")]
    pub successor_reserve_seconds: u64,
    /// Delay before, and cadence of, diagnostic-log hang checks.
    #[serde(default = "default_hang_check_delay")]
    pub hang_check_delay_seconds: u64,
    /// Session-log silence treated as a hang.
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_seconds: u64,
    /// Notification cache poll interval while asleep.
    #[serde(default = "default_sleep_poll")]
    pub sleep_poll_seconds: u64,
    /// Cache age (or missing duration) that forces a wake.
    #[serde(default = "default_cache_stale")]
    pub cache_stale_seconds: u64,
}

fn default_run_budget() -> u64 {
    12 * 3600
}

fn default_successor_reserve() -> u64 {
    600
}

fn default_hang_check_delay() -> u64 {
    30
}

fn default_silence_timeout() -> u64 {
    300
}

fn default_sleep_poll() -> u64 {
    10
}

fn default_cache_stale() -> u64 {
    60
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            run_budget_seconds: default_run_budget(),
            successor_reserve_seconds: default_successor_reserve(),
            hang_check_delay_seconds: default_hang_check_delay(),
            silence_timeout_seconds: default_silence_timeout(),
            sleep_poll_seconds: default_sleep_poll(),
            cache_stale_seconds: default_cache_stale(),
        }
    }
}

impl TimingConfig {
    /// Hang check delay as a [`Duration`].
    #[must_use]
    pub fn hang_check_delay(&self) -> Duration {
        Duration::from_secs(self.hang_check_delay_seconds)
    }

    /// Silence timeout as a [`Duration`].
    #[must_use]
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_seconds)
    }

    /// Sleep poll interval as a [`Duration`].
    #[must_use]
    pub fn sleep_poll(&self) -> Duration {
        Duration::from_secs(self.sleep_poll_seconds)
    }

    /// Cache staleness threshold as a [`Duration`].
    #[must_use]
    pub fn cache_stale(&self) -> Duration {
        Duration::from_secs(self.cache_stale_seconds)
    }
}

// ── Retry ────────────────────────────────────────────────────────────────────

/// Retry ceilings and backoff base used by the error classifier.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Generic crashes tolerated before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Incomplete / no-output / wake retries tolerated before escalating.
    #[serde(default = "default_max_retries")]
    pub max_incomplete_retries: u32,
    /// Base of the exponential backoff.
    #[serde(default = "default_incomplete_base_delay")]
    pub incomplete_base_delay_seconds: u64,
    /// Consecutive idle resumes before falling through to sleep.
    #[serde(default = "default_max_retries")]
    pub max_idle_continuations: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_incomplete_base_delay() -> u64 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_incomplete_retries: default_max_retries(),
            incomplete_base_delay_seconds: default_incomplete_base_delay(),
            max_idle_continuations: default_max_retries(),
        }
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// Context-window accounting.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ContextConfig {
    /// Model context window in tokens.
    #[serde(default = "default_window_tokens")]
    pub window_tokens: u64,
    /// Fill percentage that triggers a successor session.
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: f64,
    /// Fill percentage idle sessions are told to work up to.
    #[serde(default = "default_handoff_target_pct")]
    pub handoff_target_pct: f64,
    /// Final answers shorter than this count as idle output.
    #[serde(default = "default_idle_max_chars")]
    pub idle_max_chars: usize,
    /// Image-bearing tool results kept intact before a resume.
    #[serde(default = "default_keep_images")]
    pub keep_images: usize,
}

fn default_window_tokens() -> u64 {
    200_000
}

fn default_threshold_pct() -> f64 {
    85.0
}

fn default_handoff_target_pct() -> f64 {
    90.0
}

fn default_idle_max_chars() -> usize {
    200
}

fn default_keep_images() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            threshold_pct: default_threshold_pct(),
            handoff_target_pct: default_handoff_target_pct(),
            idle_max_chars: default_idle_max_chars(),
            keep_images: default_keep_images(),
        }
    }
}

// ── Alerts ───────────────────────────────────────────────────────────────────

/// Endpoints for best-effort alerts and acknowledgements.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AlertsConfig {
    /// Hub base URL; crash alerts post to `{hub_url}/api/chat`.
    #[serde(default)]
    pub hub_url: Option<String>,
    /// Slack incoming webhook for crash alerts.
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// Notification service base URL for `ack-{source}` calls.
    #[serde(default)]
    pub notifications_url: Option<String>,
}

// ── Diagnostic log rotation ──────────────────────────────────────────────────

/// Size limits for the diagnostic log, applied at startup.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogConfig {
    /// Rotate once the log grows past this many bytes.
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    /// Bytes retained from the end of the log after rotation.
    #[serde(default = "default_log_truncate_bytes")]
    pub truncate_bytes: u64,
}

fn default_log_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_log_truncate_bytes() -> u64 {
    1024 * 1024
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_log_max_bytes(),
            truncate_bytes: default_log_truncate_bytes(),
        }
    }
}

// ── Global ───────────────────────────────────────────────────────────────────

/// Global configuration parsed from `relay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory the agent works in; also keys its session-log folder.
    pub workspace_root: PathBuf,
    /// Agent CLI binary.
    #[serde(default = "default_agent_cli")]
    pub agent_cli: String,
    /// Arguments placed before the relay's own flags.
    #[serde(default)]
    pub agent_cli_args: Vec<String>,
    /// Model override passed as `--model`.
    #[serde(default)]
    pub model: Option<String>,
    /// File locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Prompt substitutions.
    #[serde(default)]
    pub prompt: PromptConfig,
    /// Budget and poll cadences.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Retry ceilings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Context-window accounting.
    #[serde(default)]
    pub context: ContextConfig,
    /// Alert endpoints.
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Diagnostic-log rotation.
    #[serde(default)]
    pub log: LogConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Absolute path to the agent workspace.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Replace the workspace root, re-canonicalizing it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the path does not exist.
    pub fn set_workspace_root(&mut self, root: &Path) -> Result<()> {
        self.workspace_root = root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent_cli.trim().is_empty() {
            return Err(AppError::Config("agent_cli must not be empty".into()));
        }

        if self.timing.run_budget_seconds == 0 {
            return Err(AppError::Config(
                "run_budget_seconds must be greater than zero".into(),
            ));
        }

        if self.timing.sleep_poll_seconds == 0 {
            return Err(AppError::Config(
                "sleep_poll_seconds must be greater than zero".into(),
            ));
        }

        if self.context.window_tokens == 0 {
            return Err(AppError::Config(
                "window_tokens must be greater than zero".into(),
            ));
        }

        if !(self.context.threshold_pct > 0.0 && self.context.threshold_pct <= 100.0) {
            return Err(AppError::Config(
                "threshold_pct must be within (0, 100]".into(),
            ));
        }

        if self.log.truncate_bytes > self.log.max_bytes {
            return Err(AppError::Config(
                "log.truncate_bytes must not exceed log.max_bytes".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
