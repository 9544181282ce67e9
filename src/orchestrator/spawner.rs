//! Agent process spawner.
//!
//! Builds the agent CLI command for a fresh or resumed session. The
//! child's stdout and stderr both go to the shared diagnostic log, and
//! its environment drops the agent's own internal variables, which break
//! nested launches, and gains the usual installation directories on
//! `PATH`.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Environment variables set by a running agent that break nested launches.
pub const INTERNAL_ENV_VARS: &[&str] = &[
    "CLAUDECODE",
    "CLAUDE_CODE_ENTRYPOINT",
    "CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS",
    "CLAUDE_AUTOCOMPACT_PCT_OVERRIDE",
];

/// Installation directories appended to `PATH` when missing. A leading `~`
/// expands to `$HOME`.
pub const EXTRA_PATH_DIRS: &[&str] = &[
    "~/.local/bin",
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "~/.npm-global/bin",
    "~/.bun/bin",
];

/// How the agent is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// New session; the prompt arrives on stdin.
    Fresh,
    /// Existing session; a single follow-up message arrives on stdin.
    Resume,
}

/// Compute the child environment from the parent's variables.
#[must_use]
pub fn child_env<I>(vars: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: Vec<(OsString, OsString)> = vars
        .into_iter()
        .filter(|(key, _)| !INTERNAL_ENV_VARS.iter().any(|internal| key == internal))
        .collect();

    let home = env
        .iter()
        .find(|(key, _)| key == "HOME")
        .map(|(_, value)| PathBuf::from(value));
    let current_path = env
        .iter()
        .find(|(key, _)| key == "PATH")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    let mut dirs: Vec<PathBuf> = std::env::split_paths(&current_path).collect();
    for extra in EXTRA_PATH_DIRS {
        let dir = match (extra.strip_prefix("~/"), &home) {
            (Some(rest), Some(home)) => home.join(rest),
            (Some(_), None) => continue,
            (None, _) => PathBuf::from(extra),
        };
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }

    if let Ok(joined) = std::env::join_paths(dirs) {
        env.retain(|(key, _)| key != "PATH");
        env.push((OsString::from("PATH"), joined));
    }
    env
}

/// Command-line arguments for a launch, after the configured prefix args.
#[must_use]
pub fn launch_args(config: &GlobalConfig, session_id: &str, mode: LaunchMode) -> Vec<String> {
    let mut args = config.agent_cli_args.clone();
    match mode {
        LaunchMode::Fresh => args.extend([
            "--print".to_owned(),
            "--dangerously-skip-permissions".to_owned(),
            "--session-id".to_owned(),
            session_id.to_owned(),
        ]),
        LaunchMode::Resume => args.extend([
            "--resume".to_owned(),
            session_id.to_owned(),
            "--print".to_owned(),
            "--dangerously-skip-permissions".to_owned(),
        ]),
    }
    if let Some(model) = &config.model {
        args.extend(["--model".to_owned(), model.clone()]);
    }
    args
}

fn open_diagnostic_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Io(format!("cannot create log directory {}: {err}", parent.display()))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| AppError::Io(format!("cannot open diagnostic log {}: {err}", path.display())))
}

/// Spawn the agent CLI with piped stdin and output appended to the
/// diagnostic log.
///
/// # Errors
///
/// Returns `AppError::Io` if the diagnostic log cannot be opened, or
/// `AppError::Spawn` if the process fails to start.
pub fn spawn_agent(config: &GlobalConfig, session_id: &str, mode: LaunchMode) -> Result<Child> {
    let stdout_log = open_diagnostic_log(&config.paths.diagnostic_log)?;
    let stderr_log = stdout_log
        .try_clone()
        .map_err(|err| AppError::Io(format!("cannot share diagnostic log handle: {err}")))?;

    let mut cmd = Command::new(&config.agent_cli);
    cmd.args(launch_args(config, session_id, mode))
        .env_clear()
        .envs(child_env(std::env::vars_os()))
        .current_dir(config.workspace_root())
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn {}: {err}", config.agent_cli)))?;

    info!(
        session_id,
        pid = child.id().unwrap_or(0),
        agent_cli = config.agent_cli,
        ?mode,
        "agent process spawned"
    );

    Ok(child)
}
