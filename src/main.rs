#![forbid(unsafe_code)]

//! `agent-relay`: keeps an AI agent session alive within a fixed budget.
//!
//! Loads configuration, takes the single-instance lock, rotates the
//! diagnostic log, and runs the relay loop until the budget is spent or a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::housekeeping;
use agent_relay::lock::InstanceLock;
use agent_relay::models::status::RelayStatus;
use agent_relay::orchestrator::relay::RelayOrchestrator;
use agent_relay::status::StatusWriter;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "AI agent session relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace the agent runs in.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        config.set_workspace_root(&ws)?;
    }
    info!(workspace = %config.workspace_root().display(), "configuration loaded");

    // ── Single instance ─────────────────────────────────
    let Some(_lock) = InstanceLock::acquire(&config.paths.lock_file)? else {
        info!("another relay instance is running");
        return Ok(ExitCode::SUCCESS);
    };

    housekeeping::rotate_log(
        &config.paths.diagnostic_log,
        config.log.max_bytes,
        config.log.truncate_bytes,
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(Arc::new(config)))
}

async fn run(config: Arc<GlobalConfig>) -> Result<ExitCode> {
    let status = StatusWriter::new(config.paths.status_file.clone());
    let mut relay = RelayOrchestrator::from_config(Arc::clone(&config));

    tokio::select! {
        result = relay.run() => {
            result?;
            Ok(ExitCode::SUCCESS)
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
            status.set(RelayStatus::Off, None, None);
            Ok(ExitCode::from(1))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
