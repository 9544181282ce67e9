#![forbid(unsafe_code)]

pub mod alerts;
pub mod config;
pub mod context_budget;
pub mod errors;
pub mod files;
pub mod handoff;
pub mod housekeeping;
pub mod lock;
pub mod models;
pub mod notify_format;
pub mod orchestrator;
pub mod prompt;
pub mod session_log;
pub mod status;
pub mod timer;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
