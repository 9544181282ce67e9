//! Context-window fill tracking.

use std::path::{Path, PathBuf};

use crate::files;
use crate::session_log::SessionLog;

/// Computes how full the agent's context window is.
///
/// An external hook keeps a scalar percentage in a cache file; it is
/// preferred when present. A missing, malformed, or zero value falls back
/// to the usage counters in the session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBudgetTracker {
    pct_file: PathBuf,
    window_tokens: u64,
}

impl ContextBudgetTracker {
    /// Track against `window_tokens`, consulting `pct_file` first.
    #[must_use]
    pub fn new(pct_file: impl Into<PathBuf>, window_tokens: u64) -> Self {
        Self {
            pct_file: pct_file.into(),
            window_tokens,
        }
    }

    /// Path of the scalar cache file.
    #[must_use]
    pub fn pct_file(&self) -> &Path {
        &self.pct_file
    }

    /// Cached percentage, if present and non-zero.
    #[must_use]
    pub fn cached_pct(&self) -> Option<f64> {
        files::read_lenient(&self.pct_file)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|pct| pct.is_finite() && *pct > 0.0)
    }

    /// Current fill percentage for the session behind `log`.
    #[must_use]
    pub fn fill_pct(&self, log: &SessionLog) -> f64 {
        self.cached_pct()
            .unwrap_or_else(|| log.usage_fill_pct(self.window_tokens))
    }
}
