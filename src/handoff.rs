//! Handoff document validation.
//!
//! The agent writes a markdown handoff for its successor before a session
//! ends. At the end of a run the relay checks the document for the
//! required `##` sections and extracts the main goal for the final status.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::files;

/// `##` sections every handoff must contain (case-insensitive substring).
pub const REQUIRED_SECTIONS: &[&str] = &["MAIN GOAL", "Current State", "What Was Done"];

/// Minimum trimmed length of a useful handoff.
pub const MIN_HANDOFF_CHARS: usize = 50;

/// Maximum length of the extracted goal.
pub const MAX_GOAL_CHARS: usize = 150;

static HEADING: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^##\s+(.+)").ok());
static GOAL_HEADING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^##\s+.*MAIN GOAL").ok());
static LEADING_MARKUP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[*#\- ]+").ok());

/// Result of validating a handoff document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffReport {
    /// Problems found; empty when the document is complete.
    pub warnings: Vec<String>,
    /// First line under the `MAIN GOAL` heading.
    pub goal: Option<String>,
}

/// Drop a leading `--- … ---` front matter block.
#[must_use]
pub fn strip_front_matter(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix("---") {
        if let Some(end) = rest.find("---") {
            return rest[end + 3..].trim_start_matches('\n');
        }
    }
    text
}

fn heading(line: &str) -> Option<&str> {
    HEADING
        .as_ref()?
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Extract the main goal from handoff text.
#[must_use]
pub fn extract_goal(text: &str) -> Option<String> {
    let goal_heading = GOAL_HEADING.as_ref()?;
    let body = strip_front_matter(text);
    let mut lines = body.lines().skip_while(|line| !goal_heading.is_match(line));
    lines.next()?;

    for line in lines {
        if heading(line).is_some() {
            return None;
        }
        let trimmed = line.trim();
        let cleaned = LEADING_MARKUP
            .as_ref()
            .map_or(trimmed, |re| re.find(trimmed).map_or(trimmed, |m| &trimmed[m.end()..]));
        let cleaned = cleaned.replace('*', "");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            return Some(cleaned.chars().take(MAX_GOAL_CHARS).collect());
        }
    }
    None
}

/// Check handoff text for completeness.
#[must_use]
pub fn validate_text(text: &str) -> HandoffReport {
    let mut warnings = Vec::new();
    if text.trim().chars().count() < MIN_HANDOFF_CHARS {
        warnings.push(format!("handoff is very short (< {MIN_HANDOFF_CHARS} chars)"));
    }

    let headings: Vec<String> = strip_front_matter(text)
        .lines()
        .filter_map(heading)
        .map(str::to_lowercase)
        .collect();
    for required in REQUIRED_SECTIONS {
        let needle = required.to_lowercase();
        if !headings.iter().any(|name| name.contains(&needle)) {
            warnings.push(format!("missing section: {required}"));
        }
    }

    let goal = extract_goal(text);
    match &goal {
        None => warnings.push("could not extract MAIN GOAL, section may be empty".into()),
        Some(goal) if goal.chars().count() < 10 => {
            warnings.push(format!("MAIN GOAL is very short ({} chars)", goal.chars().count()));
        }
        Some(_) => {}
    }

    HandoffReport { warnings, goal }
}

/// Validate the handoff at `path`, logging every warning.
///
/// Returns the extracted goal.
pub fn validate_and_log(path: &Path) -> Option<String> {
    let Some(text) = files::read_lenient(path) else {
        warn!(path = %path.display(), "handoff not found");
        return None;
    };

    let report = validate_text(&text);
    if report.warnings.is_empty() {
        info!("handoff validated");
    }
    for warning in &report.warnings {
        warn!(%warning, "handoff incomplete");
    }
    if let Some(goal) = &report.goal {
        info!(goal = %goal, "handoff goal");
    }
    report.goal
}
