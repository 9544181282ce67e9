//! Unit tests for context fill tracking.

use std::fs;

use agent_relay::context_budget::ContextBudgetTracker;
use agent_relay::session_log::SessionLog;
use serde_json::json;
use tempfile::TempDir;

fn usage_log(dir: &TempDir, total: u64) -> SessionLog {
    let path = dir.path().join("s.jsonl");
    let entry = json!({
        "type": "assistant",
        "message": {
            "content": [{ "type": "text", "text": "hi" }],
            "usage": { "input_tokens": total }
        }
    });
    fs::write(&path, format!("{entry}\n")).expect("write");
    SessionLog::at(path)
}

#[test]
fn cached_percentage_wins() {
    let dir = TempDir::new().expect("tempdir");
    let pct_file = dir.path().join("context-pct");
    fs::write(&pct_file, "72.5\n").expect("write");
    let tracker = ContextBudgetTracker::new(&pct_file, 200_000);

    let pct = tracker.fill_pct(&usage_log(&dir, 20_000));

    assert!((pct - 72.5).abs() < f64::EPSILON);
}

#[test]
fn falls_back_to_usage_when_cache_missing() {
    let dir = TempDir::new().expect("tempdir");
    let tracker = ContextBudgetTracker::new(dir.path().join("absent"), 200_000);

    let pct = tracker.fill_pct(&usage_log(&dir, 50_000));

    assert!((pct - 25.0).abs() < f64::EPSILON);
}

#[test]
fn zero_or_malformed_cache_is_ignored() {
    let dir = TempDir::new().expect("tempdir");
    let pct_file = dir.path().join("context-pct");
    let tracker = ContextBudgetTracker::new(&pct_file, 200_000);
    let log = usage_log(&dir, 100_000);

    for body in ["0", "garbage", "", "NaN"] {
        fs::write(&pct_file, body).expect("write");
        assert!(tracker.cached_pct().is_none(), "{body:?} should be ignored");
        assert!((tracker.fill_pct(&log) - 50.0).abs() < f64::EPSILON);
    }
}

#[test]
fn nothing_known_means_empty_context() {
    let dir = TempDir::new().expect("tempdir");
    let tracker = ContextBudgetTracker::new(dir.path().join("absent"), 200_000);

    let pct = tracker.fill_pct(&SessionLog::at(dir.path().join("absent.jsonl")));

    assert!(pct.abs() < f64::EPSILON);
}
