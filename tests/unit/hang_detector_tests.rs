//! Unit tests for hang detection and diagnostic tail scanning.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::Duration;

use agent_relay::models::outcome::LogOffset;
use agent_relay::orchestrator::hang_detector::{
    DiagnosticLog, HangDetector, HangSignal, TailSignatures,
};
use tempfile::TempDir;

fn append(log: &DiagnosticLog, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log.path())
        .expect("open");
    file.write_all(text.as_bytes()).expect("append");
}

fn lines(text: &[&str]) -> Vec<String> {
    text.iter().map(|line| (*line).to_owned()).collect()
}

// ── Diagnostic log ───────────────────────────────────────────────────────────

#[test]
fn offset_counts_lines() {
    let dir = TempDir::new().expect("tempdir");
    let log = DiagnosticLog::new(dir.path().join("relay.log"));
    assert_eq!(log.offset(), LogOffset(0));

    append(&log, "one\ntwo\n");
    assert_eq!(log.offset(), LogOffset(2));
    assert_eq!(log.lines_since(LogOffset(1)), vec!["two".to_owned()]);
}

#[test]
fn only_lines_after_offset_are_checked() {
    let dir = TempDir::new().expect("tempdir");
    let log = DiagnosticLog::new(dir.path().join("relay.log"));
    append(&log, "API Error: overloaded\n");
    let offset = log.offset();

    assert!(!log.has_hang_signature(offset));
    append(&log, "  No messages returned\n");
    assert!(log.has_hang_signature(offset));
}

#[test]
fn quoted_signatures_do_not_count() {
    let dir = TempDir::new().expect("tempdir");
    let log = DiagnosticLog::new(dir.path().join("relay.log"));
    append(&log, "the agent said: API Error happened earlier\n");

    assert!(!log.has_hang_signature(LogOffset(0)));
}

// ── Tail signatures ──────────────────────────────────────────────────────────

#[test]
fn scan_recognises_each_rejection() {
    let found = TailSignatures::scan(&lines(&[
        "Error: Request too large for model",
        "Could not process image",
        "{\"type\":\"rate_limit_error\"}",
    ]));
    assert!(found.context_too_large);
    assert!(found.bad_image);
    assert!(found.rate_limited);

    assert!(TailSignatures::scan(&lines(&["prompt is too long: 210000 tokens"])).context_too_large);
    assert!(TailSignatures::scan(&lines(&["Rate limit reached for requests"])).rate_limited);
}

#[test]
fn scan_of_clean_output_is_empty() {
    assert_eq!(
        TailSignatures::scan(&lines(&["working", "done"])),
        TailSignatures::default()
    );
}

// ── Detector ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn error_pattern_waits_for_check_delay() {
    let dir = TempDir::new().expect("tempdir");
    let log = DiagnosticLog::new(dir.path().join("relay.log"));
    fs::write(log.path(), "").expect("create");
    let mut detector = HangDetector::new(
        log.clone(),
        LogOffset(0),
        0,
        Duration::from_secs(120),
        Duration::from_secs(300),
    );
    append(&log, "API Error: 500\n");

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(detector.poll(10), None);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(detector.poll(20), Some(HangSignal::ErrorPattern));
}

#[tokio::test(start_paused = true)]
async fn silence_past_the_timeout_is_a_hang() {
    let dir = TempDir::new().expect("tempdir");
    let mut detector = HangDetector::new(
        DiagnosticLog::new(dir.path().join("relay.log")),
        LogOffset(0),
        100,
        Duration::from_secs(120),
        Duration::from_secs(300),
    );

    tokio::time::advance(Duration::from_secs(200)).await;
    assert_eq!(detector.poll(150), None, "growth resets the silence clock");

    tokio::time::advance(Duration::from_secs(250)).await;
    assert_eq!(detector.poll(150), None);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(
        detector.poll(150),
        Some(HangSignal::Silence(Duration::from_secs(300)))
    );
}

#[tokio::test(start_paused = true)]
async fn steady_growth_never_hangs() {
    let dir = TempDir::new().expect("tempdir");
    let mut detector = HangDetector::new(
        DiagnosticLog::new(dir.path().join("relay.log")),
        LogOffset(0),
        0,
        Duration::from_secs(120),
        Duration::from_secs(300),
    );

    for step in 1..=20_u64 {
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(detector.poll(step * 10), None);
    }
}
