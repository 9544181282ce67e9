//! Integration tests for the top-level relay loop.
//!
//! Validates:
//! - A clean turn followed by an empty sleep ends the run with status `off`
//! - Crash, incomplete, and transport failures escalate through the
//!   classifier's retry ceilings
//! - Context-full turns hand off to a fresh successor session
//! - Idle and text-less turns are resumed in place
//! - Launch failures that cannot be retried end the run with an error

use std::fs;
use std::time::Duration;

use agent_relay::models::outcome::RunOutcome;
use agent_relay::models::status::RelayStatus;
use agent_relay::orchestrator::classifier::CONTINUE_REASON;
use agent_relay::orchestrator::relay::no_text_resume_reason;
use agent_relay::orchestrator::scheduler::SleepResult;
use agent_relay::status::StatusWriter;
use agent_relay::timer::RunTimer;
use agent_relay::AppError;
use tempfile::TempDir;
use tokio::time::Instant;

use super::test_helpers::{orchestrator, test_config, timer_hours, Call, FakeRunner, ScriptedWake, Turn};

fn crash(exit_code: i32) -> Turn {
    Turn::of(RunOutcome {
        exit_code,
        ..RunOutcome::default()
    })
}

fn final_status(dir: &TempDir) -> RelayStatus {
    StatusWriter::new(dir.path().join("state").join("status.json"))
        .read()
        .expect("status written")
        .status
}

#[tokio::test(start_paused = true)]
async fn clean_turn_then_quiet_sleep_finishes() {
    let dir = TempDir::new().expect("tempdir");
    let config = test_config(dir.path());
    let mut relay = orchestrator(
        config,
        timer_hours(1),
        FakeRunner::new([Turn::clean(20.0)]),
        ScriptedWake::never(),
    );

    relay.run().await.expect("run");

    let id = relay.state().session_id().to_owned();
    assert_eq!(relay.runner().calls, vec![Call::Fresh(id), Call::Monitor]);
    assert!(relay.state().is_established());
    assert_eq!(final_status(&dir), RelayStatus::Off);
}

#[tokio::test(start_paused = true)]
async fn repeated_crashes_give_up_after_the_ceiling() {
    let dir = TempDir::new().expect("tempdir");
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([crash(1), crash(1), crash(1), crash(137)]),
        ScriptedWake::never(),
    );
    let started = Instant::now();

    relay.run().await.expect("run");

    let sessions = relay.runner().fresh_sessions();
    assert_eq!(sessions.len(), 4, "every crash retries with a fresh session");
    let mut unique = sessions.clone();
    unique.dedup();
    assert_eq!(unique.len(), 4);
    assert_eq!(relay.state().crash_count, 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3 * 15));
    assert_eq!(final_status(&dir), RelayStatus::Off);
}

#[tokio::test(start_paused = true)]
async fn incomplete_turns_back_off_then_start_fresh() {
    let dir = TempDir::new().expect("tempdir");
    let incomplete = Turn::of(RunOutcome {
        incomplete: true,
        ..RunOutcome::default()
    });
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([
            incomplete.clone(),
            incomplete.clone(),
            incomplete.clone(),
            incomplete,
            Turn::clean(20.0),
        ]),
        ScriptedWake::never(),
    );
    let started = Instant::now();

    relay.run().await.expect("run");

    let launches = relay.runner().launches();
    assert_eq!(launches.len(), 5);
    let Call::Fresh(first) = &launches[0] else {
        panic!("first launch must be fresh");
    };
    for launch in &launches[1..4] {
        assert_eq!(launch, &Call::Resume(first.clone(), CONTINUE_REASON.into()));
    }
    let Call::Fresh(second) = &launches[4] else {
        panic!("fifth launch must be fresh");
    };
    assert_ne!(first, second);
    assert_eq!(started.elapsed(), Duration::from_secs(2 + 4 + 8 + 15));
    assert_eq!(relay.state().incomplete_count, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_a_minute() {
    let dir = TempDir::new().expect("tempdir");
    let limited = Turn::of(RunOutcome {
        rate_limited: true,
        exit_code: 1,
        ..RunOutcome::default()
    });
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([limited, Turn::clean(20.0)]),
        ScriptedWake::never(),
    );
    let started = Instant::now();

    relay.run().await.expect("run");

    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(relay.runner().fresh_sessions().len(), 2, "rate limit does not establish");
    assert_eq!(relay.state().crash_count, 0);
}

#[tokio::test(start_paused = true)]
async fn full_context_spawns_a_successor() {
    let dir = TempDir::new().expect("tempdir");
    let config = test_config(dir.path());
    fs::write(&config.paths.context_pct_file, "91").expect("context cache");
    let mut relay = orchestrator(
        config.clone(),
        timer_hours(1),
        FakeRunner::new([Turn::clean(91.0), Turn::clean(5.0)]),
        ScriptedWake::never(),
    );

    relay.run().await.expect("run");

    let sessions = relay.runner().fresh_sessions();
    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0], sessions[1]);
    assert_eq!(relay.state().session_id(), sessions[1]);
    assert!(!config.paths.context_pct_file.exists());
}

#[tokio::test(start_paused = true)]
async fn full_context_without_time_goes_to_sleep() {
    let dir = TempDir::new().expect("tempdir");
    let timer = RunTimer::new(Duration::from_secs(300), Duration::from_secs(600));
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer,
        FakeRunner::new([Turn::clean(91.0)]),
        ScriptedWake::never(),
    );

    relay.run().await.expect("run");

    assert_eq!(relay.runner().fresh_sessions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_turns_are_resumed_a_bounded_number_of_times() {
    let dir = TempDir::new().expect("tempdir");
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([
            Turn::idle(40.0),
            Turn::idle(40.0),
            Turn::idle(40.0),
            Turn::idle(40.0),
        ]),
        ScriptedWake::never(),
    );

    relay.run().await.expect("run");

    let messages = relay.runner().resume_messages();
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .all(|msg| msg.starts_with("Context at 40%") && msg.contains("until 90%")));
    assert_eq!(relay.state().idle_continuation_count, 0);
}

#[tokio::test(start_paused = true)]
async fn text_less_turn_is_resumed() {
    let dir = TempDir::new().expect("tempdir");
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([Turn::no_text(20.0), Turn::clean(20.0)]),
        ScriptedWake::never(),
    );
    let started = Instant::now();

    relay.run().await.expect("run");

    assert_eq!(
        relay.runner().resume_messages(),
        vec![no_text_resume_reason(300)]
    );
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn wake_that_fills_the_context_spawns_a_successor() {
    let dir = TempDir::new().expect("tempdir");
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([Turn::clean(20.0), Turn::clean(88.0), Turn::clean(10.0)]),
        ScriptedWake::new([SleepResult::woken("New chat message")]),
    );

    relay.run().await.expect("run");

    let launches = relay.runner().launches();
    assert_eq!(launches.len(), 3);
    let Call::Fresh(first) = &launches[0] else {
        panic!("first launch must be fresh");
    };
    assert_eq!(
        launches[1],
        Call::Resume(first.clone(), "New chat message".into())
    );
    let Call::Fresh(second) = &launches[2] else {
        panic!("successor must start fresh");
    };
    assert_ne!(first, second);
}

#[tokio::test(start_paused = true)]
async fn oversized_request_on_wake_spawns_a_successor() {
    let dir = TempDir::new().expect("tempdir");
    let too_large = Turn::of(RunOutcome {
        context_too_large: true,
        exit_code: 1,
        context_pct: 30.0,
        ..RunOutcome::default()
    });
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        FakeRunner::new([Turn::clean(20.0), too_large, Turn::clean(10.0)]),
        ScriptedWake::new([SleepResult::woken("ping")]),
    );

    relay.run().await.expect("run");

    assert_eq!(relay.runner().fresh_sessions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn undeliverable_input_counts_as_a_crash() {
    let dir = TempDir::new().expect("tempdir");
    let mut runner = FakeRunner::new([]);
    runner.failing_launches = usize::MAX;
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        runner,
        ScriptedWake::never(),
    );

    relay.run().await.expect("run");

    assert_eq!(relay.runner().launches().len(), 4);
    assert!(!relay.runner().calls.contains(&Call::Monitor));
    assert_eq!(relay.state().crash_count, 4);
    assert_eq!(final_status(&dir), RelayStatus::Off);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_ends_the_run_with_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut runner = FakeRunner::new([]);
    runner.spawn_error = true;
    let mut relay = orchestrator(
        test_config(dir.path()),
        timer_hours(1),
        runner,
        ScriptedWake::never(),
    );

    let err = relay.run().await.unwrap_err();

    assert!(matches!(err, AppError::Spawn(_)));
    assert_eq!(final_status(&dir), RelayStatus::Working);
}

#[tokio::test(start_paused = true)]
async fn budget_spent_during_a_launch_stops_the_loop() {
    let dir = TempDir::new().expect("tempdir");
    let mut runner = FakeRunner::new([crash(1)]);
    runner.monitor_delay = Duration::from_secs(120);
    let timer = RunTimer::new(Duration::from_secs(60), Duration::from_secs(600));
    let mut relay = orchestrator(test_config(dir.path()), timer, runner, ScriptedWake::never());

    relay.run().await.expect("run");

    assert_eq!(relay.runner().launches().len(), 1);
    assert_eq!(relay.state().crash_count, 0, "outcome never classified");
    assert_eq!(final_status(&dir), RelayStatus::Off);
}

#[tokio::test(start_paused = true)]
async fn final_status_carries_the_handoff_goal() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = test_config(dir.path());
    let handoff = dir.path().join("HANDOFF.md");
    fs::write(
        &handoff,
        "## MAIN GOAL\nShip the relay to production\n\n## Current State\nReady.\n\n## What Was Done\nEverything.\n",
    )
    .expect("handoff");
    config.paths.handoff_file = Some(handoff);
    let mut relay = orchestrator(
        config,
        timer_hours(1),
        FakeRunner::new([Turn::clean(20.0)]),
        ScriptedWake::never(),
    );

    relay.run().await.expect("run");

    let doc = StatusWriter::new(dir.path().join("state").join("status.json"))
        .read()
        .expect("status");
    assert_eq!(doc.status, RelayStatus::Off);
    assert_eq!(doc.goal.as_deref(), Some("Ship the relay to production"));
    assert!(doc.session_id.is_none());
}
