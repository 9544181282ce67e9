//! Unit tests for the post-success idle/successor policy.

use std::path::Path;

use agent_relay::config::{ContextConfig, RetryConfig};
use agent_relay::models::session::LoopState;
use agent_relay::orchestrator::relay::{no_text_resume_reason, post_success_policy, PostSuccess};

fn state() -> LoopState {
    LoopState::new(Path::new("/tmp/relay-workspace"))
}

#[test]
fn full_context_with_time_left_spawns_successor() {
    let mut state = state();
    state.idle_continuation_count = 2;

    let decision = post_success_policy(
        88.0,
        true,
        false,
        &mut state,
        &RetryConfig::default(),
        &ContextConfig::default(),
    );

    assert_eq!(decision, PostSuccess::SpawnSuccessor);
}

#[test]
fn full_context_without_time_goes_to_sleep() {
    let mut state = state();
    state.idle_continuation_count = 1;

    let decision = post_success_policy(
        88.0,
        false,
        true,
        &mut state,
        &RetryConfig::default(),
        &ContextConfig::default(),
    );

    assert_eq!(decision, PostSuccess::Sleep);
    assert_eq!(state.idle_continuation_count, 0);
}

#[test]
fn idle_output_keeps_the_agent_working() {
    let mut state = state();

    let decision = post_success_policy(
        40.0,
        true,
        true,
        &mut state,
        &RetryConfig::default(),
        &ContextConfig::default(),
    );

    let PostSuccess::ContinueIdle(reason) = decision else {
        panic!("expected an idle continuation, got {decision:?}");
    };
    assert!(reason.starts_with("Context at 40%"));
    assert!(reason.contains("until 90%"));
    assert!(reason.ends_with("then write your handoff."));
    assert_eq!(state.idle_continuation_count, 1);
}

#[test]
fn idle_at_the_maximum_falls_through_to_sleep() {
    let mut state = state();
    state.idle_continuation_count = RetryConfig::default().max_idle_continuations;

    let decision = post_success_policy(
        40.0,
        true,
        true,
        &mut state,
        &RetryConfig::default(),
        &ContextConfig::default(),
    );

    assert_eq!(decision, PostSuccess::Sleep);
    assert_eq!(state.idle_continuation_count, 0);
}

#[test]
fn idle_continuations_are_bounded() {
    let mut state = state();
    let retry = RetryConfig::default();
    let context = ContextConfig::default();

    let decisions: Vec<bool> = (0..4)
        .map(|_| {
            matches!(
                post_success_policy(10.0, true, true, &mut state, &retry, &context),
                PostSuccess::ContinueIdle(_)
            )
        })
        .collect();

    assert_eq!(decisions, vec![true, true, true, false]);
}

#[test]
fn decisive_output_resets_idle_count() {
    let mut state = state();
    state.idle_continuation_count = 2;

    let decision = post_success_policy(
        40.0,
        true,
        false,
        &mut state,
        &RetryConfig::default(),
        &ContextConfig::default(),
    );

    assert_eq!(decision, PostSuccess::Sleep);
    assert_eq!(state.idle_continuation_count, 0);
}

#[test]
fn no_text_reason_names_the_silence_timeout() {
    assert_eq!(
        no_text_resume_reason(300),
        "Your previous API call failed after 300 seconds. Please proceed with the original instructions."
    );
}
