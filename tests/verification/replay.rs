//! Replay reconstruction over hand-written action logs.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use fortress_turns::replay::clean_replay;
use fortress_turns::snapshot::digest;
use fortress_turns::{
    reconstruct, reconstruct_or_snapshot, ReplayEntry, ReplayMode, ReplayNavigator, Role, Setup,
    TurnsError,
};
use serde_json::{json, Value};

use crate::common::{Counter, BLACK, WHITE};

fn setup() -> ReplayEntry {
    ReplayEntry::setup(&Setup::new(
        99,
        "Standard",
        vec![Role::new(WHITE), Role::new(BLACK)],
    ))
    .unwrap()
}

fn act(role: &str, verb: &str, args: Value) -> ReplayEntry {
    ReplayEntry::action(Role::new(role), verb, args)
}

fn game() -> Vec<ReplayEntry> {
    vec![
        setup(),
        act(WHITE, "add", json!(1)),
        act(WHITE, "add", json!(3)),
        act(WHITE, "undo", Value::Null),
        act(WHITE, "roll", Value::Null),
        act(BLACK, "add", json!(2)),
        act(BLACK, "pass", Value::Null),
        act(WHITE, "add", json!(1)),
    ]
}

#[test]
fn undo_span_collapses_and_checkpoints_follow_turns() {
    let result = reconstruct(&Counter::new(), &game(), ReplayMode::Normal).unwrap();
    let kept: Vec<(&str, &str)> = result
        .entries
        .iter()
        .map(|e| (e.entry.role.as_str(), e.entry.action.as_str()))
        .collect();
    assert_eq!(
        kept,
        vec![
            ("Observer", ".setup"),
            (WHITE, "add"),
            (WHITE, "roll"),
            (BLACK, "add"),
            (BLACK, "pass"),
            (WHITE, "add"),
        ]
    );
    assert_eq!(result.checkpoints(), vec![0, 3, 5]);
    for entry in &result.entries {
        assert!(entry.digest.is_some());
        assert!(!entry.remove);
    }
}

#[test]
fn digest_of_each_step_matches_the_live_state() {
    let result = reconstruct(&Counter::new(), &game(), ReplayMode::Normal).unwrap();
    let last = result.entries.last().unwrap();
    assert_eq!(last.digest, Some(digest(result.state.as_ref().unwrap()).unwrap()));
}

#[test]
fn collapsed_replay_reaches_the_same_state() {
    let counter = Counter::new();
    let full = reconstruct(&counter, &game(), ReplayMode::Normal).unwrap();
    let cleaned = clean_replay(&full.entries).unwrap();
    let reparsed = fortress_turns::replay::parse_records(&cleaned).unwrap();
    let again = reconstruct(&counter, &reparsed, ReplayMode::Normal).unwrap();
    assert_eq!(again.state, full.state);
    assert_eq!(again.entries, full.entries);
}

#[test]
fn debug_mode_keeps_every_step() {
    let result = reconstruct(&Counter::new(), &game(), ReplayMode::Debug).unwrap();
    assert_eq!(result.entries.len(), game().len());
    assert!(result.entries.iter().all(|e| e.digest.is_none()));
}

#[test]
fn broken_log_fails_with_its_step() {
    let mut entries = game();
    entries.insert(2, act(WHITE, "add", json!(7)));
    let err = reconstruct(&Counter::new(), &entries, ReplayMode::Normal).unwrap_err();
    assert!(matches!(err, TurnsError::ReplayCorrupt { step: 2, .. }));

    let partial = reconstruct(&Counter::new(), &entries, ReplayMode::Debug).unwrap();
    assert_eq!(partial.entries.len(), 2);
    assert!(!partial.is_complete());
}

#[test]
fn broken_log_falls_back_to_stored_snapshot() {
    let counter = Counter::new();
    let snapshot = reconstruct(&counter, &game(), ReplayMode::Normal)
        .unwrap()
        .state;
    let mut entries = game();
    entries.push(act(WHITE, "add", json!(0)));

    let result = reconstruct_or_snapshot(&counter, &entries, snapshot.clone()).unwrap();
    assert_eq!(result.state, snapshot);
    assert!(result.entries.is_empty());
    assert!(result.failure.is_some());
}

#[test]
fn navigator_walks_turn_boundaries() {
    let counter = Counter::new();
    let result = reconstruct(&counter, &game(), ReplayMode::Normal).unwrap();
    let final_state = result.state.clone();
    let mut nav = ReplayNavigator::new(&counter, result.entries);

    nav.seek(usize::MAX);
    assert_eq!(nav.position(), nav.len());
    assert_eq!(nav.state().unwrap(), final_state);

    assert_eq!(nav.previous_checkpoint(), 5);
    assert_eq!(nav.previous_checkpoint(), 3);
    assert_eq!(nav.previous_checkpoint(), 0);
    assert_eq!(nav.previous_checkpoint(), 0);
    assert_eq!(nav.next_checkpoint(), 3);
}
