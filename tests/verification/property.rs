//! Properties over arbitrary legal counter games.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use fortress_turns::replay::{clean_replay, parse_records};
use fortress_turns::snapshot::digest;
use fortress_turns::{reconstruct, GameState, ReplayEntry, ReplayMode, Role, Rules, Setup};
use proptest::prelude::*;
use serde_json::{json, Value};

use crate::common::{Counter, BLACK, WHITE};

/// Turns arbitrary choices into a game the counter accepts: the acting role
/// always moves, `undo` only when something can be undone, and nothing after
/// the game ends.
fn legal_game(seed: u64, choices: &[u8]) -> Vec<ReplayEntry> {
    let counter = Counter::new();
    let players = vec![Role::new(WHITE), Role::new(BLACK)];
    let setup = Setup::new(seed, "Standard", players);
    let mut state: GameState = counter.setup(&setup).unwrap();
    let mut entries = vec![ReplayEntry::setup(&setup).unwrap()];
    for &choice in choices {
        let actor = match state.active().candidates(&[]).first() {
            Some(role) => role.clone(),
            None => break,
        };
        let (verb, args) = match choice % 4 {
            0 if state.undo_depth() > 0 => ("undo", Value::Null),
            0 | 1 => ("add", json!(1 + i64::from(choice % 3))),
            2 => ("roll", Value::Null),
            _ => ("pass", Value::Null),
        };
        state = counter.action(state, &actor, verb, &args).unwrap();
        entries.push(ReplayEntry::action(actor, verb, args));
    }
    entries
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: collapsing never changes where the game ends up.
    #[test]
    fn prop_collapse_preserves_final_state(seed in 1u64..1_000_000, choices in proptest::collection::vec(any::<u8>(), 0..40)) {
        let entries = legal_game(seed, &choices);
        let normal = reconstruct(&Counter::new(), &entries, ReplayMode::Normal).unwrap();
        let debug = reconstruct(&Counter::new(), &entries, ReplayMode::Debug).unwrap();
        let cleaned = parse_records(&clean_replay(&normal.entries).unwrap()).unwrap();
        let replayed = reconstruct(&Counter::new(), &cleaned, ReplayMode::Debug).unwrap();
        prop_assert!(cleaned.len() <= entries.len());
        prop_assert_eq!(
            digest(replayed.state.as_ref().unwrap()).unwrap(),
            digest(debug.state.as_ref().unwrap()).unwrap()
        );
    }

    /// Property: a collapsed replay collapses to itself.
    #[test]
    fn prop_collapse_is_idempotent(seed in 1u64..1_000_000, choices in proptest::collection::vec(any::<u8>(), 0..40)) {
        let counter = Counter::new();
        let first = reconstruct(&counter, &legal_game(seed, &choices), ReplayMode::Normal).unwrap();
        let cleaned = parse_records(&clean_replay(&first.entries).unwrap()).unwrap();
        let second = reconstruct(&counter, &cleaned, ReplayMode::Normal).unwrap();
        prop_assert_eq!(first.entries, second.entries);
    }

    /// Property: the first entry is always a checkpoint, and every later
    /// checkpoint follows a change of `active`.
    #[test]
    fn prop_checkpoints_mark_turn_changes(seed in 1u64..1_000_000, choices in proptest::collection::vec(any::<u8>(), 0..40)) {
        let counter = Counter::new();
        let result = reconstruct(&counter, &legal_game(seed, &choices), ReplayMode::Normal).unwrap();
        let checkpoints = result.checkpoints();
        prop_assert_eq!(checkpoints.first().copied(), Some(0));

        let mut state: Option<GameState> = None;
        let mut actives = Vec::new();
        for annotated in &result.entries {
            let next = fortress_turns::replay::apply_entry(&counter, state.as_ref(), &annotated.entry).unwrap();
            actives.push(next.active_value().cloned());
            state = Some(next);
        }
        for &i in checkpoints.iter().skip(1) {
            prop_assert!(i >= 2);
            prop_assert_ne!(&actives[i - 1], &actives[i - 2]);
        }
    }

    /// Property: replaying the same log twice gives the same digests.
    #[test]
    fn prop_replay_is_deterministic(seed in 1u64..1_000_000, choices in proptest::collection::vec(any::<u8>(), 0..40)) {
        let entries = legal_game(seed, &choices);
        let a = reconstruct(&Counter::new(), &entries, ReplayMode::Normal).unwrap();
        let b = reconstruct(&Counter::new(), &entries, ReplayMode::Normal).unwrap();
        prop_assert_eq!(a, b);
    }
}
