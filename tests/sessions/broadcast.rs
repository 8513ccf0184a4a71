//! Broadcast and error routing across the viewers of one game.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use fortress_turns::{ConnectRequest, RegistryConfig, Role, ServerEvent, TurnsError};
use serde_json::{json, Value};

use crate::common::{shown_total, views, Table, BLACK, GAME, WHITE};

#[test]
fn accepted_action_is_projected_for_every_viewer() {
    let table = Table::new();
    let (ada, ada_sink) = table.join("ada");
    let (_, bob_sink) = table.join("bob");
    let (_, eve_sink) = table.join("eve");
    table.registry.start(GAME).unwrap();

    table.registry.apply(&ada, "add", &json!(2)).unwrap();

    for sink in [&ada_sink, &bob_sink, &eve_sink] {
        let view = sink.last_view().unwrap();
        assert_eq!(shown_total(&view), 2);
    }
    let ada_view = ada_sink.last_view().unwrap();
    assert!(ada_view.actions.contains_key("add"));
    assert!(ada_view.actions.contains_key("undo"));
    let bob_view = bob_sink.last_view().unwrap();
    assert!(bob_view.actions.is_empty());
    assert_eq!(bob_view.prompt.as_deref(), Some("Waiting for White."));
    assert!(eve_sink.last_view().unwrap().actions.is_empty());
}

#[test]
fn log_is_delivered_incrementally() {
    let table = Table::new();
    let (ada, ada_sink) = table.join("ada");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(1)).unwrap();
    table.registry.apply(&ada, "pass", &Value::Null).unwrap();

    let seen = views(&ada_sink);
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].log, vec!["Game started."]);
    assert_eq!(seen[0].log_start, 0);
    assert_eq!(seen[1].log, vec!["White adds 1."]);
    assert_eq!(seen[1].log_start, 1);
    assert_eq!(seen[2].log, vec!["White passes."]);
    assert_eq!(seen[2].log_start, 2);
}

#[test]
fn reconnect_resumes_from_log_position() {
    let table = Table::new();
    let (ada, _) = table.join("ada");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(1)).unwrap();
    table.registry.apply(&ada, "add", &json!(1)).unwrap();

    let (_, late) = table.connect(ConnectRequest::new(GAME, "bob").with_log_seen(2));
    let view = late.last_view().unwrap();
    assert_eq!(view.log_start, 2);
    assert_eq!(view.log, vec!["White adds 1."]);
}

#[test]
fn out_of_turn_action_is_reported_only_to_its_sender() {
    let table = Table::new();
    let (_, ada_sink) = table.join("ada");
    let (bob, bob_sink) = table.join("bob");
    table.registry.start(GAME).unwrap();
    let ada_before = ada_sink.len();

    let err = table.registry.apply(&bob, "add", &json!(1)).unwrap_err();
    assert!(matches!(err, TurnsError::NotYourTurn { .. }));
    assert_eq!(bob_sink.last_error().as_deref(), Some("It is not Black's turn."));
    assert_eq!(ada_sink.len(), ada_before);
}

#[test]
fn rules_rejection_leaves_stored_state_untouched() {
    let table = Table::new();
    let (ada, ada_sink) = table.join("ada");
    let (_, bob_sink) = table.join("bob");
    table.registry.start(GAME).unwrap();
    let bob_before = bob_sink.len();
    let before = table.registry.replay(GAME, fortress_turns::ReplayMode::Debug).unwrap();

    let err = table.registry.apply(&ada, "add", &json!(9)).unwrap_err();
    assert!(matches!(err, TurnsError::Rules(_)));
    assert_eq!(ada_sink.last_error().as_deref(), Some("Cannot add 9."));
    assert_eq!(bob_sink.len(), bob_before);

    let after = table.registry.replay(GAME, fortress_turns::ReplayMode::Debug).unwrap();
    assert_eq!(before, after);
}

#[test]
fn observers_cannot_act_and_say_so() {
    let table = Table::new();
    let (eve, eve_sink) = table.join("eve");
    assert!(eve.role().is_observer());
    table.registry.start(GAME).unwrap();

    let err = table.registry.apply(&eve, "add", &json!(1)).unwrap_err();
    assert_eq!(err, TurnsError::ObserverCannotAct);
    assert_eq!(eve_sink.last_error().as_deref(), Some("Observers cannot act."));
}

#[test]
fn finished_game_is_flagged_for_everyone() {
    let table = Table::with_scenario("Short", RegistryConfig::production());
    let (ada, ada_sink) = table.join("ada");
    let (_, bob_sink) = table.join("bob");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(3)).unwrap();
    table.registry.apply(&ada, "add", &json!(2)).unwrap();

    for sink in [&ada_sink, &bob_sink] {
        match sink.events().last() {
            Some(ServerEvent::State { view, game_over }) => {
                assert!(game_over);
                assert!(view.game_over);
                assert_eq!(view.prompt.as_deref(), Some("Game over."));
            },
            other => panic!("expected a final state, got {other:?}"),
        }
    }
    let err = table.registry.apply(&ada, "add", &json!(1)).unwrap_err();
    assert!(matches!(err, TurnsError::NotYourTurn { .. }));
}

#[test]
fn presence_tracks_seated_connections() {
    let table = Table::new();
    let (_, ada_sink) = table.join("ada");
    let (bob, _) = table.join("bob");
    let (_, _eve_sink) = table.join("eve");

    let presence = table.registry.presence(GAME);
    assert!(presence.is_present(&Role::new(WHITE)));
    assert!(presence.is_present(&Role::new(BLACK)));
    assert!(!presence.is_present(&Role::observer()));

    table.registry.disconnect(&bob).unwrap();
    match ada_sink.events().last() {
        Some(ServerEvent::Presence(presence)) => {
            assert!(presence.is_present(&Role::new(WHITE)));
            assert!(!presence.is_present(&Role::new(BLACK)));
        },
        other => panic!("expected presence, got {other:?}"),
    }
    assert_eq!(table.registry.connection_count(GAME), 2);
}

#[test]
fn closed_sink_does_not_block_the_others() {
    let table = Table::new();
    let (ada, ada_sink) = table.join("ada");
    let (_, bob_sink) = table.join("bob");
    table.registry.start(GAME).unwrap();
    bob_sink.close();

    table.registry.apply(&ada, "add", &json!(1)).unwrap();
    assert_eq!(shown_total(&ada_sink.last_view().unwrap()), 1);
}
