//! Start, resign, debug events, chat and stored replays.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;

use fortress_turns::telemetry::{CollectingObserver, ViolationKind};
use fortress_turns::{
    ClientEvent, ConnectRequest, ConnectionRegistry, GameStore, ReplayMode, ReplayRecord,
    RulesRegistry, ServerEvent, TurnsError,
};
use serde_json::{json, Value};

use crate::common::{shown_total, Counter, Table, BLACK, GAME};

#[test]
fn connect_announces_role_and_roster() {
    let table = Table::new();
    let (ada, sink) = table.join("ada");
    assert_eq!(ada.role().as_str(), "White");
    match &sink.events()[0] {
        ServerEvent::Roles { role, players } => {
            assert_eq!(role.as_str(), "White");
            assert_eq!(players.len(), 2);
        },
        other => panic!("expected roles first, got {other:?}"),
    }
}

#[test]
fn claiming_someone_elses_seat_is_refused() {
    let table = Table::new();
    let sink = std::sync::Arc::new(fortress_turns::CollectingSink::new());
    let err = table
        .registry
        .connect(ConnectRequest::new(GAME, "eve").with_role(BLACK), sink)
        .unwrap_err();
    assert!(matches!(err, TurnsError::RoleMismatch { .. }));
    assert_eq!(table.registry.game_count(), 0);
}

#[test]
fn acting_before_start_is_refused() {
    let table = Table::new();
    let (ada, sink) = table.join("ada");
    let err = table.registry.apply(&ada, "add", &json!(1)).unwrap_err();
    assert_eq!(err, TurnsError::GameNotStarted { game: GAME });
    assert!(sink.last_error().is_some());
}

#[test]
fn starting_twice_is_refused() {
    let table = Table::new();
    table.registry.start(GAME).unwrap();
    assert!(matches!(
        table.registry.start(GAME),
        Err(TurnsError::InvalidRequest { .. })
    ));
}

#[test]
fn resignation_is_allowed_out_of_turn() {
    let table = Table::new();
    let (_, ada_sink) = table.join("ada");
    let (bob, _) = table.join("bob");
    table.registry.start(GAME).unwrap();

    table.registry.resign(&bob).unwrap();
    let view = ada_sink.last_view().unwrap();
    assert!(view.game_over);
    assert_eq!(view.log, vec!["Black resigns."]);
}

#[test]
fn socket_events_dispatch() {
    let table = Table::new();
    let (ada, sink) = table.join("ada");
    table.registry.start(GAME).unwrap();

    table
        .registry
        .handle_event(
            &ada,
            serde_json::from_value(json!({"event": "action", "data": {"verb": "add", "args": 3}}))
                .unwrap(),
        )
        .unwrap();
    table
        .registry
        .handle_event(
            &ada,
            ClientEvent::Query {
                name: "total".to_owned(),
                params: Value::Null,
            },
        )
        .unwrap();
    assert_eq!(
        sink.events().last(),
        Some(&ServerEvent::Reply {
            name: "total".to_owned(),
            value: json!(3)
        })
    );

    let err = table
        .registry
        .handle_event(
            &ada,
            ClientEvent::Query {
                name: "score".to_owned(),
                params: Value::Null,
            },
        )
        .unwrap_err();
    assert!(matches!(err, TurnsError::Rules(_)));
    assert_eq!(sink.last_error().as_deref(), Some("Unknown query: score"));
}

#[test]
fn chat_reaches_everyone_once() {
    let table = Table::new();
    let (ada, ada_sink) = table.join("ada");
    let (bob, bob_sink) = table.join("bob");

    table.registry.chat(&ada, "good luck").unwrap();
    table.registry.chat(&bob, "you too").unwrap();

    for sink in [&ada_sink, &bob_sink] {
        let lines: Vec<String> = sink.chat_entries().into_iter().map(|e| e.message).collect();
        assert_eq!(lines, vec!["good luck", "you too"]);
    }

    // A reconnecting client asks for what it missed.
    table
        .registry
        .handle_event(&bob, ClientEvent::GetChat { seen: 1 })
        .unwrap();
    match bob_sink.events().last() {
        Some(ServerEvent::Chat { cursor, entries }) => {
            assert_eq!(*cursor, 1);
            assert_eq!(entries.len(), 1);
        },
        other => panic!("expected chat, got {other:?}"),
    }
}

#[test]
fn debug_events_are_refused_in_production() {
    let table = Table::new();
    let (ada, sink) = table.join("ada");
    table.registry.start(GAME).unwrap();
    assert_eq!(
        table.registry.save(&ada).unwrap_err(),
        TurnsError::DebugEventsDisabled
    );
    assert_eq!(
        sink.last_error().as_deref(),
        Some("Debug events are disabled on this server.")
    );
}

#[test]
fn save_then_restore_round_trips_state() {
    let table = Table::development();
    let (ada, sink) = table.join("ada");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(2)).unwrap();

    table.registry.handle_event(&ada, ClientEvent::Save).unwrap();
    let saved = match sink.events().last() {
        Some(ServerEvent::Save { state }) => state.clone(),
        other => panic!("expected save, got {other:?}"),
    };

    table.registry.apply(&ada, "add", &json!(3)).unwrap();
    assert_eq!(shown_total(&sink.last_view().unwrap()), 5);

    table
        .registry
        .handle_event(&ada, ClientEvent::Restore { state: saved })
        .unwrap();
    let view = sink.last_view().unwrap();
    assert_eq!(shown_total(&view), 2);
    // Cursors are reset, so the whole log is resent.
    assert_eq!(view.log_start, 0);
    assert!(table.store.replay(GAME).unwrap().is_empty());
}

#[test]
fn restart_sets_up_a_fresh_game() {
    let table = Table::development();
    let (ada, sink) = table.join("ada");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(3)).unwrap();

    table
        .registry
        .handle_event(
            &ada,
            ClientEvent::Restart {
                scenario: "Short".to_owned(),
            },
        )
        .unwrap();
    assert_eq!(shown_total(&sink.last_view().unwrap()), 0);
    let replay = table.store.replay(GAME).unwrap();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].action, ".setup");

    assert!(matches!(
        table.registry.restart(&ada, "Marathon"),
        Err(TurnsError::InvalidRequest { .. })
    ));
}

#[test]
fn stored_replay_collapses_undone_moves() {
    let table = Table::new();
    let (ada, _) = table.join("ada");
    let (bob, _) = table.join("bob");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(1)).unwrap();
    table.registry.apply(&ada, "add", &json!(2)).unwrap();
    table.registry.apply(&ada, "undo", &Value::Null).unwrap();
    table.registry.apply(&ada, "pass", &Value::Null).unwrap();
    table.registry.apply(&bob, "add", &json!(3)).unwrap();

    let normal = table.registry.replay(GAME, ReplayMode::Normal).unwrap();
    let actions: Vec<&str> = normal
        .entries
        .iter()
        .map(|e| e.entry.action.as_str())
        .collect();
    assert_eq!(actions, vec![".setup", "add", "pass", "add"]);
    assert_eq!(normal.checkpoints(), vec![0, 3]);
    assert!(normal.is_complete());

    let debug = table.registry.replay(GAME, ReplayMode::Debug).unwrap();
    assert_eq!(debug.entries.len(), 6);
    assert_eq!(debug.state, normal.state);
    assert_eq!(
        normal.state.unwrap().get("total"),
        Some(&json!(4))
    );
}

#[test]
fn unplayable_replay_serves_the_stored_state() {
    let table = Table::new();
    let (ada, _) = table.join("ada");
    table.registry.start(GAME).unwrap();
    table.registry.apply(&ada, "add", &json!(3)).unwrap();
    let stored = table.store.load_state(GAME).unwrap().unwrap();
    // A record the rules no longer accept, e.g. after a rules upgrade.
    table
        .store
        .save_state(GAME, &stored, Some(ReplayRecord::new(BLACK, "teleport", None)))
        .unwrap();

    let observer = Arc::new(CollectingObserver::new());
    let rules = Arc::new(RulesRegistry::new().with(Arc::new(Counter::new())));
    let registry = ConnectionRegistry::new(rules, table.store.clone())
        .with_violation_observer(observer.clone());

    let normal = registry.replay(GAME, ReplayMode::Normal).unwrap();
    assert_eq!(normal.state, Some(stored));
    assert!(normal.entries.is_empty());
    assert!(matches!(
        normal.failure,
        Some(TurnsError::ReplayCorrupt { step: 2, .. })
    ));
    assert!(observer.has_violation(ViolationKind::Replay));

    let debug = registry.replay(GAME, ReplayMode::Debug).unwrap();
    assert_eq!(debug.entries.len(), 2);
}

#[test]
fn last_disconnect_drops_the_room() {
    let table = Table::new();
    let (ada, _) = table.join("ada");
    assert_eq!(table.registry.game_count(), 1);
    table.registry.disconnect(&ada).unwrap();
    assert_eq!(table.registry.game_count(), 0);
    assert!(matches!(
        table.registry.disconnect(&ada),
        Err(TurnsError::UnknownConnection { .. })
    ));
}
