//! Ordering under concurrent callers.
//!
//! Every viewer of a game must see the states in the order they were
//! committed, one broadcast per accepted action, however many threads are
//! submitting actions or joining at the same time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use fortress_turns::{
    CollectingSink, ConnectRequest, ConnectionRegistry, GameId, GameRecord, MemoryStore,
    RulesRegistry, Seat,
};
use serde_json::json;

use crate::common::{shown_total, views, Counter, Table, BLACK, GAME, WHITE};

const THREADS: usize = 4;
const ADDS_PER_THREAD: usize = 10;
const TARGET: i64 = 20;

fn totals(sink: &CollectingSink) -> Vec<i64> {
    views(sink).iter().map(shown_total).collect()
}

#[test]
fn concurrent_actions_are_serialized_per_game() {
    let table = Table::new();
    let (ada, ada_sink) = table.join("ada");
    let (_, eve_sink) = table.join("eve");
    table.registry.start(GAME).unwrap();
    let accepted = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ADDS_PER_THREAD {
                    if table.registry.apply(&ada, "add", &json!(1)).is_ok() {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(accepted.load(Ordering::SeqCst), 20);
    let expected: Vec<i64> = (0..=TARGET).collect();
    assert_eq!(totals(&eve_sink), expected);
    assert_eq!(totals(&ada_sink), expected);
}

#[test]
fn late_joiners_see_a_gapless_suffix() {
    let table = Table::new();
    let (ada, _) = table.join("ada");
    table.registry.start(GAME).unwrap();
    let mut joiners = Vec::new();

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..TARGET {
                table.registry.apply(&ada, "add", &json!(1)).unwrap();
            }
        });
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let table = &table;
                scope.spawn(move || table.join(&format!("watcher-{i}")))
            })
            .collect();
        for handle in handles {
            joiners.push(handle.join().unwrap());
        }
    });

    for (_, sink) in &joiners {
        let seen = totals(sink);
        assert!(!seen.is_empty());
        assert_eq!(*seen.last().unwrap(), TARGET);
        for pair in seen.windows(2) {
            assert_eq!(pair[1], pair[0] + 1, "gap in {seen:?}");
        }
    }
    assert_eq!(table.registry.connection_count(GAME), 1 + THREADS);
}

#[test]
fn games_progress_independently() {
    let store = Arc::new(MemoryStore::new());
    let games: Vec<GameId> = (1..=4).map(GameId::new).collect();
    for &game in &games {
        store.create_game(
            game,
            GameRecord::new("counter", "Standard").with_seed(game.as_u64()),
            vec![Seat::new(WHITE, "ada"), Seat::new(BLACK, "bob")],
        );
    }
    let rules = Arc::new(RulesRegistry::new().with(Arc::new(Counter::new())));
    let registry = ConnectionRegistry::new(rules, store);

    thread::scope(|scope| {
        for &game in &games {
            let registry = &registry;
            scope.spawn(move || {
                let sink = Arc::new(CollectingSink::new());
                let ada = registry
                    .connect(ConnectRequest::new(game, "ada"), sink.clone())
                    .unwrap();
                registry.start(game).unwrap();
                for _ in 0..TARGET {
                    registry.apply(&ada, "add", &json!(1)).unwrap();
                }
                assert_eq!(totals(&sink), (0..=TARGET).collect::<Vec<_>>());
                registry.disconnect(&ada).unwrap();
            });
        }
    });

    assert_eq!(registry.game_count(), 0);
}
