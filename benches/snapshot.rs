//! Benchmarks for snapshot digests, the generators and replay reconstruction
//!
//! Run with: cargo bench --bench snapshot
//!
//! Reconstruction digests every step, so digest cost dominates replay time
//! for long games with large states.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fortress_turns::rng::{ExtendedRng, Rng, StandardRng};
use fortress_turns::snapshot::{digest, encode};
use fortress_turns::GameState;
use serde_json::{json, Map, Value};
use std::hint::black_box;

/// A board-game-like state: `cells` map entries, a long log and a deep undo stack
fn board_state(cells: usize) -> GameState {
    let mut map = Map::new();
    map.insert("seed".to_owned(), json!(12_345));
    map.insert("active".to_owned(), json!("Red"));
    let board: Map<String, Value> = (0..cells)
        .map(|i| (format!("cell{i:04}"), json!({ "piece": i % 7, "hp": i % 13 })))
        .collect();
    map.insert("board".to_owned(), Value::Object(board));
    let log: Vec<Value> = (0..cells).map(|i| json!(format!("Move {i}."))).collect();
    map.insert("log".to_owned(), Value::Array(log));
    map.insert("undo".to_owned(), Value::Array(vec![json!({ "x": 1 }); 32]));
    GameState::new(map)
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");

    for cells in [16, 256, 4096] {
        let state = board_state(cells);
        let bytes = encode(&state).map(|b| b.len()).unwrap_or(0);
        group.throughput(Throughput::Bytes(u64::try_from(bytes).unwrap_or(u64::MAX)));
        group.bench_with_input(BenchmarkId::new("encode", cells), &state, |b, state| {
            b.iter(|| encode(black_box(state)));
        });
        group.bench_with_input(BenchmarkId::new("digest", cells), &state, |b, state| {
            b.iter(|| digest(black_box(state)));
        });
    }

    group.finish();
}

fn bench_rng(c: &mut Criterion) {
    let mut group = c.benchmark_group("rng");
    group.throughput(Throughput::Elements(1));

    group.bench_function("standard_next", |b| {
        let mut rng = StandardRng::new(1);
        b.iter(|| rng.next(black_box(100)));
    });
    group.bench_function("extended_next", |b| {
        let mut rng = ExtendedRng::new(1);
        b.iter(|| rng.next(black_box(100)));
    });
    group.bench_function("shuffle_52", |b| {
        let mut rng = StandardRng::new(1);
        let mut deck: Vec<u32> = (0..52).collect();
        b.iter(|| rng.shuffle(black_box(&mut deck)));
    });

    group.finish();
}

criterion_group!(benches, bench_digest, bench_rng);
criterion_main!(benches);
