//! # Replay Inspector
//!
//! Plays a short game of Pig through a connection registry, the way a socket
//! server would, then reconstructs the stored replay and walks it turn by turn.
//!
//! Run with: `cargo run --example replay_inspect -- --seed 7`
//!
//! `--cheat` lets the players reroll, so the collapsed replay differs from
//! the raw one. `--clean` prints the collapsed replay as JSON.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::disallowed_macros,
    clippy::expect_used
)]

mod pig;

use std::sync::Arc;

use clap::Parser;
use fortress_turns::replay::clean_replay;
use fortress_turns::{
    CollectingSink, ConnectRequest, ConnectionRegistry, GameId, GameRecord, MemoryStore,
    ReplayMode, ReplayNavigator, RulesRegistry, Seat,
};
use pig::Pig;
use serde_json::Value;

const GAME: GameId = GameId::new(1);

#[derive(Parser)]
struct Opt {
    /// Game seed.
    #[arg(short, long, default_value_t = 7)]
    seed: u64,
    /// Actions to play before inspecting.
    #[arg(short, long, default_value_t = 40)]
    actions: usize,
    /// Allow rerolling dice.
    #[arg(long)]
    cheat: bool,
    /// Print the collapsed replay as JSON.
    #[arg(long)]
    clean: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::INFO)
            .finish(),
    )
    .expect("setting up tracing subscriber failed");
    let opt = Opt::parse();
    let rules = Pig { cheat: opt.cheat };

    let store = Arc::new(MemoryStore::new());
    store.create_game(
        GAME,
        GameRecord::new("pig", "Two players").with_seed(opt.seed),
        vec![Seat::new("Red", "ada"), Seat::new("Blue", "bob")],
    );
    let registry = ConnectionRegistry::new(
        Arc::new(RulesRegistry::new().with(Arc::new(rules))),
        store,
    );

    let red_sink = Arc::new(CollectingSink::new());
    let blue_sink = Arc::new(CollectingSink::new());
    let red = registry.connect(ConnectRequest::new(GAME, "ada"), red_sink.clone())?;
    let blue = registry.connect(ConnectRequest::new(GAME, "bob"), blue_sink.clone())?;
    registry.start(GAME)?;

    // Each player rolls until the turn total reaches 8, then holds. With
    // cheating on, every third roll is taken back.
    for step in 0..opt.actions {
        let (handle, sink) = if red_sink
            .last_view()
            .is_some_and(|view| !view.actions.is_empty())
        {
            (&red, &red_sink)
        } else {
            (&blue, &blue_sink)
        };
        let Some(view) = sink.last_view() else { break };
        if view.game_over {
            break;
        }
        let holding = view
            .prompt
            .as_deref()
            .and_then(|p| p.split(['(', ' ']).find_map(|w| w.parse::<i64>().ok()))
            .is_some_and(|turn| turn >= 8);
        let verb = if holding { "hold" } else { "roll" };
        if let Err(err) = registry.apply(handle, verb, &Value::Null) {
            eprintln!("{verb} rejected: {err}");
            break;
        }
        let undo_offered = sink
            .last_view()
            .is_some_and(|view| view.actions.contains_key("undo"));
        if opt.cheat && verb == "roll" && step % 3 == 2 && undo_offered {
            registry.apply(handle, "undo", &Value::Null)?;
        }
    }

    let normal = registry.replay(GAME, ReplayMode::Normal)?;
    let debug = registry.replay(GAME, ReplayMode::Debug)?;
    println!(
        "{} stored actions, {} after collapsing, checkpoints at {:?}",
        debug.entries.len(),
        normal.entries.len(),
        normal.checkpoints()
    );

    let mut nav = ReplayNavigator::new(&rules, normal.entries.clone());
    loop {
        let position = nav.next_checkpoint();
        let state = nav.state()?;
        let scores = state
            .as_ref()
            .and_then(|s| s.get("scores"))
            .map_or_else(String::new, Value::to_string);
        let active = state.as_ref().map(|s| s.active().to_string()).unwrap_or_default();
        println!("  at {position:>3}: {active} to play, scores {scores}");
        if position == nav.len() {
            break;
        }
    }

    if opt.clean {
        let records = clean_replay(&normal.entries)?;
        println!("{}", serde_json::to_string_pretty(&records)?);
    }
    Ok(())
}
