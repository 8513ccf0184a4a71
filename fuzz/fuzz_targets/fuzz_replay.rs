//! Fuzz target for replay reconstruction.
//!
//! Structured input picks a seed and a sequence of moves for a tiny title
//! with undo. Illegal moves are kept on purpose so that failure paths are
//! exercised too.
//!
//! # Safety Properties Tested
//! - Debug mode never returns `Err`, whatever the log contains
//! - Normal mode fails exactly when debug mode records a failure
//! - A cleaned replay collapses to itself

#![no_main]

use arbitrary::Arbitrary;
use fortress_turns::replay::{clean_replay, parse_records};
use fortress_turns::{
    reconstruct, ActionArgs, GameState, ReplayEntry, ReplayMode, Role, Rules, RulesError,
    RulesOperation, Scenarios, Setup, View,
};
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Map, Value};

#[derive(Debug, Arbitrary)]
struct ReplayInput {
    seed: u32,
    moves: Vec<Move>,
}

#[derive(Debug, Arbitrary)]
enum Move {
    Push { second: bool, value: u8 },
    Undo { second: bool },
    Pass { second: bool },
}

/// Players push values onto a stack; `push` is undoable, `pass` ends the turn.
struct Stack;

impl Rules for Stack {
    fn title(&self) -> &str {
        "stack"
    }
    fn scenarios(&self) -> Scenarios {
        Scenarios::List(vec!["Standard".to_owned()])
    }
    fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
        vec![Role::new("A"), Role::new("B")]
    }
    fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
        GameState::try_from(json!({
            "seed": setup.seed,
            "active": "A",
            "items": [],
            "log": [],
            "undo": []
        }))
        .map_err(|err| RulesError::new(RulesOperation::Setup, err.to_string()))
    }
    fn action(
        &self,
        mut state: GameState,
        role: &Role,
        verb: &str,
        args: &Value,
    ) -> Result<GameState, RulesError> {
        let reject = |msg: &str| RulesError::new(RulesOperation::Action, msg);
        if !state.active().includes(role) {
            return Err(reject("out of turn"));
        }
        let map = state.as_map_mut();
        match verb {
            "push" => {
                let mut snapshot = map.clone();
                snapshot.remove("undo");
                if let Some(Value::Array(items)) = map.get_mut("items") {
                    items.push(args.clone());
                }
                if let Some(Value::Array(undo)) = map.get_mut("undo") {
                    undo.push(Value::Object(snapshot));
                }
                state.push_log(format!("{role} pushes."));
                Ok(state)
            },
            "undo" => {
                let Some(Value::Array(mut undo)) = map.remove("undo") else {
                    return Err(reject("no undo stack"));
                };
                let Some(Value::Object(previous)) = undo.pop() else {
                    return Err(reject("nothing to undo"));
                };
                let mut restored = GameState::new(previous);
                restored.set("undo", Value::Array(undo));
                Ok(restored)
            },
            "pass" => {
                let next = if role == "A" { "B" } else { "A" };
                state.set("active", json!(next));
                state.set("undo", json!([]));
                state.push_log(format!("{role} passes."));
                Ok(state)
            },
            other => Err(reject(other)),
        }
    }
    fn resign(&self, mut state: GameState, _: &Role) -> Result<GameState, RulesError> {
        state.set("active", json!("None"));
        Ok(state)
    }
    fn view(&self, state: &GameState, role: &Role) -> Result<View, RulesError> {
        let mut view = View::default();
        if state.active().includes(role) {
            view = view
                .with_action("push", ActionArgs::Flag(true))
                .with_action("pass", ActionArgs::Flag(true));
        }
        Ok(view)
    }
}

fn role(second: bool) -> Role {
    Role::new(if second { "B" } else { "A" })
}

fuzz_target!(|input: ReplayInput| {
    let setup = Setup::new(
        u64::from(input.seed) + 1,
        "Standard",
        vec![Role::new("A"), Role::new("B")],
    );
    let mut entries = vec![ReplayEntry::setup(&setup).expect("setup serializes")];
    for m in input.moves.iter().take(256) {
        entries.push(match m {
            Move::Push { second, value } => ReplayEntry::action(role(*second), "push", json!(value)),
            Move::Undo { second } => ReplayEntry::action(role(*second), "undo", Value::Null),
            Move::Pass { second } => ReplayEntry::action(role(*second), "pass", Value::Null),
        });
    }

    let debug = reconstruct(&Stack, &entries, ReplayMode::Debug).expect("debug mode never fails");
    let normal = reconstruct(&Stack, &entries, ReplayMode::Normal);
    assert_eq!(normal.is_err(), debug.failure.is_some());

    if let Ok(normal) = normal {
        assert_eq!(normal.state, debug.state);
        let cleaned = parse_records(&clean_replay(&normal.entries).expect("clean"))
            .expect("cleaned records parse");
        let again = reconstruct(&Stack, &cleaned, ReplayMode::Normal).expect("cleaned replay runs");
        assert_eq!(again.entries, normal.entries);
    }
});
