//! Rules stubs for integration tests.

use fortress_turns::{
    ActionArgs, GameState, Role, Rules, RulesError, RulesOperation, Scenarios, Setup, View,
};
use serde_json::{json, Map, Value};

pub const WHITE: &str = "White";
pub const BLACK: &str = "Black";

/// A race to a target total.
///
/// - `add` (1..=3) keeps the turn and can be undone;
/// - `roll` adds a die roll from the state's generator and passes the turn;
/// - `pass` hands the turn over;
/// - `undo` reverts the last `add`.
///
/// Reaching the target ends the game. `Short` races to 5, `Standard` to 20.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counter {
    /// Keep the undo stack across `pass`; a deliberately broken title.
    pub leak_undo: bool,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaky() -> Self {
        Self { leak_undo: true }
    }
}

fn total(state: &GameState) -> i64 {
    state.get("total").and_then(Value::as_i64).unwrap_or(0)
}

fn other(role: &Role) -> &'static str {
    if role == WHITE {
        BLACK
    } else {
        WHITE
    }
}

fn rejected(message: impl Into<String>) -> RulesError {
    RulesError::new(RulesOperation::Action, message)
}

impl Counter {
    fn hand_over(&self, state: &mut GameState, role: &Role) {
        state.set("active", json!(other(role)));
        if !self.leak_undo {
            state.set("undo", json!([]));
        }
    }

    fn finish_if_won(state: &mut GameState, role: &Role) {
        let target = state.get("target").and_then(Value::as_i64).unwrap_or(0);
        if total(state) >= target {
            state.set("active", json!("None"));
            state.set("state", json!("game_over"));
            state.set("undo", json!([]));
            state.push_log(format!("{role} wins."));
        }
    }
}

impl Rules for Counter {
    fn title(&self) -> &str {
        "counter"
    }

    fn scenarios(&self) -> Scenarios {
        Scenarios::List(vec!["Standard".to_owned(), "Short".to_owned()])
    }

    fn roles(&self, _scenario: &str, _options: &Map<String, Value>) -> Vec<Role> {
        vec![Role::new(WHITE), Role::new(BLACK)]
    }

    fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
        let target = match setup.scenario.as_str() {
            "Short" => 5,
            "Standard" => 20,
            other => {
                return Err(RulesError::new(
                    RulesOperation::Setup,
                    format!("Unknown scenario: {other}"),
                ))
            },
        };
        GameState::try_from(json!({
            "seed": setup.seed,
            "scenario": setup.scenario,
            "state": "play",
            "active": WHITE,
            "total": 0,
            "target": target,
            "log": ["Game started."],
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
        match verb {
            "add" => {
                let n = args.as_i64().unwrap_or(1);
                if !(1..=3).contains(&n) {
                    return Err(rejected(format!("Cannot add {n}.")));
                }
                let mut snapshot = state.clone();
                snapshot.as_map_mut().remove("undo");
                state.set("total", json!(total(&state) + n));
                state.push_log(format!("{role} adds {n}."));
                if let Some(Value::Array(stack)) = state.as_map_mut().get_mut("undo") {
                    stack.push(snapshot.into_value());
                }
                Self::finish_if_won(&mut state, role);
            },
            "roll" => {
                let die = i64::try_from(state.random(6)).unwrap_or(0) + 1;
                state.set("total", json!(total(&state) + die));
                state.push_log(format!("{role} rolls {die}."));
                self.hand_over(&mut state, role);
                Self::finish_if_won(&mut state, role);
            },
            "pass" => {
                state.push_log(format!("{role} passes."));
                self.hand_over(&mut state, role);
            },
            "undo" => {
                let mut stack = match state.get("undo") {
                    Some(Value::Array(stack)) => stack.clone(),
                    _ => Vec::new(),
                };
                let previous = stack.pop().ok_or_else(|| rejected("Nothing to undo."))?;
                let mut restored = GameState::try_from(previous)
                    .map_err(|err| rejected(err.to_string()))?;
                restored.set("undo", Value::Array(stack));
                return Ok(restored);
            },
            other => return Err(rejected(format!("Unknown action: {other}"))),
        }
        Ok(state)
    }

    fn resign(&self, mut state: GameState, role: &Role) -> Result<GameState, RulesError> {
        state.set("active", json!("None"));
        state.set("state", json!("game_over"));
        state.push_log(format!("{role} resigns."));
        Ok(state)
    }

    fn view(&self, state: &GameState, role: &Role) -> Result<View, RulesError> {
        let active = state.active();
        let mut view = if active.includes(role) {
            let mut view = View::with_prompt("Add, roll or pass.")
                .with_action(
                    "add",
                    ActionArgs::Choices(vec![json!(1), json!(2), json!(3)]),
                )
                .with_action("roll", ActionArgs::Flag(true))
                .with_action("pass", ActionArgs::Flag(true));
            if state.undo_depth() > 0 {
                view = view.with_action("undo", ActionArgs::Flag(true));
            }
            view
        } else if active.is_terminal() {
            View::with_prompt("Game over.")
        } else {
            View::with_prompt(format!("Waiting for {active}."))
        };
        view.log = state
            .log()
            .iter()
            .map(|line| line.as_str().unwrap_or_default().to_owned())
            .collect();
        view.extra.insert("total".to_owned(), json!(total(state)));
        Ok(view)
    }

    fn query(
        &self,
        state: &GameState,
        _role: &Role,
        name: &str,
        _params: &Value,
    ) -> Result<Value, RulesError> {
        match name {
            "total" => Ok(json!(total(state))),
            other => Err(RulesError::new(
                RulesOperation::Query,
                format!("Unknown query: {other}"),
            )),
        }
    }

    fn assert_state(&self, state: &GameState) -> Result<(), RulesError> {
        if total(state) < 0 {
            return Err(RulesError::new(RulesOperation::Assert, "negative total"));
        }
        Ok(())
    }
}
