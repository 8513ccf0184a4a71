//! Pig, the dice game, as a demo title.
//!
//! On your turn, `roll` a die as often as you like: a 1 loses everything you
//! rolled this turn and passes the turn; anything else adds to your turn total.
//! `hold` banks the turn total. First to 50 wins.

use fortress_turns::{
    ActionArgs, GameState, Role, Rules, RulesError, RulesOperation, Scenarios, Setup, View,
};
use serde_json::{json, Map, Value};

pub const GOAL: i64 = 50;

/// The Pig rules. With `cheat` set, rolls can be undone, which lets a player
/// reroll a 1; the fuzz driver catches that as a bad undo.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pig {
    pub cheat: bool,
}

fn number(state: &GameState, key: &str) -> i64 {
    state.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn score(state: &GameState, role: &Role) -> i64 {
    state
        .get("scores")
        .and_then(|scores| scores.get(role.as_str()))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn reject(message: impl Into<String>) -> RulesError {
    RulesError::new(RulesOperation::Action, message)
}

impl Pig {
    fn pass_turn(&self, state: &mut GameState, players: &[Role], role: &Role) {
        let next = players
            .iter()
            .position(|p| p == role)
            .map_or(0, |i| (i + 1) % players.len().max(1));
        if let Some(next) = players.get(next) {
            state.set("active", json!(next.as_str()));
        }
        state.set("turn", json!(0));
        if !self.cheat {
            state.set("undo", json!([]));
        }
    }
}

fn players(state: &GameState) -> Vec<Role> {
    match state.get("players") {
        Some(Value::Array(players)) => players
            .iter()
            .filter_map(Value::as_str)
            .map(Role::new)
            .collect(),
        _ => Vec::new(),
    }
}

impl Rules for Pig {
    fn title(&self) -> &str {
        "pig"
    }

    fn scenarios(&self) -> Scenarios {
        Scenarios::List(vec!["Two players".to_owned(), "Three players".to_owned()])
    }

    fn roles(&self, scenario: &str, _options: &Map<String, Value>) -> Vec<Role> {
        let mut roles = vec![Role::new("Red"), Role::new("Blue")];
        if scenario == "Three players" {
            roles.push(Role::new("Green"));
        }
        roles
    }

    fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
        let scores: Map<String, Value> = setup
            .players
            .iter()
            .map(|role| (role.as_str().to_owned(), json!(0)))
            .collect();
        let first = setup
            .players
            .first()
            .ok_or_else(|| RulesError::new(RulesOperation::Setup, "no players"))?;
        GameState::try_from(json!({
            "seed": setup.seed,
            "state": "play",
            "players": setup.players,
            "active": first,
            "scores": scores,
            "turn": 0,
            "log": [format!("{} players race to {}.", setup.players.len(), GOAL)],
            "undo": []
        }))
        .map_err(|err| RulesError::new(RulesOperation::Setup, err.to_string()))
    }

    fn action(
        &self,
        mut state: GameState,
        role: &Role,
        verb: &str,
        _args: &Value,
    ) -> Result<GameState, RulesError> {
        let seats = players(&state);
        match verb {
            "roll" => {
                if self.cheat {
                    let mut snapshot = state.clone();
                    snapshot.as_map_mut().remove("undo");
                    if let Some(Value::Array(stack)) = state.as_map_mut().get_mut("undo") {
                        stack.push(snapshot.into_value());
                    }
                }
                let die = state.random(6) + 1;
                if die == 1 {
                    state.push_log(format!("{role} rolls a 1 and loses the turn."));
                    self.pass_turn(&mut state, &seats, role);
                } else {
                    let turn = number(&state, "turn") + i64::try_from(die).unwrap_or(0);
                    state.set("turn", json!(turn));
                    state.push_log(format!("{role} rolls {die} ({turn} this turn)."));
                }
            },
            "hold" => {
                let banked = score(&state, role) + number(&state, "turn");
                if let Some(Value::Object(scores)) = state.as_map_mut().get_mut("scores") {
                    scores.insert(role.as_str().to_owned(), json!(banked));
                }
                state.push_log(format!("{role} holds at {banked}."));
                if banked >= GOAL {
                    state.set("active", json!("None"));
                    state.set("state", json!("game_over"));
                    state.set("undo", json!([]));
                    state.push_log(format!("{role} wins."));
                } else {
                    self.pass_turn(&mut state, &seats, role);
                }
            },
            "undo" if self.cheat => {
                let mut stack = match state.get("undo") {
                    Some(Value::Array(stack)) => stack.clone(),
                    _ => Vec::new(),
                };
                let previous = stack.pop().ok_or_else(|| reject("Nothing to undo."))?;
                let mut restored =
                    GameState::try_from(previous).map_err(|err| reject(err.to_string()))?;
                restored.set("undo", Value::Array(stack));
                return Ok(restored);
            },
            other => return Err(reject(format!("Unknown action: {other}"))),
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
        let mut view = if state.active().includes(role) {
            let turn = number(state, "turn");
            let mut view = View::with_prompt(format!("Roll or hold ({turn} this turn)."))
                .with_action("roll", ActionArgs::Flag(true))
                .with_action("hold", ActionArgs::Flag(turn > 0));
            if self.cheat && state.undo_depth() > 0 {
                view = view.with_action("undo", ActionArgs::Flag(true));
            }
            view
        } else {
            View::with_prompt(format!("Waiting for {}.", state.active()))
        };
        view.log = state
            .log()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
        if let Some(scores) = state.get("scores") {
            view.extra.insert("scores".to_owned(), scores.clone());
        }
        Ok(view)
    }

    fn query(
        &self,
        state: &GameState,
        role: &Role,
        name: &str,
        _params: &Value,
    ) -> Result<Value, RulesError> {
        match name {
            "score" => Ok(json!(score(state, role))),
            other => Err(RulesError::new(
                RulesOperation::Query,
                format!("Unknown query: {other}"),
            )),
        }
    }

    fn assert_state(&self, state: &GameState) -> Result<(), RulesError> {
        let seats = players(state);
        if number(state, "turn") < 0 || seats.iter().any(|role| score(state, role) < 0) {
            return Err(RulesError::new(RulesOperation::Assert, "negative score"));
        }
        Ok(())
    }
}
