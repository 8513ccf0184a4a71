//! Fuzz target for the random-walk driver.
//!
//! The corpus bytes are the driver's entropy: libFuzzer mutates them to reach
//! new branches of the title below. The title is sound, so any crash report
//! other than running out of budget is a bug in the driver or the title.
//!
//! # Safety Properties Tested
//! - No panics while walking
//! - No `BadUndo`, `RulesFailed` or `AssertionFailed` for a sound title
//! - Every crash artifact reproduces its state

#![no_main]

use fortress_turns::{
    ActionArgs, BufferEntropy, FuzzConfig, FuzzDriver, FuzzViolation, GameState, Role, Rules,
    RulesError, RulesOperation, Scenarios, Setup, View,
};
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Map, Value};
use web_time::Duration;

/// Subtraction game: take 1 to 3 stones; whoever takes the last one wins.
struct Nim;

fn heap(state: &GameState) -> i64 {
    state.get("heap").and_then(Value::as_i64).unwrap_or(0)
}

impl Rules for Nim {
    fn title(&self) -> &str {
        "nim"
    }
    fn scenarios(&self) -> Scenarios {
        Scenarios::List(vec!["Small".to_owned(), "Large".to_owned()])
    }
    fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
        vec![Role::new("First"), Role::new("Second")]
    }
    fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
        let mut state = GameState::try_from(json!({
            "seed": setup.seed,
            "active": "First",
            "heap": 0,
            "log": [],
            "undo": []
        }))
        .map_err(|err| RulesError::new(RulesOperation::Setup, err.to_string()))?;
        let size = if setup.scenario == "Large" { 40 } else { 10 };
        let heap = i64::try_from(state.random(size)).unwrap_or(0) + 5;
        state.set("heap", json!(heap));
        Ok(state)
    }
    fn action(
        &self,
        mut state: GameState,
        role: &Role,
        verb: &str,
        args: &Value,
    ) -> Result<GameState, RulesError> {
        if verb != "take" {
            return Err(RulesError::new(RulesOperation::Action, format!("no {verb}")));
        }
        let n = args.as_i64().unwrap_or(0);
        if !(1..=3).contains(&n) || n > heap(&state) {
            return Err(RulesError::new(RulesOperation::Action, format!("cannot take {n}")));
        }
        state.set("heap", json!(heap(&state) - n));
        state.push_log(format!("{role} takes {n}."));
        if heap(&state) == 0 {
            state.set("active", json!("None"));
            state.set("state", json!("game_over"));
        } else {
            let next = if role == "First" { "Second" } else { "First" };
            state.set("active", json!(next));
        }
        Ok(state)
    }
    fn resign(&self, mut state: GameState, _: &Role) -> Result<GameState, RulesError> {
        state.set("active", json!("None"));
        Ok(state)
    }
    fn view(&self, state: &GameState, role: &Role) -> Result<View, RulesError> {
        let mut view = View::with_prompt(format!("{} stones left.", heap(state)));
        if state.active().includes(role) {
            let choices = (1..=heap(state).min(3)).map(|n| json!(n)).collect();
            view = view.with_action("take", ActionArgs::Choices(choices));
        }
        Ok(view)
    }
    fn assert_state(&self, state: &GameState) -> Result<(), RulesError> {
        if heap(state) < 0 {
            return Err(RulesError::new(RulesOperation::Assert, "negative heap"));
        }
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let mut driver = FuzzDriver::new(FuzzConfig {
        max_steps: 64,
        timeout: Duration::from_secs(1),
        ..FuzzConfig::default()
    })
    .expect("valid config");
    let mut entropy = BufferEntropy::new(data);
    let Some(report) = driver.run(&Nim, &mut entropy).expect("in-memory runs cannot fail") else {
        return;
    };
    match report.violation {
        FuzzViolation::MaxSteps | FuzzViolation::Timeout => {},
        other => panic!("sound title crashed: {other}"),
    }
    assert_eq!(
        report.artifact.reproduce(&Nim).expect("artifact reproduces"),
        report.artifact.state
    );
});
