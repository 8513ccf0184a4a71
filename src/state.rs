//! The opaque, rules-owned game state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rng::{Rng, StandardRng};
use crate::{Active, TurnsError, GAME_OVER};

/// Field names this crate recognizes inside a state object.
pub mod fields {
    /// Role(s) entitled to act.
    pub const ACTIVE: &str = "active";
    /// Free-form status token.
    pub const STATE: &str = "state";
    /// Append-only human-readable log.
    pub const LOG: &str = "log";
    /// Stack of earlier snapshots that `undo` pops.
    pub const UNDO: &str = "undo";
    /// PRNG seed.
    pub const SEED: &str = "seed";
}

/// Authoritative game state, owned and shaped by the rules module.
///
/// Always a JSON object. Only the fields in [`fields`] are interpreted here,
/// and only ever read; `active` is never written by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct GameState(Map<String, Value>);

impl GameState {
    /// Creates a state from an object map.
    #[must_use]
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Parses a state from JSON text. Non-objects are rejected.
    pub fn from_json(text: &str) -> Result<Self, TurnsError> {
        let value: Value = serde_json::from_str(text)?;
        Self::try_from(value)
    }

    /// Serializes the state to JSON text.
    pub fn to_json(&self) -> Result<String, TurnsError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Returns the field map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the field map mutably. Rules modules use this; the engine does not.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Returns a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// The role(s) currently entitled to act.
    #[must_use]
    pub fn active(&self) -> Active {
        Active::from_value(self.get(fields::ACTIVE))
    }

    /// The raw `active` value, for comparisons that must not normalize.
    #[must_use]
    pub fn active_value(&self) -> Option<&Value> {
        self.get(fields::ACTIVE)
    }

    /// The `state` status token, if it is a string.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.get(fields::STATE).and_then(Value::as_str)
    }

    /// Returns `true` once the status token is `"game_over"`.
    #[must_use]
    pub fn is_game_over(&self) -> bool {
        self.status() == Some(GAME_OVER)
    }

    /// The log lines, or an empty slice when absent.
    #[must_use]
    pub fn log(&self) -> &[Value] {
        match self.get(fields::LOG) {
            Some(Value::Array(lines)) => lines,
            _ => &[],
        }
    }

    /// Number of log lines.
    #[must_use]
    pub fn log_len(&self) -> usize {
        self.log().len()
    }

    /// Appends a log line.
    pub fn push_log(&mut self, line: impl Into<String>) {
        let entry = self
            .0
            .entry(fields::LOG)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(lines) = entry {
            lines.push(Value::String(line.into()));
        }
    }

    /// Depth of the undo stack (zero when absent).
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        match self.get(fields::UNDO) {
            Some(Value::Array(stack)) => stack.len(),
            _ => 0,
        }
    }

    /// The PRNG seed, if present.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.get(fields::SEED).and_then(Value::as_u64)
    }

    /// Draws `[0, range)` from the state's seed with [`StandardRng`] and
    /// writes the advanced seed back.
    ///
    /// A state without a seed draws from seed 0, which always yields 0.
    pub fn random(&mut self, range: u64) -> u64 {
        let mut rng = StandardRng::new(self.seed().unwrap_or_default());
        let value = rng.next(range);
        self.set(fields::SEED, Value::from(rng.seed()));
        value
    }

    /// Shuffles `items` from the state's seed and writes the advanced seed back.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let mut rng = StandardRng::new(self.seed().unwrap_or_default());
        rng.shuffle(items);
        self.set(fields::SEED, Value::from(rng.seed()));
    }

    /// Consumes the state, returning the JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self(Map::new())
    }
}

impl TryFrom<Value> for GameState {
    type Error = TurnsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TurnsError::Serialization {
                context: format!("game state must be a JSON object, got {}", kind_of(&other)),
            }),
        }
    }
}

impl From<GameState> for Value {
    fn from(state: GameState) -> Self {
        state.into_value()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> GameState {
        GameState::try_from(value).unwrap()
    }

    #[test]
    fn rejects_non_objects() {
        assert!(GameState::try_from(json!([1, 2])).is_err());
        assert!(GameState::from_json("3").is_err());
    }

    #[test]
    fn reads_recognized_fields() {
        let s = state(json!({
            "active": "Red",
            "state": "game_over",
            "log": ["a", "b"],
            "undo": [{}],
            "seed": 17
        }));
        assert_eq!(s.active(), Active::One(crate::Role::new("Red")));
        assert!(s.is_game_over());
        assert_eq!(s.log_len(), 2);
        assert_eq!(s.undo_depth(), 1);
        assert_eq!(s.seed(), Some(17));
    }

    #[test]
    fn missing_fields_have_neutral_defaults() {
        let s = GameState::default();
        assert!(s.active().is_terminal());
        assert!(!s.is_game_over());
        assert_eq!(s.log_len(), 0);
        assert_eq!(s.undo_depth(), 0);
        assert_eq!(s.seed(), None);
    }

    #[test]
    fn random_advances_stored_seed() {
        let mut s = state(json!({ "seed": 1 }));
        assert_eq!(s.random(100), 5);
        assert_eq!(s.random(100), 88);
        assert_eq!(s.seed(), Some(5_682_272_688));
    }

    #[test]
    fn shuffle_matches_generator() {
        let mut s = state(json!({ "seed": 1 }));
        let mut items = [0, 1, 2, 3, 4, 5];
        s.shuffle(&mut items);
        assert_eq!(items, [1, 4, 2, 0, 3, 5]);
    }

    #[test]
    fn push_log_creates_log() {
        let mut s = GameState::default();
        s.push_log("Red moves.");
        s.push_log("Blue passes.");
        assert_eq!(s.log_len(), 2);
    }

    #[test]
    fn json_round_trip_is_transparent() {
        let s = state(json!({ "active": "All", "log": [] }));
        let text = s.to_json().unwrap();
        let back: GameState = serde_json::from_str(&text).unwrap();
        assert_eq!(s, back);
        assert!(text.starts_with('{'));
    }
}
