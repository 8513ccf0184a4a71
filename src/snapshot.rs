//! State snapshot codec and digest.
//!
//! Replay collapsing needs to recognise when a sequence of actions returned the
//! game to a state it was already in. Two states are "the same" for this
//! purpose when everything strategic matches, even though the log has new
//! lines describing the detour. [`normalize`] therefore:
//!
//! - omits the `undo` stack entirely, and
//! - replaces the `log` array by its length.
//!
//! [`digest`] is a CRC-32C (Castagnoli, reflected polynomial `0x82F63B78`)
//! over the JSON encoding of the normalized value. It detects repeats; it is
//! not an integrity check.
//!
//! # Determinism
//!
//! `serde_json::Map` is ordered by key (the `preserve_order` feature is not
//! enabled), so the encoding and therefore the digest do not depend on the
//! order in which a rules module inserted its fields.
//!
//! # Usage
//!
//! ```
//! use fortress_turns::{snapshot::digest, GameState};
//!
//! let before = GameState::from_json(r#"{"active":"Red","log":["Red moves."],"seed":3}"#).unwrap();
//! let after = GameState::from_json(r#"{"active":"Red","log":["Red undoes."],"seed":3}"#).unwrap();
//! assert_eq!(digest(&before).unwrap(), digest(&after).unwrap());
//! ```

use serde_json::{Map, Value};

use crate::state::{fields, GameState};
use crate::TurnsError;

/// Produces the log-length-normalized form of `state`.
#[must_use]
pub fn normalize(state: &GameState) -> Value {
    let mut normalized = Map::new();
    for (key, value) in state.as_map() {
        match key.as_str() {
            fields::UNDO => {},
            fields::LOG => {
                let len = match value {
                    Value::Array(lines) => lines.len(),
                    _ => 0,
                };
                normalized.insert(key.clone(), Value::from(len));
            },
            _ => {
                normalized.insert(key.clone(), value.clone());
            },
        }
    }
    Value::Object(normalized)
}

/// Encodes the normalized form of `state` as JSON bytes.
///
/// # Errors
///
/// Returns [`TurnsError::Serialization`] if encoding fails.
pub fn encode(state: &GameState) -> Result<Vec<u8>, TurnsError> {
    serde_json::to_vec(&normalize(state)).map_err(|e| TurnsError::Serialization {
        context: format!("snapshot encode: {e}"),
    })
}

/// Computes the 32-bit digest of `state`.
///
/// # Example
///
/// ```
/// use fortress_turns::{snapshot::digest, GameState};
///
/// let a = GameState::from_json(r#"{"active":"Red","seed":3}"#).unwrap();
/// let b = GameState::from_json(r#"{"active":"Blue","seed":3}"#).unwrap();
/// assert_ne!(digest(&a).unwrap(), digest(&b).unwrap());
/// ```
///
/// # Errors
///
/// Returns [`TurnsError::Serialization`] if encoding fails.
pub fn digest(state: &GameState) -> Result<u32, TurnsError> {
    encode(state).map(|bytes| crc32c(&bytes))
}

/// CRC-32C of a raw byte slice.
#[inline]
#[must_use]
pub fn crc32c(bytes: &[u8]) -> u32 {
    ::crc32c::crc32c(bytes)
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
    fn crc32c_check_value() {
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
        assert_eq!(crc32c(b""), 0);
    }

    #[test]
    fn normalize_drops_undo_and_counts_log() {
        let s = state(json!({
            "active": "Red",
            "log": ["one", "two", "three"],
            "undo": [{"active": "Red"}],
            "seed": 9
        }));
        assert_eq!(
            normalize(&s),
            json!({ "active": "Red", "log": 3, "seed": 9 })
        );
    }

    #[test]
    fn same_log_length_different_text_same_digest() {
        let a = state(json!({ "active": "Red", "log": ["a", "b"], "board": [1, 2] }));
        let b = state(json!({ "active": "Red", "log": ["x", "y"], "board": [1, 2] }));
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn different_log_length_changes_digest() {
        let a = state(json!({ "active": "Red", "log": ["a"] }));
        let b = state(json!({ "active": "Red", "log": ["a", "b"] }));
        assert_ne!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn undo_stack_does_not_affect_digest() {
        let a = state(json!({ "active": "Red", "log": [] }));
        let b = state(json!({ "active": "Red", "log": [], "undo": [{"x": 1}, {"x": 2}] }));
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn field_insertion_order_does_not_matter() {
        let a = GameState::from_json(r#"{"seed":1,"active":"Red"}"#).unwrap();
        let b = GameState::from_json(r#"{"active":"Red","seed":1}"#).unwrap();
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn strategic_fields_change_digest() {
        let a = state(json!({ "active": "Red", "board": [0, 0, 1] }));
        let b = state(json!({ "active": "Red", "board": [0, 1, 0] }));
        assert_ne!(digest(&a).unwrap(), digest(&b).unwrap());
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// Property: the digest ignores log text, only its length matters.
        #[test]
        fn prop_digest_ignores_log_text(
            lines_a in proptest::collection::vec("[a-z ]{0,12}", 0..8),
            seed in any::<u32>(),
        ) {
            let lines_b: Vec<String> = lines_a.iter().map(|l| format!("{l}!")).collect();
            let a = GameState::try_from(json!({ "seed": seed, "log": lines_a })).unwrap();
            let b = GameState::try_from(json!({ "seed": seed, "log": lines_b })).unwrap();
            prop_assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
        }

        /// Property: digest is a pure function of the state.
        #[test]
        fn prop_digest_deterministic(seed in any::<u64>(), turn in any::<u16>()) {
            let s = GameState::try_from(json!({ "seed": seed, "turn": turn })).unwrap();
            prop_assert_eq!(digest(&s).unwrap(), digest(&s.clone()).unwrap());
        }
    }
}
