//! Per-role view projection with incremental log delivery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rules::Rules;
use crate::state::GameState;
use crate::{RulesError, Role};

/// Arguments a view offers for one verb.
///
/// Rules modules express "button enabled" as `true`/`1`, "button shown but
/// disabled" as `false`/`0`, and parameterised actions as a list of legal
/// argument values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionArgs {
    /// Enabled or disabled flag.
    Flag(bool),
    /// Numeric flag; non-zero means enabled.
    Numeric(i64),
    /// Legal argument values.
    Choices(Vec<Value>),
}

impl ActionArgs {
    /// Returns `true` if at least one invocation of the verb is legal.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Flag(enabled) => *enabled,
            Self::Numeric(n) => *n != 0,
            Self::Choices(values) => !values.is_empty(),
        }
    }

    /// Enumerates the argument values that may be passed with the verb.
    ///
    /// Flags yield a single `null` argument when enabled.
    #[must_use]
    pub fn choices(&self) -> Vec<Value> {
        match self {
            Self::Choices(values) => values.clone(),
            other if other.is_enabled() => vec![Value::Null],
            _ => Vec::new(),
        }
    }
}

/// Role-scoped read model of a game state.
///
/// Created fresh by every projection and never persisted. Fields a rules module
/// adds beyond the recognised ones are carried through in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    /// What the viewer is being asked to do.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Verbs the viewer may send, and their arguments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ActionArgs>,
    /// Log lines; after projection, only the ones this viewer has not seen.
    #[serde(default)]
    pub log: Vec<String>,
    /// Index into the full log of the first line in `log`.
    #[serde(default)]
    pub log_start: usize,
    /// Whether the game has ended.
    #[serde(default)]
    pub game_over: bool,
    /// Title-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl View {
    /// Creates an empty view with a prompt.
    #[must_use]
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Adds an action.
    #[must_use]
    pub fn with_action(mut self, verb: impl Into<String>, args: ActionArgs) -> Self {
        self.actions.insert(verb.into(), args);
        self
    }

    /// Iterates over enabled verbs.
    pub fn enabled_actions(&self) -> impl Iterator<Item = (&str, &ActionArgs)> {
        self.actions
            .iter()
            .filter(|(_, args)| args.is_enabled())
            .map(|(verb, args)| (verb.as_str(), args))
    }
}

/// A viewer's position in the log: the count of lines already delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogCursor(usize);

impl LogCursor {
    /// A cursor for a viewer that has already seen `seen` lines.
    #[must_use]
    pub const fn new(seen: usize) -> Self {
        Self(seen)
    }

    /// Number of lines already delivered.
    #[must_use]
    pub const fn seen(self) -> usize {
        self.0
    }
}

/// Projects `state` for `role` and clips the log to what `cursor` has not seen.
///
/// Sets `view.log_start = min(cursor, full length)`, keeps only the log suffix
/// from there, and moves `cursor` to the full length.
///
/// # Errors
///
/// Propagates the rules module's [`RulesError`]. The cursor is left untouched
/// so the next successful projection still delivers every missed line.
pub fn project(
    rules: &dyn Rules,
    state: &GameState,
    role: &Role,
    cursor: &mut LogCursor,
) -> Result<View, RulesError> {
    let mut view = rules.view(state, role)?;
    let total = view.log.len();
    let start = cursor.seen().min(total);
    view.log.drain(..start);
    view.log_start = start;
    *cursor = LogCursor::new(total);
    if state.is_game_over() {
        view.game_over = true;
    }
    Ok(view)
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
    use crate::rules::{Scenarios, Setup};
    use crate::RulesOperation;
    use serde_json::json;

    /// Echoes the state's log; fails when the state says so.
    pub(super) struct LogRules;

    impl Rules for LogRules {
        fn title(&self) -> &str {
            "log"
        }
        fn scenarios(&self) -> Scenarios {
            Scenarios::List(vec!["Standard".into()])
        }
        fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
            vec![Role::new("Solo")]
        }
        fn setup(&self, _: &Setup) -> Result<GameState, RulesError> {
            Ok(GameState::default())
        }
        fn action(&self, s: GameState, _: &Role, _: &str, _: &Value) -> Result<GameState, RulesError> {
            Ok(s)
        }
        fn resign(&self, s: GameState, _: &Role) -> Result<GameState, RulesError> {
            Ok(s)
        }
        fn view(&self, state: &GameState, _: &Role) -> Result<View, RulesError> {
            if state.get("broken").is_some() {
                return Err(RulesError::new(RulesOperation::View, "cannot view"));
            }
            let mut view = View::with_prompt("Go.");
            view.log = state
                .log()
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect();
            Ok(view)
        }
    }

    pub(super) fn state_with_log(n: usize) -> GameState {
        let lines: Vec<String> = (0..n).map(|i| format!("line {i}")).collect();
        GameState::try_from(json!({ "active": "Solo", "log": lines })).unwrap()
    }

    #[test]
    fn first_projection_delivers_everything() {
        let mut cursor = LogCursor::default();
        let view = project(&LogRules, &state_with_log(3), &Role::new("Solo"), &mut cursor).unwrap();
        assert_eq!(view.log_start, 0);
        assert_eq!(view.log.len(), 3);
        assert_eq!(cursor.seen(), 3);
    }

    #[test]
    fn later_projection_delivers_suffix_only() {
        let mut cursor = LogCursor::new(3);
        let view = project(&LogRules, &state_with_log(5), &Role::new("Solo"), &mut cursor).unwrap();
        assert_eq!(view.log_start, 3);
        assert_eq!(view.log, vec!["line 3".to_owned(), "line 4".to_owned()]);
        assert_eq!(cursor.seen(), 5);
    }

    #[test]
    fn cursor_past_end_is_clamped() {
        // A restarted game has a shorter log than the viewer has seen.
        let mut cursor = LogCursor::new(10);
        let view = project(&LogRules, &state_with_log(2), &Role::new("Solo"), &mut cursor).unwrap();
        assert_eq!(view.log_start, 2);
        assert!(view.log.is_empty());
        assert_eq!(cursor.seen(), 2);
    }

    #[test]
    fn rules_error_propagates_and_keeps_cursor() {
        let mut cursor = LogCursor::new(1);
        let mut state = state_with_log(4);
        state.set("broken", json!(true));
        let err = project(&LogRules, &state, &Role::new("Solo"), &mut cursor).unwrap_err();
        assert_eq!(err.message, "cannot view");
        assert_eq!(cursor.seen(), 1);
    }

    #[test]
    fn game_over_state_forces_flag() {
        let mut state = state_with_log(0);
        state.set("state", json!("game_over"));
        let view = project(&LogRules, &state, &Role::new("Solo"), &mut LogCursor::default()).unwrap();
        assert!(view.game_over);
    }

    #[test]
    fn action_args_enablement() {
        assert!(ActionArgs::Flag(true).is_enabled());
        assert!(!ActionArgs::Numeric(0).is_enabled());
        assert!(ActionArgs::Numeric(1).is_enabled());
        assert!(!ActionArgs::Choices(vec![]).is_enabled());
        assert_eq!(ActionArgs::Flag(true).choices(), vec![Value::Null]);
        assert!(ActionArgs::Flag(false).choices().is_empty());
        assert_eq!(ActionArgs::Choices(vec![json!(3), json!(4)]).choices().len(), 2);
    }

    #[test]
    fn view_deserializes_mixed_action_shapes() {
        let view: View = serde_json::from_value(json!({
            "prompt": "Choose.",
            "actions": { "pass": 1, "undo": 0, "draw": true, "place": [1, 2, 3] },
            "log": ["a"],
            "board": "xo-"
        }))
        .unwrap();
        assert_eq!(view.actions["pass"], ActionArgs::Numeric(1));
        assert_eq!(view.actions["draw"], ActionArgs::Flag(true));
        assert_eq!(view.enabled_actions().count(), 3);
        assert_eq!(view.extra["board"], json!("xo-"));
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
    use super::tests::{state_with_log, LogRules};
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: delivered log equals `full[log_start..]` and the cursor
        /// never decreases while the log only grows.
        #[test]
        fn prop_log_delivery_is_monotonic(growth in proptest::collection::vec(0usize..5, 1..20)) {
            let mut cursor = LogCursor::default();
            let mut len = 0;
            for step in growth {
                len += step;
                let state = state_with_log(len);
                let before = cursor.seen();
                let view = project(&LogRules, &state, &Role::new("Solo"), &mut cursor).unwrap();
                prop_assert!(cursor.seen() >= before);
                prop_assert_eq!(cursor.seen(), len);
                let full: Vec<String> = (0..len).map(|i| format!("line {i}")).collect();
                prop_assert_eq!(&view.log[..], &full[view.log_start..]);
            }
        }
    }
}
