//! The rules-module contract and the title registry.
//!
//! A title's rules are the state transition function; this crate never looks
//! inside them. Implementations are registered once at process start in a
//! [`RulesRegistry`] keyed by title, and shared behind `Arc<dyn Rules>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::GameState;
use crate::view::View;
use crate::{Role, RulesError, RulesOperation, TurnsError};

/// Arguments to a title's `setup`.
///
/// Also the persisted argument payload of a `.setup` replay entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    /// Initial PRNG seed.
    pub seed: u64,
    /// Scenario name.
    pub scenario: String,
    /// Title-specific options.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Seated roles, in seat order.
    pub players: Vec<Role>,
}

impl Setup {
    /// Creates setup arguments with empty options.
    #[must_use]
    pub fn new(seed: u64, scenario: impl Into<String>, players: Vec<Role>) -> Self {
        Self {
            seed,
            scenario: scenario.into(),
            options: Map::new(),
            players,
        }
    }
}

/// The scenarios a title offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scenarios {
    /// A flat list of scenario names.
    List(Vec<String>),
    /// Scenario names grouped by category.
    Categories(BTreeMap<String, Vec<String>>),
}

impl Scenarios {
    /// Every scenario name, categories flattened in key order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Categories(groups) => groups
                .values()
                .flat_map(|names| names.iter().map(String::as_str))
                .collect(),
        }
    }

    /// Returns `true` if `name` is offered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names().contains(&name)
    }

    /// Returns `true` if no scenario is offered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// A title's rules.
///
/// `action` and `resign` take the state by value. Callers that must keep the
/// previous state on failure pass a clone and commit the returned state only
/// on success; an implementation that mutates its argument before failing
/// therefore cannot corrupt anything.
pub trait Rules: Send + Sync {
    /// Title identifier this module is registered under.
    fn title(&self) -> &str;

    /// Scenarios offered by the title.
    fn scenarios(&self) -> Scenarios;

    /// Seats for a scenario, in seat order.
    fn roles(&self, scenario: &str, options: &Map<String, Value>) -> Vec<Role>;

    /// Creates the initial state.
    fn setup(&self, setup: &Setup) -> Result<GameState, RulesError>;

    /// Applies `verb` with `args` on behalf of `role`.
    fn action(
        &self,
        state: GameState,
        role: &Role,
        verb: &str,
        args: &Value,
    ) -> Result<GameState, RulesError>;

    /// Resigns `role`.
    fn resign(&self, state: GameState, role: &Role) -> Result<GameState, RulesError>;

    /// Projects `state` for `role`, with the full log.
    fn view(&self, state: &GameState, role: &Role) -> Result<View, RulesError>;

    /// Answers a read-only query. Titles without queries reject every name.
    fn query(
        &self,
        _state: &GameState,
        _role: &Role,
        name: &str,
        _params: &Value,
    ) -> Result<Value, RulesError> {
        Err(RulesError::new(
            RulesOperation::Query,
            format!("{} does not answer query {name}", self.title()),
        ))
    }

    /// Checks title-specific invariants. Used by the fuzz driver.
    fn assert_state(&self, _state: &GameState) -> Result<(), RulesError> {
        Ok(())
    }
}

/// Title → rules implementation, populated at process start.
#[derive(Clone, Default)]
pub struct RulesRegistry {
    titles: BTreeMap<String, Arc<dyn Rules>>,
}

impl RulesRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rules` under its title, returning the previous module if any.
    pub fn register(&mut self, rules: Arc<dyn Rules>) -> Option<Arc<dyn Rules>> {
        let title = rules.title().to_owned();
        tracing::debug!(title = %title, "registered rules module");
        self.titles.insert(title, rules)
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, rules: Arc<dyn Rules>) -> Self {
        self.register(rules);
        self
    }

    /// Looks up a title.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::UnknownTitle`] if nothing is registered for it.
    pub fn get(&self, title: &str) -> Result<Arc<dyn Rules>, TurnsError> {
        self.titles
            .get(title)
            .cloned()
            .ok_or_else(|| TurnsError::UnknownTitle {
                title: title.to_owned(),
            })
    }

    /// Registered titles, sorted.
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.titles.keys().map(String::as_str)
    }

    /// Number of registered titles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl std::fmt::Debug for RulesRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesRegistry")
            .field("titles", &self.titles.keys().collect::<Vec<_>>())
            .finish()
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

    struct Named(&'static str);

    impl Rules for Named {
        fn title(&self) -> &str {
            self.0
        }
        fn scenarios(&self) -> Scenarios {
            Scenarios::Categories(BTreeMap::from([
                ("Long".to_owned(), vec!["Campaign".to_owned()]),
                ("Short".to_owned(), vec!["Intro".to_owned(), "Skirmish".to_owned()]),
            ]))
        }
        fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
            vec![Role::new("North"), Role::new("South")]
        }
        fn setup(&self, setup: &Setup) -> Result<GameState, RulesError> {
            Ok(GameState::try_from(json!({ "seed": setup.seed, "active": "North" })).unwrap())
        }
        fn action(&self, s: GameState, _: &Role, _: &str, _: &Value) -> Result<GameState, RulesError> {
            Ok(s)
        }
        fn resign(&self, s: GameState, _: &Role) -> Result<GameState, RulesError> {
            Ok(s)
        }
        fn view(&self, _: &GameState, _: &Role) -> Result<View, RulesError> {
            Ok(View::default())
        }
    }

    #[test]
    fn registry_looks_up_by_title() {
        let registry = RulesRegistry::new()
            .with(Arc::new(Named("chess")))
            .with(Arc::new(Named("go")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("go").unwrap().title(), "go");
        assert_eq!(registry.titles().collect::<Vec<_>>(), vec!["chess", "go"]);
    }

    #[test]
    fn unknown_title_is_an_error() {
        let registry = RulesRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(TurnsError::UnknownTitle { title }) if title == "nope"
        ));
    }

    #[test]
    fn re_registering_replaces() {
        let mut registry = RulesRegistry::new();
        assert!(registry.register(Arc::new(Named("chess"))).is_none());
        assert!(registry.register(Arc::new(Named("chess"))).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn categories_flatten_in_key_order() {
        let scenarios = Named("x").scenarios();
        assert_eq!(scenarios.names(), vec!["Campaign", "Intro", "Skirmish"]);
        assert!(scenarios.contains("Skirmish"));
        assert!(!scenarios.is_empty());
    }

    #[test]
    fn default_query_rejects() {
        let err = Named("chess")
            .query(&GameState::default(), &Role::new("North"), "score", &Value::Null)
            .unwrap_err();
        assert_eq!(err.operation, RulesOperation::Query);
    }

    #[test]
    fn setup_serializes_for_replay() {
        let setup = Setup::new(42, "Intro", vec![Role::new("North"), Role::new("South")]);
        let text = serde_json::to_string(&setup).unwrap();
        let back: Setup = serde_json::from_str(&text).unwrap();
        assert_eq!(back, setup);
        assert!(text.contains("\"players\":[\"North\",\"South\"]"));
    }
}
