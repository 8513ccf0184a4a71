//! Shared constants and helpers for integration tests.

use std::sync::Arc;

use fortress_turns::{
    CollectingSink, ConnectRequest, ConnectionHandle, ConnectionRegistry, GameId, GameRecord,
    MemoryStore, RegistryConfig, RulesRegistry, Seat, ServerEvent, View,
};

use super::stubs::{Counter, BLACK, WHITE};

/// The one game every table hosts.
pub const GAME: GameId = GameId::new(7);

/// Seed the game is created with, so runs are reproducible.
pub const SEED: u64 = 4242;

/// A registry over an in-memory store with one seated counter game:
/// `ada` plays White, `bob` plays Black.
pub struct Table {
    pub store: Arc<MemoryStore>,
    pub registry: ConnectionRegistry,
}

impl Table {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::production())
    }

    pub fn development() -> Self {
        Self::with_config(RegistryConfig::development())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_scenario("Standard", config)
    }

    pub fn with_scenario(scenario: &str, config: RegistryConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.create_game(
            GAME,
            GameRecord::new("counter", scenario).with_seed(SEED),
            vec![Seat::new(WHITE, "ada"), Seat::new(BLACK, "bob")],
        );
        let rules = Arc::new(RulesRegistry::new().with(Arc::new(Counter::new())));
        let registry = ConnectionRegistry::new(rules, store.clone())
            .with_config(config)
            .expect("valid config");
        Self { store, registry }
    }

    /// Connects `user` with whatever role the roster gives them.
    pub fn join(&self, user: &str) -> (ConnectionHandle, Arc<CollectingSink>) {
        self.connect(ConnectRequest::new(GAME, user))
    }

    pub fn connect(&self, request: ConnectRequest) -> (ConnectionHandle, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let handle = self
            .registry
            .connect(request, sink.clone())
            .expect("connect");
        (handle, sink)
    }
}

/// Every `state` view a sink has received, oldest first.
pub fn views(sink: &CollectingSink) -> Vec<View> {
    sink.events()
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::State { view, .. } => Some(view),
            _ => None,
        })
        .collect()
}

/// The `total` field of a counter view.
pub fn shown_total(view: &View) -> i64 {
    view.extra
        .get("total")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(-1)
}
