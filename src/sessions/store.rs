//! Persistence boundary.
//!
//! The registry never owns authoritative state: every action loads the state,
//! hands the rules module that owned copy, and saves the result together with
//! the replay record that produced it. What backs the store (a relational
//! database in production) is outside this crate; [`MemoryStore`] is the
//! in-process implementation used by tests, demos and single-node servers.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::network::messages::ChatEntry;
use crate::replay::ReplayRecord;
use crate::state::GameState;
use crate::{GameId, Role, TurnsError};

/// One seat of a game's roster: which user holds which role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seat {
    /// The seat.
    pub role: Role,
    /// The user holding it.
    pub user: String,
}

impl Seat {
    /// Creates a seat.
    #[must_use]
    pub fn new(role: impl Into<Role>, user: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            user: user.into(),
        }
    }
}

/// Lobby metadata for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Title id, the key into the [`RulesRegistry`](crate::RulesRegistry).
    pub title: String,
    /// Scenario chosen in the lobby.
    pub scenario: String,
    /// Title-specific options chosen in the lobby.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Fixed seed for the initial state; drawn from entropy at start when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GameRecord {
    /// Creates a record with no options and no fixed seed.
    #[must_use]
    pub fn new(title: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            scenario: scenario.into(),
            options: Map::new(),
            seed: None,
        }
    }

    /// Fixes the initial seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Persistence collaborator for games, replays and chat.
///
/// Implementations must be safe to call from any thread. The registry
/// serializes calls per game, so a store never sees two writes for the same
/// game at once.
pub trait GameStore: Send + Sync {
    /// Lobby metadata.
    fn game(&self, game: GameId) -> Result<GameRecord, TurnsError>;

    /// The roster, in seat order.
    fn players(&self, game: GameId) -> Result<Vec<Seat>, TurnsError>;

    /// The authoritative state, or `None` before the game has started.
    ///
    /// Returns an owned copy; mutating it does not affect the stored state.
    fn load_state(&self, game: GameId) -> Result<Option<GameState>, TurnsError>;

    /// Commits `state`, appending `entry` to the replay when given.
    fn save_state(
        &self,
        game: GameId,
        state: &GameState,
        entry: Option<ReplayRecord>,
    ) -> Result<(), TurnsError>;

    /// Drops the replay, e.g. when the state is replaced wholesale.
    fn clear_replay(&self, game: GameId) -> Result<(), TurnsError>;

    /// The replay records, oldest first.
    fn replay(&self, game: GameId) -> Result<Vec<ReplayRecord>, TurnsError>;

    /// The full chat history.
    fn chat(&self, game: GameId) -> Result<Vec<ChatEntry>, TurnsError>;

    /// Appends a chat line, returning the new history length.
    fn append_chat(&self, game: GameId, entry: ChatEntry) -> Result<usize, TurnsError>;
}

#[derive(Debug, Clone)]
struct StoredGame {
    record: GameRecord,
    players: Vec<Seat>,
    state: Option<GameState>,
    replay: Vec<ReplayRecord>,
    chat: Vec<ChatEntry>,
}

/// In-memory [`GameStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    games: Mutex<BTreeMap<GameId, StoredGame>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a game in the lobby (not started).
    pub fn create_game(&self, game: GameId, record: GameRecord, players: Vec<Seat>) {
        self.games.lock().insert(
            game,
            StoredGame {
                record,
                players,
                state: None,
                replay: Vec::new(),
                chat: Vec::new(),
            },
        );
    }

    /// Number of games.
    #[must_use]
    pub fn len(&self) -> usize {
        self.games.lock().len()
    }

    /// Returns `true` if the store holds no games.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.games.lock().is_empty()
    }

    fn with_game<R>(
        &self,
        game: GameId,
        f: impl FnOnce(&mut StoredGame) -> R,
    ) -> Result<R, TurnsError> {
        let mut games = self.games.lock();
        games
            .get_mut(&game)
            .map(f)
            .ok_or(TurnsError::UnknownGame { game })
    }
}

impl GameStore for MemoryStore {
    fn game(&self, game: GameId) -> Result<GameRecord, TurnsError> {
        self.with_game(game, |g| g.record.clone())
    }

    fn players(&self, game: GameId) -> Result<Vec<Seat>, TurnsError> {
        self.with_game(game, |g| g.players.clone())
    }

    fn load_state(&self, game: GameId) -> Result<Option<GameState>, TurnsError> {
        self.with_game(game, |g| g.state.clone())
    }

    fn save_state(
        &self,
        game: GameId,
        state: &GameState,
        entry: Option<ReplayRecord>,
    ) -> Result<(), TurnsError> {
        self.with_game(game, |g| {
            g.state = Some(state.clone());
            if let Some(entry) = entry {
                g.replay.push(entry);
            }
        })
    }

    fn clear_replay(&self, game: GameId) -> Result<(), TurnsError> {
        self.with_game(game, |g| g.replay.clear())
    }

    fn replay(&self, game: GameId) -> Result<Vec<ReplayRecord>, TurnsError> {
        self.with_game(game, |g| g.replay.clone())
    }

    fn chat(&self, game: GameId) -> Result<Vec<ChatEntry>, TurnsError> {
        self.with_game(game, |g| g.chat.clone())
    }

    fn append_chat(&self, game: GameId, entry: ChatEntry) -> Result<usize, TurnsError> {
        self.with_game(game, |g| {
            g.chat.push(entry);
            g.chat.len()
        })
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

    fn store_with_game() -> (MemoryStore, GameId) {
        let store = MemoryStore::new();
        let game = GameId::new(7);
        store.create_game(
            game,
            GameRecord::new("counter", "Standard").with_seed(11),
            vec![Seat::new("Red", "ada"), Seat::new("Blue", "bob")],
        );
        (store, game)
    }

    #[test]
    fn unknown_game_is_an_error() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.game(GameId::new(1)),
            Err(TurnsError::UnknownGame { .. })
        ));
    }

    #[test]
    fn new_game_has_no_state() {
        let (store, game) = store_with_game();
        assert!(store.load_state(game).unwrap().is_none());
        assert_eq!(store.players(game).unwrap().len(), 2);
        assert_eq!(store.game(game).unwrap().seed, Some(11));
    }

    #[test]
    fn save_state_appends_replay() {
        let (store, game) = store_with_game();
        let state = GameState::try_from(json!({ "active": "Red" })).unwrap();
        store
            .save_state(game, &state, Some(ReplayRecord::new("Red", "pass", None)))
            .unwrap();
        store.save_state(game, &state, None).unwrap();
        assert_eq!(store.replay(game).unwrap().len(), 1);
        assert_eq!(store.load_state(game).unwrap(), Some(state));
        store.clear_replay(game).unwrap();
        assert!(store.replay(game).unwrap().is_empty());
    }

    #[test]
    fn loaded_state_is_a_copy() {
        let (store, game) = store_with_game();
        let state = GameState::try_from(json!({ "active": "Red" })).unwrap();
        store.save_state(game, &state, None).unwrap();
        let mut loaded = store.load_state(game).unwrap().unwrap();
        loaded.set("active", json!("Blue"));
        assert_eq!(store.load_state(game).unwrap(), Some(state));
    }

    #[test]
    fn append_chat_returns_length() {
        let (store, game) = store_with_game();
        assert_eq!(store.append_chat(game, ChatEntry::now("ada", "hi")).unwrap(), 1);
        assert_eq!(store.append_chat(game, ChatEntry::now("bob", "yo")).unwrap(), 2);
        assert_eq!(store.chat(game).unwrap()[1].author, "bob");
    }
}
