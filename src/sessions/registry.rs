//! The connection registry: live viewers per game, and every operation a
//! viewer can trigger.
//!
//! Each game with at least one live connection has a [`GameRoom`] behind its
//! own mutex. Every operation that touches a game's state takes that lock and
//! keeps it across load → rules → save → broadcast, so for one game:
//!
//! - actions are totally ordered in lock-acquisition order, and each one is
//!   evaluated against the state the previous one committed;
//! - every viewer is sent the view of a committed state before the next action
//!   on that game starts;
//! - connects and disconnects never interleave with a broadcast.
//!
//! Distinct games never contend on each other's locks.
//!
//! Lock order is map → room. Only `connect` and `disconnect` hold both.
//!
//! Failures are reported to the originating connection as an `error` event
//! and returned to the caller; other connections see nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::network::messages::{ChatEntry, ClientEvent, Presence, ServerEvent};
use crate::network::sink::EventSink;
use crate::replay::{
    parse_records, reconstruct, reconstruct_or_snapshot, Reconstruction, ReplayEntry, ReplayMode,
};
use crate::rng::seed_from_entropy;
use crate::rules::{Rules, RulesRegistry, Setup};
use crate::sessions::config::RegistryConfig;
use crate::sessions::connection::{ConnectRequest, Connection, ConnectionHandle, ConnectionId};
use crate::sessions::room::GameRoom;
use crate::sessions::store::{GameRecord, GameStore, Seat};
use crate::state::GameState;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{debug_check_invariants, report_violation_to, GameId, Role, TurnsError};

/// Tracks live connections per game and applies their events.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fortress_turns::{
///     CollectingSink, ConnectRequest, ConnectionRegistry, GameId, GameRecord, MemoryStore,
///     RulesRegistry, Seat,
/// };
///
/// let store = Arc::new(MemoryStore::new());
/// store.create_game(GameId::new(1), GameRecord::new("chess", "Standard"), vec![Seat::new("White", "ada")]);
/// let registry = ConnectionRegistry::new(Arc::new(RulesRegistry::new()), store);
///
/// // No rules module is registered for "chess".
/// let sink = Arc::new(CollectingSink::new());
/// assert!(registry.connect(ConnectRequest::new(GameId::new(1), "ada"), sink).is_err());
/// ```
pub struct ConnectionRegistry {
    rules: Arc<RulesRegistry>,
    store: Arc<dyn GameStore>,
    config: RegistryConfig,
    rooms: Mutex<BTreeMap<GameId, Arc<Mutex<GameRoom>>>>,
    next_id: AtomicU64,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl ConnectionRegistry {
    /// Creates a registry with [`RegistryConfig::production`].
    #[must_use]
    pub fn new(rules: Arc<RulesRegistry>, store: Arc<dyn GameStore>) -> Self {
        Self {
            rules,
            store,
            config: RegistryConfig::production(),
            rooms: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            violation_observer: None,
        }
    }

    /// Replaces the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::InvalidConfig`] if `config` does not validate.
    pub fn with_config(mut self, config: RegistryConfig) -> Result<Self, TurnsError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Routes broadcast and projection violations to `observer`.
    ///
    /// Applies to rooms created afterwards.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of games with live connections.
    #[must_use]
    pub fn game_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Number of live connections to `game`.
    #[must_use]
    pub fn connection_count(&self, game: GameId) -> usize {
        self.room(game).map_or(0, |room| room.lock().len())
    }

    /// Seated-role occupancy of `game`.
    #[must_use]
    pub fn presence(&self, game: GameId) -> Presence {
        self.room(game)
            .map(|room| room.lock().presence())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    /// Registers a connection and greets it.
    ///
    /// A requested seat must be bound to `request.user` in the roster.
    /// Without a requested role the user gets their first seat, or observes.
    ///
    /// The new connection is sent `roles`, then its view of the current state
    /// if the game has started. Everyone is then sent the new presence.
    ///
    /// # Errors
    ///
    /// [`TurnsError::RoleMismatch`] for a seat bound to somebody else, and
    /// lookup errors from the store and the rules registry.
    pub fn connect(
        &self,
        request: ConnectRequest,
        sink: Arc<dyn EventSink>,
    ) -> Result<ConnectionHandle, TurnsError> {
        let game = request.game;
        let record = self.store.game(game)?;
        let seats = self.store.players(game)?;
        let role = match grant_role(&seats, &request) {
            Ok(role) => role,
            Err(err) => {
                tracing::warn!(game = %game, user = %request.user, "connect refused: {}", err);
                return Err(err);
            },
        };
        let rules = self.rules.get(&record.title)?;
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut rooms = self.rooms.lock();
        let room = Arc::clone(rooms.entry(game).or_insert_with(|| {
            Arc::new(Mutex::new(GameRoom::new(
                game,
                rules,
                self.violation_observer.clone(),
            )))
        }));
        let mut room = room.lock();
        drop(rooms);

        let state = match self.store.load_state(game) {
            Ok(state) => state,
            Err(err) => {
                drop(room);
                self.prune(game);
                return Err(err);
            },
        };
        let connection = Connection::new(id, &request, role.clone(), sink);
        let handle = connection.handle();
        room.add(connection);
        room.send_to(
            id,
            ServerEvent::Roles {
                role: role.clone(),
                players: seats,
            },
        );
        if let Some(state) = state {
            room.send_state_to(id, &state);
        }
        room.broadcast_presence();
        debug_check_invariants!(room, "ConnectionRegistry::connect");

        tracing::info!(game = %game, role = %role, user = %request.user, connection = %id, "connected");
        Ok(handle)
    }

    /// Removes a connection and tells the rest of the game who is left.
    ///
    /// The game's room is dropped with its last connection.
    ///
    /// # Errors
    ///
    /// [`TurnsError::UnknownConnection`] if `handle` was already disconnected.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), TurnsError> {
        let unknown = || TurnsError::UnknownConnection {
            connection: handle.id(),
        };
        let mut rooms = self.rooms.lock();
        let room = rooms.get(&handle.game()).cloned().ok_or_else(unknown)?;
        let mut room = room.lock();
        room.remove(handle.id()).ok_or_else(unknown)?;
        if room.is_empty() {
            rooms.remove(&handle.game());
        } else {
            room.broadcast_presence();
        }
        tracing::info!(game = %handle.game(), role = %handle.role(), connection = %handle.id(), "disconnected");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // State transitions
    // ---------------------------------------------------------------------

    /// Sets a lobby game up and broadcasts the initial state.
    ///
    /// Uses the stored seed if there is one, otherwise draws one. The roster
    /// gives the seats; an empty roster falls back to the scenario's roles.
    ///
    /// # Errors
    ///
    /// [`TurnsError::InvalidRequest`] if the game has already started, and any
    /// store, registry or rules failure.
    pub fn start(&self, game: GameId) -> Result<(), TurnsError> {
        let record = self.store.game(game)?;
        let rules = self.rules.get(&record.title)?;
        let seats = self.store.players(game)?;
        let setup = setup_for(&record, &seats, rules.as_ref(), record.seed);

        let room = self.room_or_create(game, &rules);
        let result = {
            let mut room = room.lock();
            self.start_locked(&mut room, rules.as_ref(), &setup)
        };
        self.prune(game);
        if result.is_ok() {
            tracing::info!(game = %game, title = %record.title, seed = setup.seed, "game started");
        }
        result
    }

    fn start_locked(
        &self,
        room: &mut GameRoom,
        rules: &dyn Rules,
        setup: &Setup,
    ) -> Result<(), TurnsError> {
        let game = room.game();
        if self.store.load_state(game)?.is_some() {
            return Err(TurnsError::InvalidRequest {
                info: format!("game {game} has already started"),
            });
        }
        let state = rules.setup(setup)?;
        self.commit(room, &state, ReplayEntry::setup(setup)?)
    }

    /// Applies `verb` with `args` for the connection's role.
    ///
    /// # Errors
    ///
    /// [`TurnsError::ObserverCannotAct`], [`TurnsError::GameNotStarted`],
    /// [`TurnsError::NotYourTurn`] and [`TurnsError::Rules`]; the stored
    /// state is unchanged in every case.
    pub fn apply(
        &self,
        handle: &ConnectionHandle,
        verb: &str,
        args: &Value,
    ) -> Result<(), TurnsError> {
        self.with_room(handle, "action", |room| {
            let role = handle.role();
            let state = self.acting_state(handle)?;
            if !state.active().includes(role) {
                return Err(TurnsError::NotYourTurn { role: role.clone() });
            }
            let next = room.rules().action(state, role, verb, args)?;
            self.commit(room, &next, ReplayEntry::action(role.clone(), verb, args.clone()))?;
            tracing::debug!(game = %handle.game(), role = %role, verb, "action applied");
            Ok(())
        })
    }

    /// Resigns the connection's role. Allowed out of turn.
    ///
    /// # Errors
    ///
    /// As [`apply`](Self::apply), without the turn check.
    pub fn resign(&self, handle: &ConnectionHandle) -> Result<(), TurnsError> {
        self.with_room(handle, "resign", |room| {
            let role = handle.role();
            let state = self.acting_state(handle)?;
            let next = room.rules().resign(state, role)?;
            self.commit(room, &next, ReplayEntry::resign(role.clone()))?;
            tracing::debug!(game = %handle.game(), role = %role, "resigned");
            Ok(())
        })
    }

    /// Answers a rules query for the connection with a `reply` event.
    ///
    /// # Errors
    ///
    /// [`TurnsError::GameNotStarted`] and the rules module's query error.
    pub fn query(
        &self,
        handle: &ConnectionHandle,
        name: &str,
        params: &Value,
    ) -> Result<(), TurnsError> {
        self.with_room(handle, "query", |room| {
            let state = self.started_state(handle.game())?;
            let value = room.rules().query(&state, handle.role(), name, params)?;
            room.send_to(
                handle.id(),
                ServerEvent::Reply {
                    name: name.to_owned(),
                    value,
                },
            );
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Chat
    // ---------------------------------------------------------------------

    /// Posts a chat line and pushes every connection its unseen lines.
    ///
    /// # Errors
    ///
    /// [`TurnsError::InvalidRequest`] for an observer (unless observers may
    /// chat) or an over-long message.
    pub fn chat(&self, handle: &ConnectionHandle, message: &str) -> Result<(), TurnsError> {
        self.with_room(handle, "chat", |room| {
            if handle.role().is_observer() && !self.config.observers_may_chat {
                return Err(TurnsError::InvalidRequest {
                    info: "Observers may not chat.".to_owned(),
                });
            }
            if message.len() > self.config.max_chat_message_len {
                return Err(TurnsError::InvalidRequest {
                    info: format!(
                        "Chat message is longer than {} bytes.",
                        self.config.max_chat_message_len
                    ),
                });
            }
            let game = handle.game();
            let length = self
                .store
                .append_chat(game, ChatEntry::now(handle.user(), message))?;
            let history = self.store.chat(game)?;
            room.broadcast_chat(&history);
            tracing::trace!(game = %game, user = handle.user(), length, "chat");
            Ok(())
        })
    }

    /// Sends the connection the chat lines after the first `seen`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn get_chat(&self, handle: &ConnectionHandle, seen: usize) -> Result<(), TurnsError> {
        self.with_room(handle, "getchat", |room| {
            let history = self.store.chat(handle.game())?;
            if let Some(connection) = room.connection_mut(handle.id()) {
                connection.chat_length = seen;
            }
            room.send_chat_to(handle.id(), &history);
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Debug events
    // ---------------------------------------------------------------------

    /// Replaces the authoritative state with `state_json`.
    ///
    /// The replay no longer leads to the new state, so it is dropped. Every
    /// viewer is sent the whole log again.
    ///
    /// # Errors
    ///
    /// [`TurnsError::DebugEventsDisabled`] unless enabled, and
    /// [`TurnsError::Serialization`] for malformed JSON.
    pub fn restore(&self, handle: &ConnectionHandle, state_json: &str) -> Result<(), TurnsError> {
        self.with_room(handle, "restore", |room| {
            self.require_debug_events()?;
            let state = GameState::from_json(state_json)?;
            let game = handle.game();
            self.store.clear_replay(game)?;
            self.store.save_state(game, &state, None)?;
            room.reset_log_cursors();
            room.broadcast_state(&state);
            tracing::info!(game = %game, user = handle.user(), "state restored");
            Ok(())
        })
    }

    /// Sets the game up again in `scenario` with a fresh seed.
    ///
    /// # Errors
    ///
    /// [`TurnsError::DebugEventsDisabled`] unless enabled, and
    /// [`TurnsError::InvalidRequest`] for a scenario the title does not offer.
    pub fn restart(&self, handle: &ConnectionHandle, scenario: &str) -> Result<(), TurnsError> {
        self.with_room(handle, "restart", |room| {
            self.require_debug_events()?;
            let rules = Arc::clone(room.rules());
            if !rules.scenarios().contains(scenario) {
                return Err(TurnsError::InvalidRequest {
                    info: format!("{} has no scenario {scenario}", rules.title()),
                });
            }
            let game = handle.game();
            let mut record = self.store.game(game)?;
            record.scenario = scenario.to_owned();
            let seats = self.store.players(game)?;
            let setup = setup_for(&record, &seats, rules.as_ref(), None);
            let state = rules.setup(&setup)?;
            self.store.clear_replay(game)?;
            room.reset_log_cursors();
            self.commit(room, &state, ReplayEntry::setup(&setup)?)?;
            tracing::info!(game = %game, scenario, seed = setup.seed, "game restarted");
            Ok(())
        })
    }

    /// Sends the connection the authoritative state as JSON.
    ///
    /// # Errors
    ///
    /// [`TurnsError::DebugEventsDisabled`] unless enabled, and
    /// [`TurnsError::GameNotStarted`].
    pub fn save(&self, handle: &ConnectionHandle) -> Result<(), TurnsError> {
        self.with_room(handle, "save", |room| {
            self.require_debug_events()?;
            let state = self.started_state(handle.game())?;
            room.send_to(
                handle.id(),
                ServerEvent::Save {
                    state: state.to_json()?,
                },
            );
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Socket dispatch
    // ---------------------------------------------------------------------

    /// Dispatches one inbound socket event.
    ///
    /// # Errors
    ///
    /// Whatever the dispatched operation returns; the originating connection
    /// has already been sent the error.
    pub fn handle_event(
        &self,
        handle: &ConnectionHandle,
        event: ClientEvent,
    ) -> Result<(), TurnsError> {
        match event {
            ClientEvent::Action { verb, args } => self.apply(handle, &verb, &args),
            ClientEvent::Resign => self.resign(handle),
            ClientEvent::GetChat { seen } => self.get_chat(handle, seen),
            ClientEvent::Chat { message } => self.chat(handle, &message),
            ClientEvent::Restore { state } => self.restore(handle, &state),
            ClientEvent::Restart { scenario } => self.restart(handle, &scenario),
            ClientEvent::Save => self.save(handle),
            ClientEvent::Query { name, params } => self.query(handle, &name, &params),
        }
    }

    // ---------------------------------------------------------------------
    // Replay
    // ---------------------------------------------------------------------

    /// Reconstructs a game's stored replay.
    ///
    /// In [`ReplayMode::Normal`] an unusable replay falls back to the stored
    /// state with no entries.
    ///
    /// # Errors
    ///
    /// Lookup failures, and reconstruction failures with nothing to fall back to.
    pub fn replay(&self, game: GameId, mode: ReplayMode) -> Result<Reconstruction, TurnsError> {
        let record = self.store.game(game)?;
        let rules = self.rules.get(&record.title)?;
        let records = self.store.replay(game)?;
        match mode {
            ReplayMode::Normal => {
                let snapshot = self.store.load_state(game)?;
                let reconstruction = match parse_records(&records) {
                    Ok(entries) => reconstruct_or_snapshot(rules.as_ref(), &entries, snapshot)?,
                    Err(err) => match snapshot {
                        Some(state) => Reconstruction {
                            state: Some(state),
                            entries: Vec::new(),
                            failure: Some(err),
                        },
                        None => return Err(err),
                    },
                };
                if let Some(err) = &reconstruction.failure {
                    report_violation_to!(
                        &self.violation_observer,
                        ViolationSeverity::Warning,
                        ViolationKind::Replay,
                        "game {} served from its stored state: {}",
                        game,
                        err
                    );
                }
                Ok(reconstruction)
            },
            ReplayMode::Debug => {
                let entries = parse_records(&records)?;
                reconstruct(rules.as_ref(), &entries, mode)
            },
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn room(&self, game: GameId) -> Option<Arc<Mutex<GameRoom>>> {
        self.rooms.lock().get(&game).cloned()
    }

    fn room_or_create(&self, game: GameId, rules: &Arc<dyn Rules>) -> Arc<Mutex<GameRoom>> {
        let mut rooms = self.rooms.lock();
        Arc::clone(rooms.entry(game).or_insert_with(|| {
            Arc::new(Mutex::new(GameRoom::new(
                game,
                Arc::clone(rules),
                self.violation_observer.clone(),
            )))
        }))
    }

    /// Drops `game`'s room if nobody is connected.
    fn prune(&self, game: GameId) {
        let mut rooms = self.rooms.lock();
        let empty = rooms.get(&game).is_some_and(|room| room.lock().is_empty());
        if empty {
            rooms.remove(&game);
        }
    }

    /// Runs `f` under the connection's room lock and reports a failure to
    /// the connection.
    fn with_room<T>(
        &self,
        handle: &ConnectionHandle,
        op: &'static str,
        f: impl FnOnce(&mut GameRoom) -> Result<T, TurnsError>,
    ) -> Result<T, TurnsError> {
        let unknown = TurnsError::UnknownConnection {
            connection: handle.id(),
        };
        let room = self.room(handle.game()).ok_or_else(|| unknown.clone())?;
        let mut room = room.lock();
        if room.connection(handle.id()).is_none() {
            return Err(unknown);
        }
        let result = f(&mut room);
        if let Err(err) = &result {
            tracing::warn!(game = %handle.game(), role = %handle.role(), op, "rejected: {}", err);
            room.send_to(
                handle.id(),
                ServerEvent::Error {
                    message: err.user_message(),
                },
            );
        }
        result
    }

    fn started_state(&self, game: GameId) -> Result<GameState, TurnsError> {
        self.store
            .load_state(game)?
            .ok_or(TurnsError::GameNotStarted { game })
    }

    fn acting_state(&self, handle: &ConnectionHandle) -> Result<GameState, TurnsError> {
        if handle.role().is_observer() {
            return Err(TurnsError::ObserverCannotAct);
        }
        self.started_state(handle.game())
    }

    /// Persists `state` with its replay entry, then shows it to everyone.
    fn commit(
        &self,
        room: &mut GameRoom,
        state: &GameState,
        entry: ReplayEntry,
    ) -> Result<(), TurnsError> {
        self.store
            .save_state(room.game(), state, Some(entry.to_record()?))?;
        room.broadcast_state(state);
        debug_check_invariants!(room, "ConnectionRegistry::commit");
        Ok(())
    }

    fn require_debug_events(&self) -> Result<(), TurnsError> {
        if self.config.allow_debug_events {
            Ok(())
        } else {
            Err(TurnsError::DebugEventsDisabled)
        }
    }
}

fn grant_role(seats: &[Seat], request: &ConnectRequest) -> Result<Role, TurnsError> {
    match &request.role {
        Some(role) if role.is_observer() => Ok(role.clone()),
        Some(role) => {
            if seats
                .iter()
                .any(|seat| &seat.role == role && seat.user == request.user)
            {
                Ok(role.clone())
            } else {
                Err(TurnsError::RoleMismatch {
                    role: role.clone(),
                    user: request.user.clone(),
                })
            }
        },
        None => Ok(seats
            .iter()
            .find(|seat| seat.user == request.user)
            .map_or_else(Role::observer, |seat| seat.role.clone())),
    }
}

fn setup_for(record: &GameRecord, seats: &[Seat], rules: &dyn Rules, seed: Option<u64>) -> Setup {
    let players = if seats.is_empty() {
        rules.roles(&record.scenario, &record.options)
    } else {
        seats.iter().map(|seat| seat.role.clone()).collect()
    };
    let mut setup = Setup::new(
        seed.unwrap_or_else(seed_from_entropy),
        record.scenario.clone(),
        players,
    );
    setup.options = record.options.clone();
    setup
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            rules,
            store: _,
            config,
            rooms,
            next_id,
            violation_observer,
        } = self;

        f.debug_struct("ConnectionRegistry")
            .field("rules", rules)
            .field("config", config)
            .field("games", &rooms.lock().len())
            .field("next_id", &next_id.load(Ordering::Relaxed))
            .field("has_violation_observer", &violation_observer.is_some())
            .finish_non_exhaustive()
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
    use crate::network::sink::CollectingSink;
    use crate::replay::tests::Tally;
    use crate::sessions::store::MemoryStore;
    use serde_json::json;

    const GAME: GameId = GameId::new(1);

    fn registry_with(config: RegistryConfig) -> (ConnectionRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.create_game(
            GAME,
            GameRecord::new("tally", "Standard").with_seed(1),
            vec![Seat::new("A", "ada"), Seat::new("B", "bob")],
        );
        let rules = Arc::new(RulesRegistry::new().with(Arc::new(Tally)));
        let registry = ConnectionRegistry::new(rules, store.clone())
            .with_config(config)
            .unwrap();
        (registry, store)
    }

    fn registry() -> (ConnectionRegistry, Arc<MemoryStore>) {
        registry_with(RegistryConfig::production())
    }

    fn join(
        registry: &ConnectionRegistry,
        request: ConnectRequest,
    ) -> (ConnectionHandle, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let handle = registry.connect(request, sink.clone()).unwrap();
        (handle, sink)
    }

    fn total(store: &MemoryStore) -> Value {
        store.load_state(GAME).unwrap().unwrap().get("total").cloned().unwrap()
    }

    #[test]
    fn connect_grants_first_seat_or_observer() {
        let (registry, _) = registry();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let (eve, _) = join(&registry, ConnectRequest::new(GAME, "eve"));
        assert_eq!(ada.role(), &Role::new("A"));
        assert!(eve.role().is_observer());
        match &ada_sink.events()[0] {
            ServerEvent::Roles { role, players } => {
                assert_eq!(role, &Role::new("A"));
                assert_eq!(players.len(), 2);
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(registry.connection_count(GAME), 2);
        assert!(registry.presence(GAME).is_present(&Role::new("A")));
        assert!(!registry.presence(GAME).is_present(&Role::observer()));
    }

    #[test]
    fn seat_bound_to_someone_else_is_refused() {
        let (registry, _) = registry();
        let sink = Arc::new(CollectingSink::new());
        let err = registry
            .connect(ConnectRequest::new(GAME, "bob").with_role("A"), sink)
            .unwrap_err();
        assert!(matches!(err, TurnsError::RoleMismatch { .. }));
        assert_eq!(registry.game_count(), 0);

        let (watcher, _) = join(&registry, ConnectRequest::new(GAME, "bob").with_role("Observer"));
        assert!(watcher.role().is_observer());
    }

    #[test]
    fn start_broadcasts_to_connected_viewers() {
        let (registry, store) = registry();
        let (_, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        assert!(ada_sink.last_view().is_none());
        registry.start(GAME).unwrap();
        assert!(ada_sink.last_view().unwrap().actions.contains_key("add"));
        assert_eq!(store.replay(GAME).unwrap()[0].action, ".setup");
        assert!(registry.start(GAME).is_err());
    }

    #[test]
    fn start_without_viewers_leaves_no_room_behind() {
        let (registry, _) = registry();
        registry.start(GAME).unwrap();
        assert_eq!(registry.game_count(), 0);
    }

    #[test]
    fn accepted_action_reaches_every_viewer() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let (_, bob_sink) = join(&registry, ConnectRequest::new(GAME, "bob"));
        let (_, eve_sink) = join(&registry, ConnectRequest::new(GAME, "eve"));
        for sink in [&ada_sink, &bob_sink, &eve_sink] {
            sink.take();
        }

        registry.apply(&ada, "add", &json!(2)).unwrap();
        for sink in [&ada_sink, &bob_sink, &eve_sink] {
            assert_eq!(sink.len(), 1);
            assert!(sink.last_error().is_none());
        }
        assert_eq!(total(&store), json!(2));
        assert_eq!(store.replay(GAME).unwrap().len(), 2);
    }

    #[test]
    fn rejected_action_is_reported_only_to_originator() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (_, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let (bob, bob_sink) = join(&registry, ConnectRequest::new(GAME, "bob"));
        ada_sink.take();
        bob_sink.take();

        let err = registry.apply(&bob, "add", &json!(1)).unwrap_err();
        assert!(matches!(err, TurnsError::NotYourTurn { .. }));
        assert_eq!(bob_sink.last_error().as_deref(), Some("It is not B's turn."));
        assert!(ada_sink.is_empty());
        assert_eq!(total(&store), json!(0));
    }

    #[test]
    fn failing_rules_leave_state_untouched() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let before = store.load_state(GAME).unwrap();
        let err = registry.apply(&ada, "boom", &Value::Null).unwrap_err();
        assert!(matches!(err, TurnsError::Rules(_)));
        assert_eq!(ada_sink.last_error().as_deref(), Some("boom"));
        assert_eq!(store.load_state(GAME).unwrap(), before);
        assert_eq!(store.replay(GAME).unwrap().len(), 1);
    }

    #[test]
    fn observers_and_unstarted_games_cannot_act() {
        let (registry, _) = registry();
        let (ada, _) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let (eve, _) = join(&registry, ConnectRequest::new(GAME, "eve"));
        assert!(matches!(
            registry.apply(&ada, "add", &json!(1)),
            Err(TurnsError::GameNotStarted { .. })
        ));
        registry.start(GAME).unwrap();
        assert!(matches!(
            registry.apply(&eve, "add", &json!(1)),
            Err(TurnsError::ObserverCannotAct)
        ));
    }

    #[test]
    fn resign_is_allowed_out_of_turn() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (bob, bob_sink) = join(&registry, ConnectRequest::new(GAME, "bob"));
        registry.resign(&bob).unwrap();
        assert!(store.load_state(GAME).unwrap().unwrap().is_game_over());
        assert!(bob_sink.last_view().unwrap().game_over);
        assert_eq!(store.replay(GAME).unwrap()[1].action, ".resign");
    }

    #[test]
    fn disconnect_updates_presence_and_drops_empty_rooms() {
        let (registry, _) = registry();
        let (ada, _) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let (bob, bob_sink) = join(&registry, ConnectRequest::new(GAME, "bob"));
        bob_sink.take();
        registry.disconnect(&ada).unwrap();
        match bob_sink.events().as_slice() {
            [ServerEvent::Presence(presence)] => {
                assert!(!presence.is_present(&Role::new("A")));
                assert!(presence.is_present(&Role::new("B")));
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            registry.disconnect(&ada),
            Err(TurnsError::UnknownConnection { .. })
        ));
        assert!(matches!(
            registry.apply(&ada, "add", &json!(1)),
            Err(TurnsError::UnknownConnection { .. })
        ));
        registry.disconnect(&bob).unwrap();
        assert_eq!(registry.game_count(), 0);
    }

    #[test]
    fn chat_is_pushed_to_everyone() {
        let (registry, store) = registry();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let (eve, eve_sink) = join(&registry, ConnectRequest::new(GAME, "eve"));
        registry.chat(&ada, "hello").unwrap();
        assert_eq!(eve_sink.chat_entries()[0].message, "hello");
        assert_eq!(ada_sink.chat_entries()[0].author, "ada");

        assert!(registry.chat(&eve, "me too").is_err());
        assert_eq!(store.chat(GAME).unwrap().len(), 1);

        let long = "x".repeat(5000);
        assert!(registry.chat(&ada, &long).is_err());
    }

    #[test]
    fn get_chat_resends_from_requested_position() {
        let (registry, _) = registry();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        registry.chat(&ada, "one").unwrap();
        registry.chat(&ada, "two").unwrap();
        ada_sink.take();
        registry.get_chat(&ada, 1).unwrap();
        match ada_sink.events().as_slice() {
            [ServerEvent::Chat { cursor, entries }] => {
                assert_eq!(*cursor, 1);
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].message, "two");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn debug_events_are_gated() {
        let (registry, _) = registry();
        registry.start(GAME).unwrap();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        assert!(matches!(
            registry.save(&ada),
            Err(TurnsError::DebugEventsDisabled)
        ));
        assert!(ada_sink.last_error().is_some());
    }

    #[test]
    fn restore_replaces_state_and_drops_replay() {
        let (registry, store) = registry_with(RegistryConfig::development());
        registry.start(GAME).unwrap();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        registry
            .restore(&ada, r#"{"active":"B","total":40,"log":["x"]}"#)
            .unwrap();
        assert_eq!(total(&store), json!(40));
        assert!(store.replay(GAME).unwrap().is_empty());
        assert!(ada_sink.last_view().unwrap().actions.is_empty());

        ada_sink.take();
        registry.save(&ada).unwrap();
        match ada_sink.events().as_slice() {
            [ServerEvent::Save { state }] => assert!(state.contains("40")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn restart_sets_up_again() {
        let (registry, store) = registry_with(RegistryConfig::development());
        registry.start(GAME).unwrap();
        let (ada, _) = join(&registry, ConnectRequest::new(GAME, "ada"));
        registry.apply(&ada, "add", &json!(3)).unwrap();
        registry.restart(&ada, "Standard").unwrap();
        assert_eq!(total(&store), json!(0));
        assert_eq!(store.replay(GAME).unwrap().len(), 1);
        assert!(registry.restart(&ada, "Nope").is_err());
    }

    #[test]
    fn handle_event_dispatches() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (ada, ada_sink) = join(&registry, ConnectRequest::new(GAME, "ada"));
        let event: ClientEvent =
            serde_json::from_value(json!({ "event": "action", "data": { "verb": "add", "args": 5 } }))
                .unwrap();
        registry.handle_event(&ada, event).unwrap();
        assert_eq!(total(&store), json!(5));

        let query = ClientEvent::Query {
            name: "score".into(),
            params: Value::Null,
        };
        assert!(registry.handle_event(&ada, query).is_err());
        assert!(ada_sink.last_error().unwrap().contains("score"));
    }

    #[test]
    fn reconnect_resumes_log_position() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (ada, _) = join(&registry, ConnectRequest::new(GAME, "ada"));
        registry.apply(&ada, "add", &json!(1)).unwrap();
        let log_len = store.load_state(GAME).unwrap().unwrap().log_len();
        let (_, again) = join(
            &registry,
            ConnectRequest::new(GAME, "ada").with_log_seen(log_len),
        );
        let view = again.last_view().unwrap();
        assert_eq!(view.log_start, 0);
        assert!(view.log.is_empty());
    }

    #[test]
    fn stored_replay_reconstructs() {
        let (registry, store) = registry();
        registry.start(GAME).unwrap();
        let (ada, _) = join(&registry, ConnectRequest::new(GAME, "ada"));
        registry.apply(&ada, "add", &json!(1)).unwrap();
        registry.apply(&ada, "pass", &Value::Null).unwrap();
        let result = registry.replay(GAME, ReplayMode::Normal).unwrap();
        assert!(result.is_complete());
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.state, store.load_state(GAME).unwrap());
    }
}
