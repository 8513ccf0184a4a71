//! Per-game connection list and broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::network::messages::{ChatEntry, Presence, ServerEvent};
use crate::rules::Rules;
use crate::sessions::connection::{Connection, ConnectionId};
use crate::state::GameState;
use crate::telemetry::{
    InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::view::{project, LogCursor};
use crate::{report_violation_to, GameId};

/// Everything live about one game: its rules module and its viewers.
///
/// The registry keeps each room behind its own mutex. Holding that lock for the
/// whole load → rules → save → broadcast sequence is what makes actions on one
/// game totally ordered, and what makes iterating the connection list during a
/// broadcast safe against concurrent connects and disconnects.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing and fuzzing.
/// It is not part of the stable public API.
pub struct GameRoom {
    game: GameId,
    rules: Arc<dyn Rules>,
    connections: Vec<Connection>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl GameRoom {
    /// Creates an empty room.
    pub fn new(
        game: GameId,
        rules: Arc<dyn Rules>,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        Self {
            game,
            rules,
            connections: Vec::new(),
            violation_observer,
        }
    }

    /// The game this room serves.
    #[must_use]
    pub fn game(&self) -> GameId {
        self.game
    }

    /// The game's rules module.
    #[must_use]
    pub fn rules(&self) -> &Arc<dyn Rules> {
        &self.rules
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Iterates over live connections in connect order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Adds a connection.
    pub fn add(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Removes a connection, returning it if it was present.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.id == id)?;
        Some(self.connections.remove(index))
    }

    /// Looks up a connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Looks up a connection mutably.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    /// Seated-role occupancy. The observer role is never counted.
    #[must_use]
    pub fn presence(&self) -> Presence {
        let mut occupied = BTreeMap::new();
        for connection in &self.connections {
            if !connection.role.is_observer() {
                *occupied.entry(connection.role.clone()).or_insert(0) += 1;
            }
        }
        Presence(occupied)
    }

    /// Sends `event` to one connection.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) {
        if let Some(connection) = self.connection(id) {
            self.deliver(connection, event);
        }
    }

    /// Sends `event` to every connection.
    pub fn send_to_all(&self, event: &ServerEvent) {
        for connection in &self.connections {
            self.deliver(connection, event.clone());
        }
    }

    /// Projects `state` for one connection and sends it.
    pub fn send_state_to(&mut self, id: ConnectionId, state: &GameState) {
        let rules = Arc::clone(&self.rules);
        let observer = self.violation_observer.clone();
        if let Some(connection) = self.connection_mut(id) {
            let event = project_event(rules.as_ref(), state, connection, &observer);
            Self::deliver_with(&observer, connection, event);
        }
    }

    /// Projects `state` for every connection and sends each its own view.
    ///
    /// A view failure for one role is reported to that connection only.
    pub fn broadcast_state(&mut self, state: &GameState) {
        let rules = Arc::clone(&self.rules);
        let observer = self.violation_observer.clone();
        for connection in &mut self.connections {
            let event = project_event(rules.as_ref(), state, connection, &observer);
            Self::deliver_with(&observer, connection, event);
        }
        tracing::trace!(game = %self.game, viewers = self.connections.len(), "broadcast state");
    }

    /// Sends the current occupancy to every connection.
    pub fn broadcast_presence(&self) {
        let event = ServerEvent::Presence(self.presence());
        self.send_to_all(&event);
    }

    /// Forgets every viewer's log position, so the next projection delivers
    /// the whole log. Used when the state is replaced rather than advanced.
    pub fn reset_log_cursors(&mut self) {
        for connection in &mut self.connections {
            connection.log_cursor = LogCursor::default();
        }
    }

    /// Sends one connection the chat lines after its cursor.
    pub fn send_chat_to(&mut self, id: ConnectionId, history: &[ChatEntry]) {
        let observer = self.violation_observer.clone();
        if let Some(connection) = self.connection_mut(id) {
            if let Some(event) = chat_event(connection, history) {
                Self::deliver_with(&observer, connection, event);
            }
        }
    }

    /// Sends every connection its own unseen chat suffix.
    pub fn broadcast_chat(&mut self, history: &[ChatEntry]) {
        let observer = self.violation_observer.clone();
        for connection in &mut self.connections {
            if let Some(event) = chat_event(connection, history) {
                Self::deliver_with(&observer, connection, event);
            }
        }
    }

    fn deliver(&self, connection: &Connection, event: ServerEvent) {
        Self::deliver_with(&self.violation_observer, connection, event);
    }

    fn deliver_with(
        observer: &Option<Arc<dyn ViolationObserver>>,
        connection: &Connection,
        event: ServerEvent,
    ) {
        let name = event.name();
        if connection.send(event).is_err() {
            report_violation_to!(
                observer,
                ViolationSeverity::Warning,
                ViolationKind::Broadcast,
                "dropped {} event for {} ({}): sink closed",
                name,
                connection.id,
                connection.role
            );
        }
    }
}

fn project_event(
    rules: &dyn Rules,
    state: &GameState,
    connection: &mut Connection,
    observer: &Option<Arc<dyn ViolationObserver>>,
) -> ServerEvent {
    match project(rules, state, &connection.role, &mut connection.log_cursor) {
        Ok(view) => {
            let game_over = view.game_over;
            ServerEvent::State { view, game_over }
        },
        Err(err) => {
            report_violation_to!(
                observer,
                ViolationSeverity::Error,
                ViolationKind::Projection,
                "view for {} failed: {}",
                connection.role,
                err
            );
            ServerEvent::Error {
                message: err.message,
            }
        },
    }
}

fn chat_event(connection: &mut Connection, history: &[ChatEntry]) -> Option<ServerEvent> {
    let cursor = connection.chat_length.min(history.len());
    let entries = history.get(cursor..).filter(|rest| !rest.is_empty())?.to_vec();
    connection.chat_length = history.len();
    Some(ServerEvent::Chat { cursor, entries })
}

impl InvariantChecker for GameRoom {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen = Vec::with_capacity(self.connections.len());
        for connection in &self.connections {
            if connection.game != self.game {
                return Err(InvariantViolation::new(
                    "GameRoom",
                    "connection registered in the wrong room",
                )
                .with_details(format!(
                    "{} belongs to game {}, room is {}",
                    connection.id, connection.game, self.game
                )));
            }
            if seen.contains(&connection.id) {
                return Err(InvariantViolation::new("GameRoom", "duplicate connection id")
                    .with_details(connection.id.to_string()));
            }
            seen.push(connection.id);
        }
        if self.presence().roles().any(crate::Role::is_observer) {
            return Err(InvariantViolation::new(
                "GameRoom",
                "presence contains the observer role",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GameRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRoom")
            .field("game", &self.game)
            .field("title", &self.rules.title())
            .field("connections", &self.connections)
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
    use crate::rules::{Scenarios, Setup};
    use crate::sessions::connection::ConnectRequest;
    use crate::telemetry::CollectingObserver;
    use crate::view::View;
    use crate::{Role, RulesError, RulesOperation};
    use serde_json::{json, Map, Value};

    /// Blue may not look at the board.
    struct Secretive;

    impl Rules for Secretive {
        fn title(&self) -> &str {
            "secretive"
        }
        fn scenarios(&self) -> Scenarios {
            Scenarios::List(vec!["Standard".into()])
        }
        fn roles(&self, _: &str, _: &Map<String, Value>) -> Vec<Role> {
            vec![Role::new("Red"), Role::new("Blue")]
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
        fn view(&self, state: &GameState, role: &Role) -> Result<View, RulesError> {
            if role == "Blue" {
                return Err(RulesError::new(RulesOperation::View, "no peeking"));
            }
            let mut view = View::with_prompt(format!("Hello {role}"));
            view.log = state
                .log()
                .iter()
                .filter_map(|l| l.as_str().map(str::to_owned))
                .collect();
            Ok(view)
        }
    }

    fn join(room: &mut GameRoom, id: u64, role: &str) -> Arc<CollectingSink> {
        let sink = Arc::new(CollectingSink::new());
        let request = ConnectRequest::new(room.game(), format!("user{id}"));
        room.add(Connection::new(
            ConnectionId::new(id),
            &request,
            Role::new(role),
            sink.clone(),
        ));
        sink
    }

    fn room() -> GameRoom {
        GameRoom::new(GameId::new(1), Arc::new(Secretive), None)
    }

    #[test]
    fn presence_excludes_observers_and_counts_duplicates() {
        let mut room = room();
        join(&mut room, 1, "Red");
        join(&mut room, 2, "Red");
        join(&mut room, 3, crate::OBSERVER);
        let presence = room.presence();
        assert_eq!(presence.0.get(&Role::new("Red")), Some(&2));
        assert!(!presence.is_present(&Role::observer()));
        assert!(room.check_invariants().is_ok());
    }

    #[test]
    fn broadcast_projects_per_connection() {
        let mut room = room();
        let red = join(&mut room, 1, "Red");
        let watcher = join(&mut room, 2, crate::OBSERVER);
        let state = GameState::try_from(json!({ "log": ["a", "b"] })).unwrap();
        room.broadcast_state(&state);
        assert_eq!(red.last_view().unwrap().prompt.as_deref(), Some("Hello Red"));
        assert_eq!(
            watcher.last_view().unwrap().prompt.as_deref(),
            Some("Hello Observer")
        );
        assert_eq!(room.connection(ConnectionId::new(1)).unwrap().log_length(), 2);
    }

    #[test]
    fn view_failure_reaches_only_that_connection() {
        let observer = Arc::new(CollectingObserver::new());
        let mut room = GameRoom::new(GameId::new(1), Arc::new(Secretive), Some(observer.clone()));
        let red = join(&mut room, 1, "Red");
        let blue = join(&mut room, 2, "Blue");
        room.broadcast_state(&GameState::default());
        assert!(red.last_error().is_none());
        assert_eq!(blue.last_error().as_deref(), Some("no peeking"));
        crate::assert_violation!(observer, ViolationKind::Projection);
    }

    #[test]
    fn closed_sink_is_reported_not_fatal() {
        let observer = Arc::new(CollectingObserver::new());
        let mut room = GameRoom::new(GameId::new(1), Arc::new(Secretive), Some(observer.clone()));
        let gone = join(&mut room, 1, "Red");
        let alive = join(&mut room, 2, crate::OBSERVER);
        gone.close();
        room.broadcast_presence();
        assert_eq!(alive.len(), 1);
        crate::assert_violation!(observer, ViolationKind::Broadcast);
    }

    #[test]
    fn remove_and_reset() {
        let mut room = room();
        join(&mut room, 1, "Red");
        room.broadcast_state(&GameState::try_from(json!({ "log": ["x"] })).unwrap());
        room.reset_log_cursors();
        assert_eq!(room.connection(ConnectionId::new(1)).unwrap().log_length(), 0);
        assert!(room.remove(ConnectionId::new(1)).is_some());
        assert!(room.remove(ConnectionId::new(1)).is_none());
        assert!(room.is_empty());
    }

    #[test]
    fn chat_delivers_each_connection_its_suffix() {
        let mut room = room();
        let fresh = join(&mut room, 1, "Red");
        let history = vec![
            ChatEntry::now("ada", "one"),
            ChatEntry::now("bob", "two"),
            ChatEntry::now("ada", "three"),
        ];
        let request = ConnectRequest::new(room.game(), "late").with_chat_seen(2);
        let caught_up = Arc::new(CollectingSink::new());
        room.add(Connection::new(
            ConnectionId::new(2),
            &request,
            Role::new("Blue"),
            caught_up.clone(),
        ));
        room.broadcast_chat(&history);
        assert_eq!(fresh.chat_entries().len(), 3);
        match caught_up.events().as_slice() {
            [ServerEvent::Chat { cursor, entries }] => {
                assert_eq!(*cursor, 2);
                assert_eq!(entries[0].message, "three");
            },
            other => panic!("unexpected {other:?}"),
        }
        // Nothing new: nothing sent.
        room.send_chat_to(ConnectionId::new(1), &history);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn wrong_room_connection_violates_invariant() {
        let mut room = room();
        let request = ConnectRequest::new(GameId::new(99), "x");
        room.add(Connection::new(
            ConnectionId::new(1),
            &request,
            Role::new("Red"),
            Arc::new(CollectingSink::new()),
        ));
        assert!(room.check_invariants().is_err());
    }
}
