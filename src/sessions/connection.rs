//! Live connections.

use std::fmt;
use std::sync::Arc;

use crate::network::messages::ServerEvent;
use crate::network::sink::{EventSink, SinkClosed};
use crate::view::LogCursor;
use crate::{GameId, Role};

/// Process-unique identifier of one live connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What a caller holds for a connection it registered.
///
/// Carries the role the registry actually granted, which may be the observer
/// role when none was requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: ConnectionId,
    game: GameId,
    role: Role,
    user: String,
}

impl ConnectionHandle {
    /// The connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The game it watches.
    #[must_use]
    pub fn game(&self) -> GameId {
        self.game
    }

    /// The granted role.
    #[must_use]
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// The authenticated user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Parameters of a `connect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "ConnectRequest has no effect unless passed to ConnectionRegistry::connect()"]
pub struct ConnectRequest {
    /// The game to watch.
    pub game: GameId,
    /// The authenticated user name.
    pub user: String,
    /// The requested role; `None` takes the user's first seat, or observes.
    pub role: Option<Role>,
    /// Log lines the client already has (reconnects).
    pub log_seen: usize,
    /// Chat lines the client already has (reconnects).
    pub chat_seen: usize,
}

impl ConnectRequest {
    /// A fresh connection with no requested role.
    pub fn new(game: GameId, user: impl Into<String>) -> Self {
        Self {
            game,
            user: user.into(),
            role: None,
            log_seen: 0,
            chat_seen: 0,
        }
    }

    /// Requests a specific role.
    pub fn with_role(mut self, role: impl Into<Role>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Resumes from `seen` already-delivered log lines.
    pub fn with_log_seen(mut self, seen: usize) -> Self {
        self.log_seen = seen;
        self
    }

    /// Resumes from `seen` already-delivered chat lines.
    pub fn with_chat_seen(mut self, seen: usize) -> Self {
        self.chat_seen = seen;
        self
    }
}

/// One live transport session, owned by its game's room.
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) game: GameId,
    pub(crate) role: Role,
    pub(crate) user: String,
    pub(crate) log_cursor: LogCursor,
    pub(crate) chat_length: usize,
    sink: Arc<dyn EventSink>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        request: &ConnectRequest,
        role: Role,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id,
            game: request.game,
            role,
            user: request.user.clone(),
            log_cursor: LogCursor::new(request.log_seen),
            chat_length: request.chat_seen,
            sink,
        }
    }

    /// The handle handed back to the caller.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            game: self.game,
            role: self.role.clone(),
            user: self.user.clone(),
        }
    }

    /// The connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The granted role.
    #[must_use]
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Log lines delivered so far.
    #[must_use]
    pub fn log_length(&self) -> usize {
        self.log_cursor.seen()
    }

    /// Chat lines delivered so far.
    #[must_use]
    pub fn chat_length(&self) -> usize {
        self.chat_length
    }

    pub(crate) fn send(&self, event: ServerEvent) -> Result<(), SinkClosed> {
        self.sink.send(event)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            id,
            game,
            role,
            user,
            log_cursor,
            chat_length,
            sink: _,
        } = self;

        f.debug_struct("Connection")
            .field("id", id)
            .field("game", game)
            .field("role", role)
            .field("user", user)
            .field("log_cursor", log_cursor)
            .field("chat_length", chat_length)
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

    #[test]
    fn request_builder_sets_cursors() {
        let request = ConnectRequest::new(GameId::new(3), "ada")
            .with_role("Red")
            .with_log_seen(4)
            .with_chat_seen(2);
        let conn = Connection::new(
            ConnectionId::new(9),
            &request,
            Role::new("Red"),
            Arc::new(CollectingSink::new()),
        );
        assert_eq!(conn.log_length(), 4);
        assert_eq!(conn.chat_length(), 2);
        let handle = conn.handle();
        assert_eq!(handle.id(), ConnectionId::new(9));
        assert_eq!(handle.game(), GameId::new(3));
        assert_eq!(handle.role(), &Role::new("Red"));
        assert_eq!(handle.user(), "ada");
    }

    #[test]
    fn debug_omits_sink() {
        let conn = Connection::new(
            ConnectionId::new(1),
            &ConnectRequest::new(GameId::new(1), "bob"),
            Role::observer(),
            Arc::new(CollectingSink::new()),
        );
        let debug = format!("{conn:?}");
        assert!(debug.contains("Observer"));
        assert!(!debug.contains("sink"));
        assert_eq!(ConnectionId::new(5).to_string(), "conn#5");
    }
}
