use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use web_time::{SystemTime, UNIX_EPOCH};

use crate::sessions::store::Seat;
use crate::view::View;
use crate::Role;

/// One chat line, persisted append-only per game.
///
/// Serialized as `[timestamp, author, message]`, with the timestamp in
/// milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, String, String)", into = "(u64, String, String)")]
pub struct ChatEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Display name of the author.
    pub author: String,
    /// Message text.
    pub message: String,
}

impl ChatEntry {
    /// Creates an entry stamped with the current wall-clock time.
    #[must_use]
    pub fn now(author: impl Into<String>, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            timestamp,
            author: author.into(),
            message: message.into(),
        }
    }
}

impl From<(u64, String, String)> for ChatEntry {
    fn from((timestamp, author, message): (u64, String, String)) -> Self {
        Self {
            timestamp,
            author,
            message,
        }
    }
}

impl From<ChatEntry> for (u64, String, String) {
    fn from(entry: ChatEntry) -> Self {
        (entry.timestamp, entry.author, entry.message)
    }
}

/// Occupancy of seated roles: role → number of live connections holding it.
///
/// Never contains the observer role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Presence(pub BTreeMap<Role, usize>);

impl Presence {
    /// Returns `true` if at least one connection holds `role`.
    #[must_use]
    pub fn is_present(&self, role: &Role) -> bool {
        self.0.get(role).is_some_and(|count| *count > 0)
    }

    /// Iterates over occupied roles.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.0.keys()
    }
}

/// Events a client sends over its socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Perform `verb` with `args`.
    Action {
        /// Verb name as offered in the view's `actions`.
        verb: String,
        /// Verb argument; `null` for plain buttons.
        #[serde(default)]
        args: Value,
    },
    /// Resign the connection's role.
    Resign,
    /// Request chat lines after the first `seen`.
    #[serde(rename = "getchat")]
    GetChat {
        /// Lines the client already has.
        seen: usize,
    },
    /// Post a chat message.
    Chat {
        /// Message text.
        message: String,
    },
    /// Replace the authoritative state (debug only).
    Restore {
        /// State as JSON text.
        state: String,
    },
    /// Set the game up again with a fresh seed (debug only).
    Restart {
        /// Scenario to set up.
        scenario: String,
    },
    /// Dump the authoritative state (debug only).
    Save,
    /// Ask the rules module a read-only question.
    Query {
        /// Query name.
        name: String,
        /// Query parameters.
        #[serde(default)]
        params: Value,
    },
}

/// Events the server pushes to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once on connect: the role this connection holds and the roster.
    Roles {
        /// The connection's role.
        role: Role,
        /// All seats of the game.
        players: Vec<Seat>,
    },
    /// A freshly projected view.
    State {
        /// The projection.
        view: View,
        /// Whether the game has ended.
        game_over: bool,
    },
    /// Chat lines the client has not seen.
    Chat {
        /// Index of the first entry in `entries`.
        cursor: usize,
        /// The new lines.
        entries: Vec<ChatEntry>,
    },
    /// Seated-role occupancy.
    Presence(Presence),
    /// Error text, shown in place of the prompt.
    Error {
        /// Message text.
        message: String,
    },
    /// Authoritative state dump.
    Save {
        /// State as JSON text.
        state: String,
    },
    /// Answer to a [`ClientEvent::Query`].
    Reply {
        /// Query name.
        name: String,
        /// Query result.
        value: Value,
    },
}

impl ServerEvent {
    /// The wire tag, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Roles { .. } => "roles",
            Self::State { .. } => "state",
            Self::Chat { .. } => "chat",
            Self::Presence(_) => "presence",
            Self::Error { .. } => "error",
            Self::Save { .. } => "save",
            Self::Reply { .. } => "reply",
        }
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

    #[test]
    fn test_chat_entry_wire_shape() {
        let entry = ChatEntry {
            timestamp: 1_700_000_000_000,
            author: "ada".into(),
            message: "gg".into(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!([1_700_000_000_000u64, "ada", "gg"]));
        let back: ChatEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_chat_entry_now_is_stamped() {
        let entry = ChatEntry::now("ada", "hello");
        assert!(entry.timestamp > 0);
        assert_eq!(entry.author, "ada");
    }

    #[test]
    fn test_client_action_parses_without_args() {
        let event: ClientEvent =
            serde_json::from_value(json!({ "event": "action", "data": { "verb": "pass" } })).unwrap();
        assert_eq!(
            event,
            ClientEvent::Action {
                verb: "pass".into(),
                args: Value::Null
            }
        );
    }

    #[test]
    fn test_client_unit_events_parse() {
        let resign: ClientEvent = serde_json::from_value(json!({ "event": "resign" })).unwrap();
        assert_eq!(resign, ClientEvent::Resign);
        let chat: ClientEvent =
            serde_json::from_value(json!({ "event": "getchat", "data": { "seen": 3 } })).unwrap();
        assert_eq!(chat, ClientEvent::GetChat { seen: 3 });
    }

    #[test]
    fn test_presence_serializes_as_map() {
        let presence = Presence(BTreeMap::from([(Role::new("Red"), 2)]));
        assert_eq!(serde_json::to_value(&presence).unwrap(), json!({ "Red": 2 }));
        assert!(presence.is_present(&Role::new("Red")));
        assert!(!presence.is_present(&Role::new("Blue")));
    }

    #[test]
    fn test_server_event_names() {
        let event = ServerEvent::Error {
            message: "nope".into(),
        };
        assert_eq!(event.name(), "error");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["message"], "nope");
    }
}
