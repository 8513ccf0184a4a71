//! # Fortress Turns
//!
//! Fortress Turns keeps any number of observers (seated players and spectators)
//! consistent with one authoritative, turn-based state machine, and proves that
//! the state machine is deterministic and that its undo facility is sound.
//!
//! The game rules themselves are supplied by a pluggable [`Rules`] module per
//! title. This crate never inspects rule semantics; it only drives the generic
//! contract:
//!
//! - [`ConnectionRegistry`] tracks live connections per game, applies actions
//!   through the rules module and broadcasts a freshly projected [`View`] to
//!   every viewer before the next action on that game is processed.
//! - [`replay::reconstruct`] replays a persisted action log, digests every
//!   step, collapses undone spans and marks turn-boundary checkpoints.
//! - [`fuzz::FuzzDriver`] walks a rules module with seeded or corpus-supplied
//!   entropy and persists minimal, replayable crash artifacts.
//! - [`rng`] provides the deterministic generators that rules modules use so
//!   that live play, replay and fuzzing all see the same random decisions.

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

pub use error::{RulesError, RulesOperation, TurnsError};
pub use fuzz::{
    BufferEntropy, CrashArtifact, CrashReport, EntropySource, FuzzConfig, FuzzDriver,
    FuzzViolation, SeededEntropy,
};
pub use network::messages::{ChatEntry, ClientEvent, Presence, ServerEvent};
pub use network::sink::{CollectingSink, EventSink};
pub use replay::{
    reconstruct, reconstruct_or_snapshot, AnnotatedEntry, Reconstruction, ReplayEntry,
    ReplayMode, ReplayNavigator, ReplayRecord,
};
pub use rules::{Rules, RulesRegistry, Scenarios, Setup};
pub use sessions::config::RegistryConfig;
pub use sessions::connection::{ConnectRequest, ConnectionHandle, ConnectionId};
pub use sessions::registry::ConnectionRegistry;
pub use sessions::store::{GameRecord, GameStore, MemoryStore, Seat};
pub use state::GameState;
pub use view::{project, ActionArgs, LogCursor, View};

pub mod error;
pub mod fuzz;
pub mod hash;
pub mod replay;
pub mod rng;
pub mod rules;
pub mod snapshot;
pub mod state;
pub mod telemetry;
pub mod view;
/// Live connections, per-game rooms and the persistence boundary.
pub mod sessions {
    pub mod config;
    pub mod connection;
    pub mod registry;
    #[doc(hidden)]
    pub mod room;
    pub mod store;
}
/// Socket protocol and outbound transport.
pub mod network {
    /// Inbound and outbound socket protocol events.
    pub mod messages;
    /// Transport boundary for outbound events.
    pub mod sink;
    /// Tokio channel adapter for outbound events.
    #[cfg(feature = "tokio")]
    pub mod channel_sink;
}

/// Internal module exposing implementation details for testing and fuzzing.
///
/// **This module is NOT part of the public API.** Nothing here is covered by
/// semver compatibility guarantees.
#[doc(hidden)]
pub mod __internal {
    pub use crate::replay::collapse_undone;
    pub use crate::sessions::room::GameRoom;
    pub use crate::snapshot::{crc32c, normalize};
}

// #############
// # CONSTANTS #
// #############

/// Role identifier of a connection that watches without a seat.
pub const OBSERVER: &str = "Observer";

/// `active` sentinel: nobody may act; the game has ended.
pub const ACTIVE_NONE: &str = "None";

/// `active` sentinel: every seated role may act.
pub const ACTIVE_ALL: &str = "All";

/// `active` sentinel: both seats of a two-player game may act.
pub const ACTIVE_BOTH: &str = "Both";

/// The `state` status token that marks a finished game.
pub const GAME_OVER: &str = "game_over";

/// A named participant slot in a game, or [`OBSERVER`].
///
/// # Examples
///
/// ```
/// use fortress_turns::Role;
///
/// let red = Role::new("Red");
/// assert!(!red.is_observer());
/// assert!(Role::observer().is_observer());
/// assert_eq!(red.as_str(), "Red");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Creates a role from its identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The observer pseudo-role.
    #[must_use]
    pub fn observer() -> Self {
        Self(OBSERVER.to_owned())
    }

    /// Returns `true` for the observer pseudo-role.
    #[must_use]
    pub fn is_observer(&self) -> bool {
        self.0 == OBSERVER
    }

    /// Returns the role identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for Role {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Role {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Identifier of one game, as assigned by the external lobby.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GameId(u64);

impl GameId {
    /// Creates a new `GameId`.
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

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GameId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Stack-allocated list of roles; turn-based titles rarely seat more than four.
pub type RoleVec = SmallVec<[Role; 4]>;

/// The role(s) currently entitled to act.
///
/// Parsed from a state's `active` field, which the rules module owns.
///
/// # Examples
///
/// ```
/// use fortress_turns::{Active, Role};
/// use serde_json::json;
///
/// assert_eq!(Active::from_value(Some(&json!("None"))), Active::None);
/// assert!(Active::from_value(Some(&json!("Both"))).includes(&Role::new("Red")));
/// assert!(Active::from_value(Some(&json!(["Red", "Blue"]))).includes(&Role::new("Blue")));
/// assert!(Active::from_value(None).is_terminal());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Active {
    /// Nobody may act (the `"None"` sentinel, or a missing field).
    None,
    /// Every seated role may act (the `"All"` sentinel).
    All,
    /// Both seats may act (the `"Both"` sentinel).
    Both,
    /// Exactly one role may act.
    One(Role),
    /// An ordered list of roles may act.
    Many(RoleVec),
}

impl Active {
    /// Parses an `active` field value.
    ///
    /// Unrecognised shapes (numbers, objects) parse as [`Active::None`].
    #[must_use]
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => match s.as_str() {
                ACTIVE_NONE => Self::None,
                ACTIVE_ALL => Self::All,
                ACTIVE_BOTH => Self::Both,
                role => Self::One(Role::new(role)),
            },
            Some(Value::Array(items)) => Self::Many(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(Role::new)
                    .collect(),
            ),
            _ => Self::None,
        }
    }

    /// Returns `true` for the terminal sentinel.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns `true` if `role` may act now.
    #[must_use]
    pub fn includes(&self, role: &Role) -> bool {
        if role.is_observer() {
            return false;
        }
        match self {
            Self::None => false,
            Self::All | Self::Both => true,
            Self::One(r) => r == role,
            Self::Many(roles) => roles.contains(role),
        }
    }

    /// Returns the roles eligible to act, resolving broadcast sentinels against `roster`.
    #[must_use]
    pub fn candidates(&self, roster: &[Role]) -> RoleVec {
        match self {
            Self::None => RoleVec::new(),
            Self::All | Self::Both => roster.iter().cloned().collect(),
            Self::One(r) => std::iter::once(r.clone()).collect(),
            Self::Many(roles) => roles.clone(),
        }
    }
}

impl fmt::Display for Active {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str(ACTIVE_NONE),
            Self::All => f.write_str(ACTIVE_ALL),
            Self::Both => f.write_str(ACTIVE_BOTH),
            Self::One(role) => write!(f, "{role}"),
            Self::Many(roles) => {
                let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
                write!(f, "[{}]", names.join(", "))
            },
        }
    }
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_as_plain_string() {
        let json = serde_json::to_string(&Role::new("White")).ok();
        assert_eq!(json.as_deref(), Some("\"White\""));
    }

    #[test]
    fn active_parses_every_shape() {
        assert_eq!(Active::from_value(Some(&json!("All"))), Active::All);
        assert_eq!(Active::from_value(Some(&json!("Both"))), Active::Both);
        assert_eq!(
            Active::from_value(Some(&json!("Red"))),
            Active::One(Role::new("Red"))
        );
        assert_eq!(Active::from_value(Some(&Value::Null)), Active::None);
        assert_eq!(Active::from_value(Some(&json!(7))), Active::None);
        match Active::from_value(Some(&json!(["Red", "Blue"]))) {
            Active::Many(roles) => assert_eq!(roles.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn observers_are_never_active() {
        assert!(!Active::All.includes(&Role::observer()));
        assert!(!Active::One(Role::observer()).includes(&Role::observer()));
    }

    #[test]
    fn candidates_resolve_sentinels_against_roster() {
        let roster = [Role::new("Red"), Role::new("Blue")];
        assert_eq!(Active::Both.candidates(&roster).len(), 2);
        assert!(Active::None.candidates(&roster).is_empty());
        assert_eq!(
            Active::One(Role::new("Red")).candidates(&roster).as_slice(),
            &[Role::new("Red")]
        );
    }

    #[test]
    fn active_display_round_trips_sentinels() {
        assert_eq!(Active::None.to_string(), "None");
        let many = Active::Many(RoleVec::from_vec(vec![Role::new("A"), Role::new("B")]));
        assert_eq!(many.to_string(), "[A, B]");
    }
}
