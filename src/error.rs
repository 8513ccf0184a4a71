//! Error types: [`TurnsError`] for the crate, [`RulesError`] for rules modules.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::sessions::connection::ConnectionId;
use crate::{GameId, Role};

/// The rules-module entrypoint that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesOperation {
    /// `setup(seed, scenario, options, players)`.
    Setup,
    /// `action(state, role, verb, args)`.
    Action,
    /// `resign(state, role)`.
    Resign,
    /// `view(state, role)`.
    View,
    /// `query(state, role, name, params)`.
    Query,
    /// `assert(state)`.
    Assert,
}

impl Display for RulesOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::Action => "action",
            Self::Resign => "resign",
            Self::View => "view",
            Self::Query => "query",
            Self::Assert => "assert",
        };
        f.write_str(name)
    }
}

/// The external rules module rejected a call.
///
/// `message` is the rules module's own text; it is what the acting client sees
/// in place of its prompt, so it is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RulesError {
    /// Which entrypoint failed.
    pub operation: RulesOperation,
    /// The original error message.
    pub message: String,
}

impl RulesError {
    /// Creates a new rules error.
    pub fn new(operation: RulesOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl Display for RulesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rules {} failed: {}", self.operation, self.message)
    }
}

impl Error for RulesError {}

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), TurnsError>`].
///
/// [`Result<(), TurnsError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq)]
pub enum TurnsError {
    /// The rules module threw during `setup`, `action`, `resign`, `view` or `query`.
    Rules(RulesError),
    /// A connection asked for a role that is bound to a different user.
    RoleMismatch {
        /// The requested role.
        role: Role,
        /// The user that asked for it.
        user: String,
    },
    /// The acting role is not currently active.
    NotYourTurn {
        /// The role that tried to act.
        role: Role,
    },
    /// Observers may watch but not act.
    ObserverCannotAct,
    /// No game with this identifier is known to the store.
    UnknownGame {
        /// The game that was looked up.
        game: GameId,
    },
    /// No rules module is registered for this title.
    UnknownTitle {
        /// The title that was looked up.
        title: String,
    },
    /// The connection handle no longer refers to a live connection.
    UnknownConnection {
        /// The stale connection.
        connection: ConnectionId,
    },
    /// The game has no authoritative state yet.
    GameNotStarted {
        /// The game that has not been set up.
        game: GameId,
    },
    /// A debug-only event (`restore`, `restart`, `save`) arrived while disabled.
    DebugEventsDisabled,
    /// Replay reconstruction failed partway.
    ReplayCorrupt {
        /// Index of the replay entry that failed.
        step: usize,
        /// What went wrong at that step.
        cause: Box<TurnsError>,
    },
    /// The fuzz driver reached its configured maximum error count.
    FuzzAborted {
        /// Crash artifacts produced so far.
        errors: usize,
        /// The configured ceiling.
        max_errors: usize,
    },
    /// A configuration value was out of range.
    InvalidConfig {
        /// Further specifies why the configuration was invalid.
        info: String,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// Serialization or deserialization of data failed.
    Serialization {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
    /// The persistence collaborator failed.
    Store {
        /// A description of the store failure.
        context: String,
    },
    /// A filesystem operation failed.
    Io {
        /// A description of the I/O failure.
        context: String,
    },
}

impl TurnsError {
    /// The text shown to the acting client in place of its prompt.
    ///
    /// Rules failures are passed through verbatim; everything else uses
    /// the [`Display`] form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rules(err) => err.message.clone(),
            other => other.to_string(),
        }
    }
}

impl Display for TurnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnsError::Rules(err) => write!(f, "{}", err),
            TurnsError::RoleMismatch { role, user } => {
                write!(f, "Role {} is not assigned to {}.", role, user)
            },
            TurnsError::NotYourTurn { role } => write!(f, "It is not {}'s turn.", role),
            TurnsError::ObserverCannotAct => write!(f, "Observers cannot act."),
            TurnsError::UnknownGame { game } => write!(f, "Unknown game {}", game),
            TurnsError::UnknownTitle { title } => write!(f, "No rules registered for {}", title),
            TurnsError::UnknownConnection { connection } => {
                write!(f, "Connection {} is no longer registered", connection)
            },
            TurnsError::GameNotStarted { game } => write!(f, "Game {} has not started", game),
            TurnsError::DebugEventsDisabled => {
                write!(f, "Debug events are disabled on this server.")
            },
            TurnsError::ReplayCorrupt { step, cause } => {
                write!(f, "Replay corrupt at step {}: {}", step, cause)
            },
            TurnsError::FuzzAborted { errors, max_errors } => write!(
                f,
                "Fuzzing aborted after {} errors (maximum {})",
                errors, max_errors
            ),
            TurnsError::InvalidConfig { info } => write!(f, "Invalid configuration: {}", info),
            TurnsError::InvalidRequest { info } => write!(f, "Invalid Request: {}", info),
            TurnsError::Serialization { context } => write!(f, "Serialization error: {}", context),
            TurnsError::Store { context } => write!(f, "Store error: {}", context),
            TurnsError::Io { context } => write!(f, "I/O error: {}", context),
        }
    }
}

impl Error for TurnsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TurnsError::Rules(err) => Some(err),
            TurnsError::ReplayCorrupt { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<RulesError> for TurnsError {
    fn from(err: RulesError) -> Self {
        TurnsError::Rules(err)
    }
}

impl From<serde_json::Error> for TurnsError {
    fn from(err: serde_json::Error) -> Self {
        TurnsError::Serialization {
            context: err.to_string(),
        }
    }
}

impl From<std::io::Error> for TurnsError {
    fn from(err: std::io::Error) -> Self {
        TurnsError::Io {
            context: err.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn user_message_passes_rules_text_through() {
        let err: TurnsError = RulesError::new(RulesOperation::Action, "You must pay first.").into();
        assert_eq!(err.user_message(), "You must pay first.");
        assert_eq!(
            err.to_string(),
            "rules action failed: You must pay first."
        );
    }

    #[test]
    fn replay_corrupt_exposes_cause_as_source() {
        let err = TurnsError::ReplayCorrupt {
            step: 3,
            cause: Box::new(RulesError::new(RulesOperation::Action, "bad").into()),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("step 3"));
    }

    #[test]
    fn json_errors_convert_to_serialization() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: TurnsError = parse.unwrap_err().into();
        assert!(matches!(err, TurnsError::Serialization { .. }));
    }
}
