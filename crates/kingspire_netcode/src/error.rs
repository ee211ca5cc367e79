//! # Session Error Types
//!
//! Typed rejections for lobby actions and construction-time failures.
//!
//! Transport failures never appear here: they are handled inside the
//! connection layer and converted into a single disconnect event.

use thiserror::Error;

use kingspire_protocol::ParticipantId;

use crate::lobby::RoomPhase;

/// Errors returned synchronously for rejected lobby actions.
///
/// These never cross the network; the session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    /// The room is at capacity.
    #[error("room full: {max} players maximum")]
    RoomFull {
        /// The room's capacity.
        max: u8,
    },

    /// The action is not legal in the room's current phase.
    #[error("cannot {action} while the room is {phase:?}")]
    InvalidStateTransition {
        /// The rejected action.
        action: &'static str,
        /// The phase it was rejected in.
        phase: RoomPhase,
    },

    /// The action referenced a participant that is not in the room.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// A participant with this id is already in the room.
    #[error("participant {0} already joined")]
    DuplicateParticipant(ParticipantId),
}

/// Result type for lobby operations.
pub type LobbyResult<T> = Result<T, LobbyError>;

/// Errors while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for the expected schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration is self-inconsistent.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What was wrong.
        reason: String,
    },
}

/// Errors while constructing an endpoint.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Binding or dialing failed.
    #[error("transport setup failed: {0}")]
    Io(#[from] std::io::Error),

    /// The supplied configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
