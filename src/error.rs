use std::time::Duration;

use offramp_protocol::ProtocolError;
use road_consumer::ConsumerError;
use road_registry::SchemaError;
use thiserror::Error;

use crate::credit::CreditError;
use crate::offsets::OffsetError;

/// WebSocket close codes used when a session ends.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL: u16 = 1002;
    pub const POLICY: u16 = 1008;
    pub const INTERNAL: u16 = 1011;
}

/// Coarse grouping of termination causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unknown, disabled or deleted road; unknown schema version
    Configuration,
    /// Malformed or out-of-order client events
    Protocol,
    /// The log cannot serve the session any more
    Log,
    /// The connection itself failed
    Transport,
    /// Termination requested by the session manager
    Lifecycle,
}

/// Every reason a session terminates abnormally.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown road: {0}")]
    UnknownRoad(String),

    #[error("Road {0} is disabled")]
    RoadDisabled(String),

    #[error("Road {0} is deleted")]
    RoadDeleted(String),

    #[error("Unknown schema version {version} on road {road}")]
    UnknownSchemaVersion { road: String, version: i32 },

    #[error("Undeliverable record at partition {partition} offset {offset}: {reason}")]
    Undeliverable {
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Malformed event: {0}")]
    Decode(#[source] ProtocolError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Agent {agent} already has a session on {road}/{stream}")]
    DuplicateSession {
        road: String,
        stream: String,
        agent: String,
    },

    #[error("Log error: {0}")]
    Log(#[from] ConsumerError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session evicted: {0}")]
    Evicted(String),

    #[error("No client activity for {0:?}")]
    IdleTimeout(Duration),

    #[error("Server is shutting down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::UnknownRoad(_)
            | SessionError::RoadDisabled(_)
            | SessionError::RoadDeleted(_)
            | SessionError::UnknownSchemaVersion { .. }
            | SessionError::Undeliverable { .. }
            | SessionError::DuplicateSession { .. } => ErrorClass::Configuration,
            SessionError::Decode(_) | SessionError::Protocol(_) => ErrorClass::Protocol,
            SessionError::Log(_) | SessionError::Internal(_) => ErrorClass::Log,
            SessionError::Transport(_) => ErrorClass::Transport,
            SessionError::Evicted(_) | SessionError::IdleTimeout(_) | SessionError::Shutdown => {
                ErrorClass::Lifecycle
            }
        }
    }

    /// Close code sent along with the final frame.
    pub fn close_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Configuration => close_code::POLICY,
            ErrorClass::Protocol => close_code::PROTOCOL,
            ErrorClass::Log | ErrorClass::Transport => close_code::INTERNAL,
            ErrorClass::Lifecycle => close_code::GOING_AWAY,
        }
    }

    /// Whether the client may still receive a final `ERROR` event.
    pub fn reportable(&self) -> bool {
        !matches!(self, SessionError::Transport(_))
    }
}

impl From<SchemaError> for SessionError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::UnknownRoad(road) => SessionError::UnknownRoad(road),
            SchemaError::UnknownSchemaVersion { road, version } => {
                SessionError::UnknownSchemaVersion { road, version }
            }
        }
    }
}

impl From<CreditError> for SessionError {
    fn from(e: CreditError) -> Self {
        SessionError::Protocol(e.to_string())
    }
}

impl From<OffsetError> for SessionError {
    fn from(e: OffsetError) -> Self {
        SessionError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
