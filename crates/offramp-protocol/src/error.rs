//! Error types for the offramp wire protocol.

use thiserror::Error;

use crate::event::EventType;

/// Errors raised while encoding or decoding protocol events and log records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Event has no 'type' field")]
    MissingType,

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid {event_type} event: {source}")]
    InvalidEvent {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },

    #[error("Event encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid record header: {0}")]
    RecordHeader(String),

    #[error("Payload decode error: {0}")]
    PayloadDecode(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
