//! Wire protocol for the offramp delivery gateway.
//!
//! Subscribers talk to the gateway over a persistent connection carrying one
//! JSON object per protocol event. The object is discriminated by its `type`
//! field:
//!
//! | type | fields | direction |
//! |---|---|---|
//! | `CONNECTION` | `agentName` | client → server |
//! | `REQUEST` | `count` | client → server |
//! | `MESSAGE` | `partition`, `offset`, `schema`, `timestampMs`, `payload` | server → client |
//! | `COMMIT` | `correlationId`, `offsets` | client → server |
//! | `COMMIT_RESPONSE` | `correlationId`, `success` | server → client |
//! | `REBALANCE` | `assignment` | server → client |
//! | `ERROR` | `reason` | server → client |
//!
//! # Modules
//!
//! - [`event`] - the closed [`Event`] sum type and its encode/decode pair
//! - [`record`] - the on-log record header (`[magic][schema version][datum]`) and Avro payload decoding
//! - [`error`] - error types for malformed events and undecodable records

pub mod error;
pub mod event;
pub mod record;

#[cfg(test)]
mod tests;

pub use error::{ProtocolError, Result};
pub use event::{
    decode, encode, Commit, CommitResponse, Connection, ErrorEvent, Event, EventType,
    MessageEnvelope, Offset, Partition, Rebalance, Request,
};
pub use record::{decode_payload, encode_record, split_header, HEADER_LEN, MAGIC_BYTE};
