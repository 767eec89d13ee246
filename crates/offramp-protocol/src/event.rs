//! Protocol events exchanged between the gateway and a subscriber.
//!
//! Every event is a plain immutable value. [`encode`] and [`decode`] are the
//! only way events cross the wire; each variant has its own body struct and
//! the tag is matched exhaustively in both directions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Partition number on the underlying log.
pub type Partition = i32;

/// Offset of a record within its partition.
pub type Offset = i64;

const TYPE_FIELD: &str = "type";

/// Discriminator of a protocol event, serialized as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Connection,
    Request,
    Message,
    Commit,
    CommitResponse,
    Rebalance,
    Error,
}

impl EventType {
    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connection => "CONNECTION",
            EventType::Request => "REQUEST",
            EventType::Message => "MESSAGE",
            EventType::Commit => "COMMIT",
            EventType::CommitResponse => "COMMIT_RESPONSE",
            EventType::Rebalance => "REBALANCE",
            EventType::Error => "ERROR",
        }
    }

    /// Parse a wire tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "CONNECTION" => Some(EventType::Connection),
            "REQUEST" => Some(EventType::Request),
            "MESSAGE" => Some(EventType::Message),
            "COMMIT" => Some(EventType::Commit),
            "COMMIT_RESPONSE" => Some(EventType::CommitResponse),
            "REBALANCE" => Some(EventType::Rebalance),
            "ERROR" => Some(EventType::Error),
            _ => None,
        }
    }

    /// Whether a subscriber is allowed to send this event to the gateway.
    pub fn is_client_originated(&self) -> bool {
        matches!(
            self,
            EventType::Connection | EventType::Request | EventType::Commit
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake sent by the subscriber once the connection is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub agent_name: String,
}

/// Credit grant: the subscriber authorizes `count` more messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub count: i64,
}

/// One delivered record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub partition: Partition,
    pub offset: Offset,
    /// Schema version the payload was written with.
    pub schema: i32,
    pub timestamp_ms: i64,
    pub payload: Value,
}

/// Offsets the subscriber has finished processing, keyed by partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub correlation_id: String,
    pub offsets: BTreeMap<Partition, Offset>,
}

/// Outcome of the commit carrying the same correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub correlation_id: String,
    pub success: bool,
}

/// The complete set of partitions now assigned to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rebalance {
    pub assignment: BTreeSet<Partition>,
}

/// Final explanatory event sent before the gateway closes a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub reason: String,
}

/// A protocol event. Exactly one variant is active per value.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connection(Connection),
    Request(Request),
    Message(MessageEnvelope),
    Commit(Commit),
    CommitResponse(CommitResponse),
    Rebalance(Rebalance),
    Error(ErrorEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Connection(_) => EventType::Connection,
            Event::Request(_) => EventType::Request,
            Event::Message(_) => EventType::Message,
            Event::Commit(_) => EventType::Commit,
            Event::CommitResponse(_) => EventType::CommitResponse,
            Event::Rebalance(_) => EventType::Rebalance,
            Event::Error(_) => EventType::Error,
        }
    }

    pub fn connection(agent_name: impl Into<String>) -> Self {
        Event::Connection(Connection {
            agent_name: agent_name.into(),
        })
    }

    pub fn request(count: i64) -> Self {
        Event::Request(Request { count })
    }

    pub fn commit(
        correlation_id: impl Into<String>,
        offsets: impl IntoIterator<Item = (Partition, Offset)>,
    ) -> Self {
        Event::Commit(Commit {
            correlation_id: correlation_id.into(),
            offsets: offsets.into_iter().collect(),
        })
    }

    pub fn commit_response(correlation_id: impl Into<String>, success: bool) -> Self {
        Event::CommitResponse(CommitResponse {
            correlation_id: correlation_id.into(),
            success,
        })
    }

    pub fn rebalance(assignment: impl IntoIterator<Item = Partition>) -> Self {
        Event::Rebalance(Rebalance {
            assignment: assignment.into_iter().collect(),
        })
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Event::Error(ErrorEvent {
            reason: reason.into(),
        })
    }
}

/// Encode an event as a single JSON object.
pub fn encode(event: &Event) -> Result<String> {
    let body = match event {
        Event::Connection(body) => serde_json::to_value(body)?,
        Event::Request(body) => serde_json::to_value(body)?,
        Event::Message(body) => serde_json::to_value(body)?,
        Event::Commit(body) => serde_json::to_value(body)?,
        Event::CommitResponse(body) => serde_json::to_value(body)?,
        Event::Rebalance(body) => serde_json::to_value(body)?,
        Event::Error(body) => serde_json::to_value(body)?,
    };

    // Tag first so the wire shape reads `{"type":...,...}`.
    let mut object = Map::new();
    object.insert(
        TYPE_FIELD.to_string(),
        Value::String(event.event_type().as_str().to_string()),
    );
    if let Value::Object(fields) = body {
        object.extend(fields);
    }

    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Decode one JSON object into an event.
///
/// Fails on invalid JSON, a missing or unknown `type` tag, and on a body that
/// lacks a required field of its variant.
pub fn decode(text: &str) -> Result<Event> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(ProtocolError::Malformed(
            "event must be a JSON object".to_string(),
        ));
    };

    let tag = match object.remove(TYPE_FIELD) {
        Some(Value::String(tag)) => tag,
        Some(other) => {
            return Err(ProtocolError::Malformed(format!(
                "'type' must be a string, got {other}"
            )))
        }
        None => return Err(ProtocolError::MissingType),
    };

    let event_type = EventType::parse(&tag).ok_or(ProtocolError::UnknownType(tag))?;
    let body = Value::Object(object);
    let invalid = |source| ProtocolError::InvalidEvent { event_type, source };

    let event = match event_type {
        EventType::Connection => Event::Connection(serde_json::from_value(body).map_err(invalid)?),
        EventType::Request => Event::Request(serde_json::from_value(body).map_err(invalid)?),
        EventType::Message => Event::Message(serde_json::from_value(body).map_err(invalid)?),
        EventType::Commit => Event::Commit(serde_json::from_value(body).map_err(invalid)?),
        EventType::CommitResponse => {
            Event::CommitResponse(serde_json::from_value(body).map_err(invalid)?)
        }
        EventType::Rebalance => Event::Rebalance(serde_json::from_value(body).map_err(invalid)?),
        EventType::Error => Event::Error(serde_json::from_value(body).map_err(invalid)?),
    };

    Ok(event)
}
