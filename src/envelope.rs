//! Turns raw log records into `MESSAGE` envelopes.

use offramp_protocol::{decode_payload, split_header, MessageEnvelope};
use road_consumer::Record;
use road_registry::SchemaProvider;

use crate::error::{Result, SessionError};

/// Builds envelopes for one road.
pub struct EnvelopeCodec {
    road: String,
    schemas: SchemaProvider,
}

impl EnvelopeCodec {
    pub fn new(road: impl Into<String>, schemas: SchemaProvider) -> Self {
        Self {
            road: road.into(),
            schemas,
        }
    }

    /// Resolve the record's schema version and decode its payload.
    ///
    /// Records without a log timestamp are stamped with the delivery time.
    pub fn envelope(&self, record: &Record) -> Result<MessageEnvelope> {
        let undeliverable = |reason: String| SessionError::Undeliverable {
            partition: record.partition,
            offset: record.offset,
            reason,
        };

        let (version, datum) = split_header(&record.value).map_err(|e| undeliverable(e.to_string()))?;
        let schema = self.schemas.schema(&self.road, version)?;
        let payload = decode_payload(&schema, datum).map_err(|e| undeliverable(e.to_string()))?;

        Ok(MessageEnvelope {
            partition: record.partition,
            offset: record.offset,
            schema: version,
            timestamp_ms: record
                .timestamp_ms
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            payload,
        })
    }
}
