//! On-log record layout.
//!
//! Producers write every record as `[magic_byte(1)][schema_version(4)][datum(N)]`
//! where the schema version is a big-endian `i32` and the datum is Avro binary
//! encoded with the road schema of that version.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Magic byte that starts every record written onto a road.
pub const MAGIC_BYTE: u8 = 0x00;

/// Length of the record header (magic byte plus schema version).
pub const HEADER_LEN: usize = 5;

/// Build a record value from a schema version and an encoded datum.
pub fn encode_record(schema_version: i32, datum: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + datum.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_i32(schema_version);
    buf.put_slice(datum);
    buf.freeze()
}

/// Split a record value into its schema version and the datum that follows.
pub fn split_header(data: &[u8]) -> Result<(i32, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::RecordHeader(format!(
            "record is {} bytes, shorter than the {HEADER_LEN} byte header",
            data.len()
        )));
    }

    if data[0] != MAGIC_BYTE {
        return Err(ProtocolError::RecordHeader(format!(
            "invalid magic byte: expected 0x{MAGIC_BYTE:02x}, got 0x{:02x}",
            data[0]
        )));
    }

    let mut version_bytes = &data[1..HEADER_LEN];
    let schema_version = version_bytes.get_i32();

    Ok((schema_version, &data[HEADER_LEN..]))
}

/// Decode an Avro datum written with `schema` into its JSON representation.
pub fn decode_payload(schema: &apache_avro::Schema, datum: &[u8]) -> Result<Value> {
    let mut reader = datum;
    let value = apache_avro::from_avro_datum(schema, &mut reader, None)
        .map_err(|e| ProtocolError::PayloadDecode(e.to_string()))?;

    Value::try_from(value).map_err(|e| ProtocolError::PayloadDecode(e.to_string()))
}
