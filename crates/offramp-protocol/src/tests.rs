//! Unit tests for the offramp-protocol crate.

use serde_json::json;

use crate::{
    decode, decode_payload, encode, encode_record, split_header, Event, EventType,
    MessageEnvelope, ProtocolError, HEADER_LEN,
};

// ============================================================================
// Event codec
// ============================================================================

#[test]
fn test_rebalance_wire_shape() {
    let event = Event::rebalance([0]);
    let text = encode(&event).unwrap();
    assert_eq!(text, r#"{"type":"REBALANCE","assignment":[0]}"#);
    assert_eq!(decode(&text).unwrap(), event);
}

#[test]
fn test_every_variant_survives_the_wire() {
    let events = vec![
        Event::connection("agent1"),
        Event::request(5),
        Event::Message(MessageEnvelope {
            partition: 1,
            offset: 42,
            schema: 3,
            timestamp_ms: 1_700_000_000_000,
            payload: json!({"id": "abc", "count": 7}),
        }),
        Event::commit("c1", [(0, 12), (3, 99)]),
        Event::commit_response("c1", true),
        Event::rebalance([2, 0, 1]),
        Event::error("road r1 was disabled"),
    ];

    for event in events {
        let text = encode(&event).unwrap();
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded, event, "round trip changed {text}");
    }
}

#[test]
fn test_field_names_are_camel_case() {
    let message = encode(&Event::Message(MessageEnvelope {
        partition: 0,
        offset: 10,
        schema: 1,
        timestamp_ms: 5,
        payload: json!(null),
    }))
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&message).unwrap();
    assert_eq!(value["type"], "MESSAGE");
    assert_eq!(value["timestampMs"], 5);
    assert_eq!(value["schema"], 1);

    let commit = encode(&Event::commit("c9", [(0, 12)])).unwrap();
    let value: serde_json::Value = serde_json::from_str(&commit).unwrap();
    assert_eq!(value["correlationId"], "c9");
    assert_eq!(value["offsets"]["0"], 12);

    let response = encode(&Event::commit_response("c9", false)).unwrap();
    assert_eq!(
        response,
        r#"{"type":"COMMIT_RESPONSE","correlationId":"c9","success":false}"#
    );

    let connection = encode(&Event::connection("agent1")).unwrap();
    assert_eq!(connection, r#"{"type":"CONNECTION","agentName":"agent1"}"#);
}

#[test]
fn test_decode_client_commit_with_string_keys() {
    let event = decode(r#"{"type":"COMMIT","correlationId":"c1","offsets":{"0":12,"1":4}}"#)
        .unwrap();
    assert_eq!(event, Event::commit("c1", [(0, 12), (1, 4)]));
}

#[test]
fn test_decode_ignores_extra_fields() {
    let event = decode(r#"{"type":"REQUEST","count":3,"note":"ignored"}"#).unwrap();
    assert_eq!(event, Event::request(3));
}

#[test]
fn test_decode_unknown_type() {
    let err = decode(r#"{"type":"SUBSCRIBE","count":3}"#).unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownType(tag) if tag == "SUBSCRIBE"));
}

#[test]
fn test_decode_missing_type() {
    let err = decode(r#"{"count":3}"#).unwrap_err();
    assert!(matches!(err, ProtocolError::MissingType));
}

#[test]
fn test_decode_missing_required_field() {
    let err = decode(r#"{"type":"COMMIT","correlationId":"c1"}"#).unwrap_err();
    match err {
        ProtocolError::InvalidEvent { event_type, .. } => {
            assert_eq!(event_type, EventType::Commit)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_decode_rejects_non_objects() {
    assert!(matches!(
        decode("[1,2,3]").unwrap_err(),
        ProtocolError::Malformed(_)
    ));
    assert!(matches!(
        decode("not json").unwrap_err(),
        ProtocolError::Malformed(_)
    ));
    assert!(matches!(
        decode(r#"{"type":7}"#).unwrap_err(),
        ProtocolError::Malformed(_)
    ));
}

#[test]
fn test_client_originated_types() {
    assert!(EventType::Connection.is_client_originated());
    assert!(EventType::Request.is_client_originated());
    assert!(EventType::Commit.is_client_originated());
    assert!(!EventType::Message.is_client_originated());
    assert!(!EventType::CommitResponse.is_client_originated());
    assert!(!EventType::Rebalance.is_client_originated());
    assert!(!EventType::Error.is_client_originated());
}

// ============================================================================
// Record header and payload
// ============================================================================

const SCHEMA: &str = r#"{
    "type": "record",
    "name": "Booking",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "nights", "type": "long"}
    ]
}"#;

#[test]
fn test_record_header_layout() {
    let record = encode_record(258, b"datum");
    assert_eq!(&record[..HEADER_LEN], &[0x00, 0x00, 0x00, 0x01, 0x02]);

    let (version, datum) = split_header(&record).unwrap();
    assert_eq!(version, 258);
    assert_eq!(datum, b"datum");
}

#[test]
fn test_record_header_too_short() {
    let err = split_header(&[0x00, 0x00]).unwrap_err();
    assert!(matches!(err, ProtocolError::RecordHeader(_)));
}

#[test]
fn test_record_header_bad_magic() {
    let err = split_header(&[0x01, 0x00, 0x00, 0x00, 0x01]).unwrap_err();
    assert!(err.to_string().contains("magic byte"));
}

#[test]
fn test_decode_avro_payload() {
    let schema = apache_avro::Schema::parse_str(SCHEMA).unwrap();
    let mut record = apache_avro::types::Record::new(&schema).unwrap();
    record.put("id", "b-17");
    record.put("nights", 3i64);
    let datum = apache_avro::to_avro_datum(&schema, record).unwrap();

    let payload = decode_payload(&schema, &datum).unwrap();
    assert_eq!(payload, json!({"id": "b-17", "nights": 3}));
}

#[test]
fn test_decode_truncated_avro_payload() {
    let schema = apache_avro::Schema::parse_str(SCHEMA).unwrap();
    let err = decode_payload(&schema, &[0x08]).unwrap_err();
    assert!(matches!(err, ProtocolError::PayloadDecode(_)));
}
