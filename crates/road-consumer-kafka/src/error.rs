//! Mapping of rdkafka errors onto the road consumer error taxonomy.

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use road_consumer::ConsumerError;

/// Whether the client reports a condition it cannot recover from.
pub fn is_fatal(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Fatal)
            | Some(RDKafkaErrorCode::Authentication)
            | Some(RDKafkaErrorCode::TopicAuthorizationFailed)
            | Some(RDKafkaErrorCode::GroupAuthorizationFailed)
    )
}

/// Classify a poll failure.
pub fn poll_error(error: KafkaError) -> ConsumerError {
    if is_fatal(&error) {
        ConsumerError::Fatal(format!("Error receiving message: {error}"))
    } else {
        ConsumerError::Transient(format!("Error receiving message: {error}"))
    }
}

/// Classify a commit failure. Only client-fatal conditions end the session.
pub fn commit_error(error: KafkaError) -> ConsumerError {
    if is_fatal(&error) {
        ConsumerError::Fatal(format!("Failed to commit offsets: {error}"))
    } else {
        ConsumerError::CommitFailed(format!("Failed to commit offsets: {error}"))
    }
}
