//! Kafka backend for [`road_consumer::RoadConsumer`].
//!
//! Every session gets its own `StreamConsumer` joined to the consumer group of
//! its road/stream pair. Offsets are managed manually: auto-commit is off and
//! only subscriber commits move the group position.

/// Consumer configuration and the per-session factory
pub mod config;

/// Consumer-group member with a read-ahead buffer and rebalance forwarding
pub mod consumer;
pub mod error;

pub use config::{KafkaConsumerConfig, KafkaConsumerFactory};
pub use consumer::KafkaRoadConsumer;
