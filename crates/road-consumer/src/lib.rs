//! Consumer boundary between the offramp session protocol and the partitioned log.
//!
//! A [`RoadConsumer`] owns one consumer-group membership for a road/stream pair.
//! It hands out raw [`Record`]s, accepts offset commits and reports partition
//! reassignments through a [`RebalanceListener`].
//!
//! # Implementations
//!
//! - `road-consumer-kafka` - Kafka consumer groups via rdkafka
//! - [`testing::MemoryLog`] - deterministic in-memory log with injectable rebalances and failures

pub mod consumer;
pub mod error;
pub mod listener;
pub mod record;
pub mod testing;

pub use consumer::{ConsumerFactory, RoadConsumer};
pub use error::{ConsumerError, Result};
pub use listener::{Assignment, RebalanceListener};
pub use record::{Offset, OffsetPolicy, Partition, Record};
