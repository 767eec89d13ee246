//! Offramp delivery gateway
//!
//! Streams records of schema-versioned roads to remote subscribers over
//! WebSocket, with explicit credit-based flow control, client-driven offset
//! commits and live propagation of partition reassignments.
//!
//! # Layout
//!
//! - `offramp_protocol` - protocol events, JSON codec and record header
//! - `road_registry` - road snapshots and schema lookup
//! - `road_consumer` - the consumer boundary and the in-memory log
//! - `road_consumer_kafka` - consumer groups on Kafka
//!
//! This crate holds the per-session protocol ([`session`]), its credit and
//! offset bookkeeping, the process-wide [`SessionManager`] and the listener.
//!
//! # CLI Usage
//!
//! ```bash
//! # Serve roads from Kafka
//! offramp --roads-file roads.yaml --brokers kafka:9092
//!
//! # Local demo on the in-memory log
//! offramp --roads-file roads.yaml --log memory --emit-metrics metrics.jsonl
//! ```

pub mod config;
pub mod credit;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod offsets;
pub mod server;
pub mod session;
pub mod tasks;

pub use config::Config;
pub use error::{Result, SessionError};
pub use manager::SessionManager;
