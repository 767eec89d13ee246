//! Command-line and environment configuration.

pub mod duration;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use road_consumer_kafka::KafkaConsumerConfig;

pub use duration::parse_duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "offramp")]
#[command(about = "Streams schema-versioned roads to subscribers over WebSocket")]
#[command(long_about = None)]
pub struct Config {
    /// Address the WebSocket listener binds to
    #[arg(long, default_value = "0.0.0.0:8080", env = "OFFRAMP_BIND")]
    pub bind: SocketAddr,

    /// YAML road registry snapshot
    #[arg(long, value_name = "PATH", env = "OFFRAMP_ROADS_FILE")]
    pub roads_file: PathBuf,

    /// How often the road registry file is re-read
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "OFFRAMP_REGISTRY_REFRESH")]
    pub registry_refresh: Duration,

    /// Partitioned log backing the roads
    #[arg(long, value_enum, default_value = "kafka", env = "OFFRAMP_LOG")]
    pub log: LogBackend,

    /// Partitions per road when running on the in-memory log
    #[arg(long, default_value = "2", env = "OFFRAMP_MEMORY_PARTITIONS")]
    pub memory_partitions: usize,

    #[command(flatten)]
    pub kafka: KafkaOpts,

    /// Upper bound for one poll against the log
    #[arg(long, default_value = "100ms", value_parser = parse_duration, env = "OFFRAMP_POLL_INTERVAL")]
    pub poll_interval: Duration,

    /// Terminate sessions without REQUEST or COMMIT activity for this long
    #[arg(long, default_value = "5m", value_parser = parse_duration, env = "OFFRAMP_IDLE_TIMEOUT")]
    pub idle_timeout: Duration,

    /// How often idle sessions are looked for
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "OFFRAMP_REAPER_INTERVAL")]
    pub reaper_interval: Duration,

    /// Reject a second session for the same road, stream and agent
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "OFFRAMP_EXCLUSIVE_STREAMS")]
    pub exclusive_streams: bool,

    /// Append metrics snapshots as JSON lines to this file
    #[arg(long, value_name = "PATH", env = "OFFRAMP_EMIT_METRICS")]
    pub emit_metrics: Option<PathBuf>,

    /// Interval between metrics snapshots
    #[arg(long, default_value = "10s", value_parser = parse_duration, env = "OFFRAMP_METRICS_INTERVAL")]
    pub metrics_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogBackend {
    /// Kafka consumer groups
    Kafka,
    /// Process-local log, for demos and local development
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct KafkaOpts {
    /// Kafka brokers (comma-separated list)
    #[arg(long, default_value = "localhost:9092", env = "OFFRAMP_KAFKA_BROKERS")]
    pub brokers: String,

    /// Prefix prepended to a road name to form its topic
    #[arg(long, default_value = "road.", env = "OFFRAMP_TOPIC_PREFIX")]
    pub topic_prefix: String,

    /// Prefix of every consumer group id
    #[arg(long, default_value = "offramp-", env = "OFFRAMP_GROUP_ID_PREFIX")]
    pub group_id_prefix: String,

    /// Kafka session timeout in milliseconds
    #[arg(long, default_value = "6000", env = "OFFRAMP_KAFKA_SESSION_TIMEOUT_MS")]
    pub kafka_session_timeout_ms: u32,

    /// How long a new session waits for its first partition assignment
    #[arg(long, default_value = "10s", value_parser = parse_duration, env = "OFFRAMP_ASSIGNMENT_TIMEOUT")]
    pub assignment_timeout: Duration,
}

impl KafkaOpts {
    pub fn consumer_config(&self, poll_interval: Duration) -> KafkaConsumerConfig {
        KafkaConsumerConfig {
            brokers: self.brokers.clone(),
            topic_prefix: self.topic_prefix.clone(),
            group_id_prefix: self.group_id_prefix.clone(),
            session_timeout_ms: self.kafka_session_timeout_ms.to_string(),
            poll_interval,
            assignment_timeout: self.assignment_timeout,
            ..Default::default()
        }
    }
}

/// Policies the session manager applies to every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub exclusive_streams: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            exclusive_streams: true,
        }
    }
}

impl Config {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.idle_timeout,
            exclusive_streams: self.exclusive_streams,
        }
    }
}
