use std::sync::Arc;
use std::time::Duration;

use road_consumer::{ConsumerError, ConsumerFactory, Result, RoadConsumer};

use crate::consumer::KafkaRoadConsumer;

/// Configuration shared by every session's Kafka consumer
#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Prefix prepended to a road name to form its topic
    pub topic_prefix: String,
    /// Prefix prepended to `<road>.<stream>` to form the consumer group id
    ///
    /// Two sessions on the same road and stream join the same group and split
    /// the partitions between them.
    pub group_id_prefix: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: String,
    /// Upper bound for one `poll`
    pub poll_interval: Duration,
    /// How long `init` waits for the group to hand out the first assignment
    pub assignment_timeout: Duration,
    /// Maximum records read ahead of the subscriber's credit
    pub buffer_size: usize,
    /// Consecutive poll failures tolerated before the consumer gives up
    pub max_poll_failures: u32,
}

impl Default for KafkaConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic_prefix: "road.".to_string(),
            group_id_prefix: "offramp-".to_string(),
            session_timeout_ms: "6000".to_string(),
            poll_interval: Duration::from_millis(100),
            assignment_timeout: Duration::from_secs(10),
            buffer_size: 500,
            max_poll_failures: 50,
        }
    }
}

impl KafkaConsumerConfig {
    pub fn topic(&self, road: &str) -> String {
        format!("{}{}", self.topic_prefix, road)
    }

    pub fn group_id(&self, road: &str, stream: &str) -> String {
        format!("{}{}.{}", self.group_id_prefix, road, stream)
    }

    fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "no Kafka brokers configured".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ConsumerError::InvalidConfig(
                "buffer size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Creates one [`KafkaRoadConsumer`] per session.
#[derive(Debug, Clone)]
pub struct KafkaConsumerFactory {
    config: Arc<KafkaConsumerConfig>,
}

impl KafkaConsumerFactory {
    pub fn new(config: KafkaConsumerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &KafkaConsumerConfig {
        &self.config
    }
}

impl ConsumerFactory for KafkaConsumerFactory {
    fn create(&self, road: &str, stream: &str) -> Result<Box<dyn RoadConsumer>> {
        Ok(Box::new(KafkaRoadConsumer::new(
            self.config.clone(),
            road,
            stream,
        )))
    }
}
