use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, Rebalance,
    StreamConsumer,
};
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use rdkafka::{ClientContext, Offset as RdkafkaOffset, TopicPartitionList};
use road_consumer::{
    Assignment, ConsumerError, Offset, OffsetPolicy, Partition, RebalanceListener, Record, Result,
    RoadConsumer,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::KafkaConsumerConfig;
use crate::error;

/// Follow-up wait once the first record of a batch has arrived.
const BATCH_LINGER: Duration = Duration::from_millis(10);

/// Group membership as last reported by librdkafka.
#[derive(Default)]
struct GroupState {
    listener: Option<RebalanceListener>,
    assignment: Assignment,
    /// Bumped on every rebalance; read-ahead from an older generation is stale.
    generation: u64,
    announced: bool,
}

impl GroupState {
    fn announce(&mut self) {
        self.announced = true;
        if let Some(listener) = &self.listener {
            listener.on_rebalance(self.assignment.clone());
        }
    }
}

/// Consumer context forwarding rebalances to the session.
///
/// librdkafka runs the callback on whichever thread serves the consumer queue,
/// so it only updates the shared state and enqueues the new assignment.
struct GroupContext {
    topic: String,
    state: Arc<Mutex<GroupState>>,
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match rebalance {
            Rebalance::Assign(tpl) => {
                for elem in tpl.elements_for_topic(&self.topic) {
                    state.assignment.insert(elem.partition());
                }
            }
            Rebalance::Revoke(tpl) => {
                for elem in tpl.elements_for_topic(&self.topic) {
                    state.assignment.remove(&elem.partition());
                }
            }
            Rebalance::Error(e) => {
                warn!("Rebalance error on {}: {e}", self.topic);
                return;
            }
        }
        state.generation += 1;
        debug!(
            "Rebalance on {}: assignment {:?}",
            self.topic, state.assignment
        );
        state.announce();
    }
}

/// Kafka consumer-group member with a read-ahead buffer and manual offset management
pub struct KafkaRoadConsumer {
    config: Arc<KafkaConsumerConfig>,
    topic: String,
    group_id: String,
    state: Arc<Mutex<GroupState>>,
    consumer: Option<Arc<StreamConsumer<GroupContext>>>,
    buffer: VecDeque<Record>,
    seen_generation: u64,
    poll_failures: u32,
    closed: bool,
}

impl KafkaRoadConsumer {
    /// Does not touch the network until [`RoadConsumer::init`].
    pub fn new(config: Arc<KafkaConsumerConfig>, road: &str, stream: &str) -> Self {
        Self {
            topic: config.topic(road),
            group_id: config.group_id(road, stream),
            config,
            state: Arc::new(Mutex::new(GroupState::default())),
            consumer: None,
            buffer: VecDeque::new(),
            seen_generation: 0,
            poll_failures: 0,
            closed: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Result<Arc<StreamConsumer<GroupContext>>> {
        if self.closed {
            return Err(ConsumerError::Closed);
        }
        self.consumer
            .clone()
            .ok_or_else(|| ConsumerError::Fatal("consumer not initialized".to_string()))
    }

    /// Drop read-ahead fetched before the latest rebalance.
    fn discard_stale(&mut self) {
        let generation = self.lock_state().generation;
        if generation != self.seen_generation {
            if !self.buffer.is_empty() {
                debug!(
                    "Discarding {} read-ahead records after rebalance on {}",
                    self.buffer.len(),
                    self.topic
                );
            }
            self.buffer.clear();
            self.seen_generation = generation;
        }
    }

    fn receive_failed(&mut self, e: rdkafka::error::KafkaError) -> Result<()> {
        self.poll_failures += 1;
        let err = error::poll_error(e);
        if err.is_fatal() || self.poll_failures >= self.config.max_poll_failures {
            return Err(ConsumerError::Fatal(format!(
                "{err} (after {} consecutive failures)",
                self.poll_failures
            )));
        }
        warn!("Poll on {} failed, retrying next cycle: {err}", self.topic);
        Ok(())
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    Record {
        partition: msg.partition(),
        offset: msg.offset(),
        timestamp_ms: msg.timestamp().to_millis(),
        key: msg.key().map(Bytes::copy_from_slice),
        value: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
    }
}

#[async_trait]
impl RoadConsumer for KafkaRoadConsumer {
    async fn init(&mut self, policy: OffsetPolicy, listener: RebalanceListener) -> Result<()> {
        if self.closed {
            return Err(ConsumerError::Closed);
        }
        if self.consumer.is_some() {
            return Err(ConsumerError::Fatal("consumer already initialized".to_string()));
        }

        self.lock_state().listener = Some(listener);

        let context = GroupContext {
            topic: self.topic.clone(),
            state: self.state.clone(),
        };
        let consumer: StreamConsumer<GroupContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", policy.as_reset_str())
            .set("session.timeout.ms", &self.config.session_timeout_ms)
            .set("enable.partition.eof", "false")
            .create_with_context(context)
            .map_err(|e| ConsumerError::Fatal(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&self.topic])
            .map_err(|e| ConsumerError::Fatal(format!("Failed to subscribe to topic: {e}")))?;

        let consumer = Arc::new(consumer);
        self.consumer = Some(consumer.clone());

        // The assignment is handed out from inside recv(), so keep the queue
        // served until the group has answered or the timeout expires.
        let deadline = Instant::now() + self.config.assignment_timeout;
        while !self.lock_state().announced {
            match tokio::time::timeout_at(deadline, consumer.recv()).await {
                Ok(Ok(msg)) => {
                    let record = to_record(&msg);
                    self.discard_stale();
                    self.buffer.push_back(record);
                }
                Ok(Err(e)) => self.receive_failed(e)?,
                Err(_) => break,
            }
        }

        let mut state = self.lock_state();
        if !state.announced {
            warn!(
                "No assignment for group {} within {:?}, starting with none",
                self.group_id, self.config.assignment_timeout
            );
            state.announce();
        }
        info!(
            "Joined group {} on {} with assignment {:?}",
            self.group_id, self.topic, state.assignment
        );
        Ok(())
    }

    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let consumer = self.active()?;
        self.discard_stale();
        if max_records == 0 {
            return Ok(Vec::new());
        }

        let target = max_records.min(self.config.buffer_size);
        let mut wait = self.config.poll_interval;
        while self.buffer.len() < target {
            match tokio::time::timeout(wait, consumer.recv()).await {
                Ok(Ok(msg)) => {
                    let record = to_record(&msg);
                    self.poll_failures = 0;
                    self.discard_stale();
                    self.buffer.push_back(record);
                    wait = BATCH_LINGER;
                }
                Ok(Err(e)) => {
                    self.receive_failed(e)?;
                    break;
                }
                Err(_) => break,
            }
        }

        let take = max_records.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    async fn commit(&mut self, offsets: &BTreeMap<Partition, Offset>) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let consumer = self.active()?;

        let not_owned: Vec<Partition> = {
            let state = self.lock_state();
            offsets
                .keys()
                .filter(|p| !state.assignment.contains(p))
                .copied()
                .collect()
        };
        if !not_owned.is_empty() {
            return Err(ConsumerError::NotOwned(not_owned));
        }

        let mut tpl = TopicPartitionList::new();
        for (&partition, &offset) in offsets {
            tpl.add_partition_offset(&self.topic, partition, RdkafkaOffset::Offset(offset + 1))
                .map_err(|e| {
                    ConsumerError::CommitFailed(format!("Failed to add partition offset: {e}"))
                })?;
        }

        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| ConsumerError::Fatal(format!("Commit task failed: {e}")))?
            .map_err(error::commit_error)?;

        debug!("Committed {:?} for group {}", offsets, self.group_id);
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        self.lock_state().listener = None;

        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            // Dropping the client leaves the group, which blocks on the broker.
            if let Err(e) = tokio::task::spawn_blocking(move || drop(consumer)).await {
                warn!("Failed to release consumer for group {}: {e}", self.group_id);
            }
        }
        info!("Left group {} on {}", self.group_id, self.topic);
    }
}
