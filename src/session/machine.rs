use std::sync::Arc;
use std::time::Duration;

use offramp_protocol::{Commit, Event, EventType};
use road_consumer::{Assignment, RebalanceListener, RoadConsumer};
use road_registry::{RoadRegistry, SchemaProvider};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::credit::CreditPool;
use crate::envelope::EnvelopeCodec;
use crate::error::{Result, SessionError};
use crate::metrics::MetricsSink;
use crate::offsets::{CommitCheck, OffsetTracker};
use crate::session::{Admission, SessionId, SessionState, StreamTarget};

/// Pause after a transient poll failure before the next attempt.
const POLL_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Collaborators a session needs besides its consumer.
#[derive(Clone)]
pub struct SessionServices {
    pub registry: Arc<dyn RoadRegistry>,
    pub metrics: Arc<dyn MetricsSink>,
    pub admission: Arc<dyn Admission>,
}

/// Protocol controller of one subscriber connection.
///
/// Every method takes `&mut self`, so inbound handling, delivery, commits and
/// rebalances of one session are serialized by construction. Rebalances
/// reported by the consumer are queued and applied here, never in the
/// consumer's own context.
pub struct Session {
    id: SessionId,
    target: StreamTarget,
    agent: Option<String>,
    state: SessionState,
    credit: CreditPool,
    offsets: OffsetTracker,
    consumer: Box<dyn RoadConsumer>,
    consumer_closed: bool,
    rebalances: Option<mpsc::UnboundedReceiver<Assignment>>,
    codec: EnvelopeCodec,
    services: SessionServices,
}

impl Session {
    pub fn new(
        id: SessionId,
        target: StreamTarget,
        consumer: Box<dyn RoadConsumer>,
        services: SessionServices,
    ) -> Self {
        let codec = EnvelopeCodec::new(
            target.road.clone(),
            SchemaProvider::new(services.registry.clone()),
        );
        Self {
            id,
            target,
            agent: None,
            state: SessionState::Connecting,
            credit: CreditPool::new(),
            offsets: OffsetTracker::new(),
            consumer,
            consumer_closed: false,
            rebalances: None,
            codec,
            services,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn agent(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn credit(&self) -> u64 {
        self.credit.available()
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    pub fn assignment(&self) -> Assignment {
        self.offsets.assignment()
    }

    /// Apply one inbound event and return the events to send back, in order.
    pub async fn handle(&mut self, event: Event) -> Result<Vec<Event>> {
        let event_type = event.event_type();
        match event {
            Event::Connection(connection) => self.connect(connection.agent_name).await,
            Event::Request(request) => {
                self.require_streaming(event_type)?;
                let available = self.credit.grant(request.count)?;
                debug!(
                    session = %self.id,
                    count = request.count,
                    available,
                    "Credit granted"
                );
                Ok(Vec::new())
            }
            Event::Commit(commit) => {
                self.require_streaming(event_type)?;
                self.commit(commit).await
            }
            Event::Message(_)
            | Event::CommitResponse(_)
            | Event::Rebalance(_)
            | Event::Error(_) => Err(SessionError::Protocol(format!(
                "{event_type} is a server event and cannot be sent by a client"
            ))),
        }
    }

    fn require_streaming(&self, event_type: EventType) -> Result<()> {
        match self.state {
            SessionState::Connecting => Err(SessionError::Protocol(format!(
                "{event_type} received before CONNECTION"
            ))),
            SessionState::Closing | SessionState::Closed => Err(SessionError::Protocol(format!(
                "{event_type} received while session is {}",
                self.state
            ))),
            SessionState::Streaming | SessionState::Rebalancing => Ok(()),
        }
    }

    /// Resolve the road, join the consumer group and start streaming.
    ///
    /// Any failure leaves the session in `CONNECTING`.
    async fn connect(&mut self, agent_name: String) -> Result<Vec<Event>> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::Protocol(format!(
                "CONNECTION received while session is {}",
                self.state
            )));
        }
        let agent = agent_name.trim();
        if agent.is_empty() {
            return Err(SessionError::Protocol(
                "CONNECTION requires a non-empty agentName".to_string(),
            ));
        }

        self.resolve_road()?;
        self.services.admission.admit(self.id, &self.target, agent)?;

        let (listener, rebalances) = RebalanceListener::channel();
        self.consumer.init(self.target.policy, listener).await?;
        self.rebalances = Some(rebalances);
        self.agent = Some(agent.to_string());
        self.state = SessionState::Streaming;

        info!(
            session = %self.id,
            road = %self.target.road,
            stream = %self.target.stream,
            agent,
            policy = %self.target.policy,
            "Session streaming"
        );
        Ok(self.drain_rebalances())
    }

    fn resolve_road(&self) -> Result<()> {
        let road = self
            .services
            .registry
            .get(&self.target.road)
            .ok_or_else(|| SessionError::UnknownRoad(self.target.road.clone()))?;
        if road.deleted {
            return Err(SessionError::RoadDeleted(road.name.clone()));
        }
        if !road.enabled {
            return Err(SessionError::RoadDisabled(road.name.clone()));
        }
        Ok(())
    }

    /// All-or-nothing commit of one correlation id.
    ///
    /// Runs to completion before the next event is handled, so at most one
    /// commit is in flight and a rebalance never interleaves with it.
    async fn commit(&mut self, commit: Commit) -> Result<Vec<Event>> {
        let Commit {
            correlation_id,
            offsets,
        } = commit;

        // Validate against the freshest assignment the consumer has reported.
        let mut events = self.drain_rebalances();

        let success = match self.offsets.validate_commit(&offsets)? {
            CommitCheck::Unassigned(partitions) => {
                info!(
                    session = %self.id,
                    correlation_id = %correlation_id,
                    ?partitions,
                    "Commit rejected: partitions not assigned"
                );
                false
            }
            CommitCheck::Valid if offsets.is_empty() => true,
            CommitCheck::Valid => {
                match self.consumer.commit(&offsets).await {
                    Ok(()) => {
                        self.offsets.mark_committed(&offsets);
                        debug!(
                            session = %self.id,
                            correlation_id = %correlation_id,
                            ?offsets,
                            "Commit succeeded"
                        );
                        true
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!(
                            session = %self.id,
                            correlation_id = %correlation_id,
                            "Commit failed: {e}"
                        );
                        false
                    }
                }
            }
        };

        self.services
            .metrics
            .commit_completed(&self.target.road, success);
        events.push(Event::commit_response(correlation_id, success));
        Ok(events)
    }

    /// Run one delivery cycle.
    ///
    /// Pending rebalances are emitted first. With credit, polls the consumer
    /// once and turns the records into `MESSAGE` events; without credit, waits
    /// for the next rebalance. Cancel safe as long as the consumer's `poll` is.
    pub async fn step(&mut self) -> Result<Vec<Event>> {
        if !self.state.is_streaming() {
            return Ok(Vec::new());
        }

        let events = self.drain_rebalances();
        if !events.is_empty() {
            return Ok(events);
        }

        if !self.credit.can_deliver() {
            return Ok(self.wait_for_rebalance().await);
        }

        let max_records = usize::try_from(self.credit.available()).unwrap_or(usize::MAX);
        let records = match self.consumer.poll(max_records).await {
            Ok(records) => records,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(session = %self.id, "Poll failed, retrying: {e}");
                tokio::time::sleep(POLL_RETRY_BACKOFF).await;
                return Ok(Vec::new());
            }
        };

        // A rebalance reported during the poll goes out before any record.
        let mut events = self.drain_rebalances();
        for record in records {
            if !self.offsets.is_assigned(record.partition) {
                debug!(
                    session = %self.id,
                    partition = record.partition,
                    offset = record.offset,
                    "Dropping record from unassigned partition"
                );
                continue;
            }
            if self
                .offsets
                .last_delivered(record.partition)
                .is_some_and(|delivered| record.offset <= delivered)
            {
                debug!(
                    session = %self.id,
                    partition = record.partition,
                    offset = record.offset,
                    "Dropping already delivered record"
                );
                continue;
            }
            if !self.credit.can_deliver() {
                warn!(session = %self.id, "Consumer returned more records than requested");
                break;
            }

            let envelope = self.codec.envelope(&record)?;
            self.credit.consume()?;
            self.offsets.record_delivery(record.partition, record.offset)?;

            self.services
                .metrics
                .bytes_consumed(&self.target.road, record.value.len() as u64);
            self.services.metrics.message_delivered(
                &self.target.road,
                record.partition,
                record.offset,
            );
            trace!(
                session = %self.id,
                partition = record.partition,
                offset = record.offset,
                "Delivering record"
            );
            events.push(Event::Message(envelope));
        }
        Ok(events)
    }

    async fn wait_for_rebalance(&mut self) -> Vec<Event> {
        let Some(rebalances) = self.rebalances.as_mut() else {
            return std::future::pending().await;
        };
        match rebalances.recv().await {
            Some(assignment) => {
                let mut events = vec![self.apply_rebalance(assignment)];
                events.extend(self.drain_rebalances());
                events
            }
            None => {
                debug!(session = %self.id, "Consumer stopped reporting rebalances");
                self.rebalances = None;
                Vec::new()
            }
        }
    }

    fn drain_rebalances(&mut self) -> Vec<Event> {
        let mut queued = Vec::new();
        if let Some(rebalances) = self.rebalances.as_mut() {
            while let Ok(assignment) = rebalances.try_recv() {
                queued.push(assignment);
            }
        }
        queued
            .into_iter()
            .map(|assignment| self.apply_rebalance(assignment))
            .collect()
    }

    fn apply_rebalance(&mut self, assignment: Assignment) -> Event {
        self.state = SessionState::Rebalancing;

        let change = self.offsets.apply_assignment(&assignment);
        info!(
            session = %self.id,
            road = %self.target.road,
            stream = %self.target.stream,
            ?assignment,
            added = ?change.added,
            removed = ?change.removed,
            "Partition assignment changed"
        );

        self.state = SessionState::Streaming;
        Event::rebalance(assignment)
    }

    /// Discard all tracking and release the group membership. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        self.offsets.clear();
        self.rebalances = None;

        if !self.consumer_closed {
            self.consumer_closed = true;
            self.consumer.close().await;
        }
        self.state = SessionState::Closed;
        debug!(session = %self.id, "Session closed");
    }
}
