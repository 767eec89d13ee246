//! Deterministic in-memory partitioned log.
//!
//! [`MemoryLog`] plays the role of the partitioned log for tests and for the
//! gateway's `memory` backend. Roads are created with a fixed number of
//! partitions; consumer groups are keyed by `(road, stream)` and spread the
//! available partitions round-robin over their members. Tests can take
//! partitions away from a group, put them back, and inject commit or poll
//! failures.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::consumer::{ConsumerFactory, RoadConsumer};
use crate::error::{ConsumerError, Result};
use crate::listener::{Assignment, RebalanceListener};
use crate::record::{Offset, OffsetPolicy, Partition, Record};

/// Default bounded wait of an empty poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct PartitionLog {
    start: Offset,
    records: Vec<Record>,
}

impl PartitionLog {
    fn end(&self) -> Offset {
        self.start + self.records.len() as Offset
    }

    fn get(&self, offset: Offset) -> Option<&Record> {
        if offset < self.start {
            return None;
        }
        self.records.get((offset - self.start) as usize)
    }
}

#[derive(Debug)]
struct Member {
    assignment: Assignment,
    positions: BTreeMap<Partition, Offset>,
    policy: OffsetPolicy,
    listener: RebalanceListener,
    announced: bool,
}

#[derive(Debug, Default)]
struct Group {
    /// Next offset to read per partition, as Kafka stores it.
    committed: BTreeMap<Partition, Offset>,
    members: BTreeMap<u64, Member>,
    /// Partitions owned by someone outside this process.
    held_elsewhere: BTreeSet<Partition>,
    fail_commits: bool,
    fatal_poll: Option<String>,
}

#[derive(Debug, Default)]
struct LogState {
    roads: HashMap<String, Vec<PartitionLog>>,
    groups: HashMap<(String, String), Group>,
    next_member: u64,
}

impl LogState {
    /// Spread the group's available partitions round-robin over its members and
    /// notify every member whose assignment changed.
    fn rebalance(&mut self, road: &str, stream: &str) {
        let partition_count = self.roads.get(road).map(|p| p.len()).unwrap_or(0);
        let Some(group) = self.groups.get_mut(&(road.to_string(), stream.to_string())) else {
            return;
        };
        if group.members.is_empty() {
            return;
        }

        let member_ids: Vec<u64> = group.members.keys().copied().collect();
        let mut plan: BTreeMap<u64, Assignment> =
            member_ids.iter().map(|id| (*id, Assignment::new())).collect();
        let available = (0..partition_count as Partition)
            .filter(|p| !group.held_elsewhere.contains(p))
            .enumerate();
        for (i, partition) in available {
            let member_id = member_ids[i % member_ids.len()];
            plan.entry(member_id).or_default().insert(partition);
        }

        let roads = &self.roads;
        for (member_id, assignment) in plan {
            let Some(member) = group.members.get_mut(&member_id) else {
                continue;
            };
            if member.announced && member.assignment == assignment {
                continue;
            }

            member.positions.retain(|p, _| assignment.contains(p));
            for partition in &assignment {
                if member.positions.contains_key(partition) {
                    continue;
                }
                let log = roads
                    .get(road)
                    .and_then(|partitions| partitions.get(*partition as usize));
                let position = match (group.committed.get(partition), log) {
                    (Some(next), _) => *next,
                    (None, Some(log)) => match member.policy {
                        OffsetPolicy::Earliest => log.start,
                        OffsetPolicy::Latest => log.end(),
                    },
                    (None, None) => 0,
                };
                member.positions.insert(*partition, position);
            }

            member.assignment = assignment.clone();
            member.announced = true;
            debug!(road, stream, member_id, ?assignment, "Memory log rebalanced member");
            member.listener.on_rebalance(assignment);
        }
    }
}

/// Shared handle to an in-memory partitioned log.
#[derive(Clone, Default)]
pub struct MemoryLog {
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
    poll_interval: Option<Duration>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `interval` as the bounded wait of empty polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a road with `partitions` empty partitions. Existing roads are kept.
    pub fn create_road(&self, road: &str, partitions: usize) {
        let mut state = self.lock();
        state.roads.entry(road.to_string()).or_insert_with(|| {
            (0..partitions).map(|_| PartitionLog::default()).collect()
        });
    }

    /// Make the next appended offset of an empty partition `start`.
    pub fn set_partition_start(&self, road: &str, partition: Partition, start: Offset) {
        let mut state = self.lock();
        if let Some(log) = state
            .roads
            .get_mut(road)
            .and_then(|partitions| partitions.get_mut(partition as usize))
        {
            if log.records.is_empty() {
                log.start = start;
            }
        }
    }

    /// Append a record value to a partition and return its offset.
    pub fn append(
        &self,
        road: &str,
        partition: Partition,
        value: impl Into<Bytes>,
        timestamp_ms: i64,
    ) -> Result<Offset> {
        let offset = {
            let mut state = self.lock();
            let log = state
                .roads
                .get_mut(road)
                .and_then(|partitions| partitions.get_mut(partition as usize))
                .ok_or_else(|| {
                    ConsumerError::InvalidConfig(format!(
                        "Unknown partition {partition} of road '{road}'"
                    ))
                })?;
            let offset = log.end();
            log.records.push(Record {
                partition,
                offset,
                timestamp_ms: Some(timestamp_ms),
                key: None,
                value: value.into(),
            });
            offset
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    /// Take `partitions` away from the group, as if another process now owns them.
    pub fn revoke(&self, road: &str, stream: &str, partitions: &[Partition]) {
        let mut state = self.lock();
        let group = state
            .groups
            .entry((road.to_string(), stream.to_string()))
            .or_default();
        group.held_elsewhere.extend(partitions.iter().copied());
        for member in group.members.values_mut() {
            member.positions.retain(|p, _| !partitions.contains(p));
        }
        state.rebalance(road, stream);
    }

    /// Give previously revoked partitions back to the group.
    pub fn restore(&self, road: &str, stream: &str, partitions: &[Partition]) {
        let mut state = self.lock();
        if let Some(group) = state
            .groups
            .get_mut(&(road.to_string(), stream.to_string()))
        {
            for partition in partitions {
                group.held_elsewhere.remove(partition);
            }
        }
        state.rebalance(road, stream);
    }

    /// Make every commit of the group fail with a transient error until reset.
    pub fn fail_commits(&self, road: &str, stream: &str, fail: bool) {
        let mut state = self.lock();
        state
            .groups
            .entry((road.to_string(), stream.to_string()))
            .or_default()
            .fail_commits = fail;
    }

    /// Make every poll of the group fail permanently.
    pub fn fail_polls_fatally(&self, road: &str, stream: &str, reason: &str) {
        {
            let mut state = self.lock();
            state
                .groups
                .entry((road.to_string(), stream.to_string()))
                .or_default()
                .fatal_poll = Some(reason.to_string());
        }
        self.appended.notify_waiters();
    }

    /// Committed offsets of the group, as the next offset to read per partition.
    pub fn committed(&self, road: &str, stream: &str) -> BTreeMap<Partition, Offset> {
        let state = self.lock();
        state
            .groups
            .get(&(road.to_string(), stream.to_string()))
            .map(|group| group.committed.clone())
            .unwrap_or_default()
    }

    /// Number of live members in the group.
    pub fn members(&self, road: &str, stream: &str) -> usize {
        let state = self.lock();
        state
            .groups
            .get(&(road.to_string(), stream.to_string()))
            .map(|group| group.members.len())
            .unwrap_or(0)
    }

    /// Create an uninitialized consumer for `(road, stream)`.
    pub fn consumer(&self, road: &str, stream: &str) -> MemoryRoadConsumer {
        MemoryRoadConsumer {
            log: self.clone(),
            road: road.to_string(),
            stream: stream.to_string(),
            member: None,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
        }
    }

    fn take_records(
        &self,
        road: &str,
        stream: &str,
        member_id: u64,
        max_records: usize,
    ) -> Result<Vec<Record>> {
        let mut state = self.lock();
        let LogState { roads, groups, .. } = &mut *state;

        let group = groups
            .get_mut(&(road.to_string(), stream.to_string()))
            .ok_or(ConsumerError::Closed)?;
        if let Some(reason) = &group.fatal_poll {
            return Err(ConsumerError::Fatal(reason.clone()));
        }
        let member = group
            .members
            .get_mut(&member_id)
            .ok_or(ConsumerError::Closed)?;
        let partitions = roads
            .get(road)
            .ok_or_else(|| ConsumerError::Fatal(format!("Road '{road}' no longer exists")))?;

        // One record per partition per pass, so a deep backlog on one
        // partition cannot starve the others.
        let mut records = Vec::new();
        while records.len() < max_records {
            let before = records.len();
            for (partition, position) in member.positions.iter_mut() {
                if records.len() == max_records {
                    break;
                }
                let Some(log) = partitions.get(*partition as usize) else {
                    continue;
                };
                if let Some(record) = log.get(*position) {
                    records.push(record.clone());
                    *position += 1;
                }
            }
            if records.len() == before {
                break;
            }
        }
        Ok(records)
    }
}

impl ConsumerFactory for MemoryLog {
    fn create(&self, road: &str, stream: &str) -> Result<Box<dyn RoadConsumer>> {
        Ok(Box::new(self.consumer(road, stream)))
    }
}

/// A consumer-group member on a [`MemoryLog`].
pub struct MemoryRoadConsumer {
    log: MemoryLog,
    road: String,
    stream: String,
    member: Option<u64>,
    poll_interval: Duration,
}

#[async_trait]
impl RoadConsumer for MemoryRoadConsumer {
    async fn init(&mut self, policy: OffsetPolicy, listener: RebalanceListener) -> Result<()> {
        if self.member.is_some() {
            return Err(ConsumerError::InvalidConfig(
                "consumer already initialized".to_string(),
            ));
        }

        let mut state = self.log.lock();
        if !state.roads.contains_key(&self.road) {
            return Err(ConsumerError::Fatal(format!(
                "No partitions exist for road '{}'",
                self.road
            )));
        }

        let member_id = state.next_member;
        state.next_member += 1;
        state
            .groups
            .entry((self.road.clone(), self.stream.clone()))
            .or_default()
            .members
            .insert(
                member_id,
                Member {
                    assignment: Assignment::new(),
                    positions: BTreeMap::new(),
                    policy,
                    listener,
                    announced: false,
                },
            );
        state.rebalance(&self.road, &self.stream);
        self.member = Some(member_id);

        info!(
            road = %self.road,
            stream = %self.stream,
            member_id,
            %policy,
            "Memory consumer joined group"
        );
        Ok(())
    }

    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>> {
        let member_id = self.member.ok_or(ConsumerError::Closed)?;
        if max_records == 0 {
            return Ok(Vec::new());
        }

        // Register for wake-ups before looking, so an append in between is not missed.
        let appended = self.log.appended.notified();
        let records = self
            .log
            .take_records(&self.road, &self.stream, member_id, max_records)?;
        if !records.is_empty() {
            return Ok(records);
        }

        let _ = tokio::time::timeout(self.poll_interval, appended).await;
        self.log
            .take_records(&self.road, &self.stream, member_id, max_records)
    }

    async fn commit(&mut self, offsets: &BTreeMap<Partition, Offset>) -> Result<()> {
        let member_id = self.member.ok_or(ConsumerError::Closed)?;
        let mut state = self.log.lock();
        let group = state
            .groups
            .get_mut(&(self.road.clone(), self.stream.clone()))
            .ok_or(ConsumerError::Closed)?;
        let member = group
            .members
            .get(&member_id)
            .ok_or(ConsumerError::Closed)?;

        let not_owned: Vec<Partition> = offsets
            .keys()
            .filter(|p| !member.assignment.contains(p))
            .copied()
            .collect();
        if !not_owned.is_empty() {
            return Err(ConsumerError::NotOwned(not_owned));
        }
        if group.fail_commits {
            return Err(ConsumerError::CommitFailed(
                "injected commit failure".to_string(),
            ));
        }

        for (partition, offset) in offsets {
            group.committed.insert(*partition, offset + 1);
        }
        Ok(())
    }

    async fn close(&mut self) {
        let Some(member_id) = self.member.take() else {
            return;
        };

        let mut state = self.log.lock();
        if let Some(group) = state
            .groups
            .get_mut(&(self.road.clone(), self.stream.clone()))
        {
            group.members.remove(&member_id);
        }
        state.rebalance(&self.road, &self.stream);
        info!(road = %self.road, stream = %self.stream, member_id, "Memory consumer left group");
    }
}
