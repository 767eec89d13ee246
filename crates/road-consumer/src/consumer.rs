//! The consumer contract every log backend honors.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::listener::RebalanceListener;
use crate::record::{Offset, OffsetPolicy, Partition, Record};

/// One consumer-group membership for a road/stream pair.
///
/// All methods are called from the owning session's single logical thread;
/// only the rebalance notification may originate elsewhere, and it goes
/// through the [`RebalanceListener`].
#[async_trait]
pub trait RoadConsumer: Send {
    /// Join the consumer group.
    ///
    /// Must report the initial assignment to `listener` before returning, and
    /// again every time the assignment changes.
    async fn init(&mut self, policy: OffsetPolicy, listener: RebalanceListener) -> Result<()>;

    /// Fetch up to `max_records` records from the assigned partitions.
    ///
    /// Waits at most one bounded poll interval and may return an empty batch.
    /// Records of one partition come back in increasing offset order.
    ///
    /// Must be cancel safe: records are handed out only when the call returns.
    async fn poll(&mut self, max_records: usize) -> Result<Vec<Record>>;

    /// Durably record `offsets` (last processed offset per partition) for the group.
    ///
    /// An error means nothing may be treated as committed.
    async fn commit(&mut self, offsets: &BTreeMap<Partition, Offset>) -> Result<()>;

    /// Leave the consumer group. Idempotent.
    async fn close(&mut self);
}

/// Creates a fresh [`RoadConsumer`] for every session.
pub trait ConsumerFactory: Send + Sync {
    /// `stream` names the consumer group identity on `road`.
    fn create(&self, road: &str, stream: &str) -> Result<Box<dyn RoadConsumer>>;
}
