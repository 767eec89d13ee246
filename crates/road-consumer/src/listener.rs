//! Hand-off of partition reassignments into the owning session.
//!
//! Log clients report rebalances on their own threads. The listener only
//! enqueues the new assignment; the session applies it from its own serialized
//! context when it drains the receiving end.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tracing::debug;

use crate::record::Partition;

/// The complete set of partitions assigned to one group member.
pub type Assignment = BTreeSet<Partition>;

/// Sending half of a session's rebalance queue.
#[derive(Debug, Clone)]
pub struct RebalanceListener {
    tx: mpsc::UnboundedSender<Assignment>,
}

impl RebalanceListener {
    /// Create a listener and the queue the session drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Assignment>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report the new full assignment. Never blocks.
    pub fn on_rebalance(&self, assignment: Assignment) {
        if self.tx.send(assignment).is_err() {
            debug!("Rebalance dropped: session already gone");
        }
    }

    /// Whether the session still listens.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
