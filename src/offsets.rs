//! Per-partition delivery and commit bookkeeping of one session.

use std::collections::BTreeMap;

use road_consumer::{Assignment, Offset, Partition};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffsetError {
    #[error("Partition {partition}: commit offset {offset} was never delivered (last delivered {last_delivered:?})")]
    AheadOfDelivery {
        partition: Partition,
        offset: Offset,
        last_delivered: Option<Offset>,
    },

    #[error("Partition {partition}: commit offset {offset} is behind last committed {last_committed}")]
    BehindCommitted {
        partition: Partition,
        offset: Offset,
        last_committed: Offset,
    },

    #[error("Partition {0} is not assigned")]
    NotAssigned(Partition),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsets {
    pub last_delivered: Option<Offset>,
    pub last_committed: Option<Offset>,
}

/// Outcome of checking a commit batch against the current assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitCheck {
    /// Every partition is assigned and every offset is in the delivered range
    Valid,
    /// These partitions are not (or no longer) assigned
    Unassigned(Vec<Partition>),
}

/// Tracks the assigned partitions with their delivered and committed offsets.
///
/// Keys are exactly the current assignment, so offsets never exist for a
/// partition the session does not own. `last_committed <= last_delivered`
/// holds for every entry.
#[derive(Debug, Default, Clone)]
pub struct OffsetTracker {
    partitions: BTreeMap<Partition, PartitionOffsets>,
}

/// Partitions that changed hands in one rebalance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssignmentChange {
    pub added: Vec<Partition>,
    pub removed: Vec<Partition>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assignment(&self) -> Assignment {
        self.partitions.keys().copied().collect()
    }

    pub fn is_assigned(&self, partition: Partition) -> bool {
        self.partitions.contains_key(&partition)
    }

    pub fn get(&self, partition: Partition) -> Option<&PartitionOffsets> {
        self.partitions.get(&partition)
    }

    pub fn last_delivered(&self, partition: Partition) -> Option<Offset> {
        self.get(partition).and_then(|p| p.last_delivered)
    }

    pub fn last_committed(&self, partition: Partition) -> Option<Offset> {
        self.get(partition).and_then(|p| p.last_committed)
    }

    /// Replace the assignment. Retained partitions keep their offsets.
    pub fn apply_assignment(&mut self, assignment: &Assignment) -> AssignmentChange {
        let removed: Vec<Partition> = self
            .partitions
            .keys()
            .filter(|p| !assignment.contains(p))
            .copied()
            .collect();
        for partition in &removed {
            self.partitions.remove(partition);
        }

        let mut added = Vec::new();
        for &partition in assignment {
            if let std::collections::btree_map::Entry::Vacant(entry) =
                self.partitions.entry(partition)
            {
                entry.insert(PartitionOffsets::default());
                added.push(partition);
            }
        }

        AssignmentChange { added, removed }
    }

    pub fn record_delivery(&mut self, partition: Partition, offset: Offset) -> Result<(), OffsetError> {
        let entry = self
            .partitions
            .get_mut(&partition)
            .ok_or(OffsetError::NotAssigned(partition))?;
        entry.last_delivered = Some(entry.last_delivered.map_or(offset, |d| d.max(offset)));
        Ok(())
    }

    /// Check a commit batch without changing anything.
    ///
    /// Unassigned partitions are reported before offsets are range-checked,
    /// so a batch racing a rebalance is answered rather than treated as abuse.
    pub fn validate_commit(
        &self,
        offsets: &BTreeMap<Partition, Offset>,
    ) -> Result<CommitCheck, OffsetError> {
        let unassigned: Vec<Partition> = offsets
            .keys()
            .filter(|p| !self.is_assigned(**p))
            .copied()
            .collect();
        if !unassigned.is_empty() {
            return Ok(CommitCheck::Unassigned(unassigned));
        }

        for (&partition, &offset) in offsets {
            let tracked = self
                .partitions
                .get(&partition)
                .ok_or(OffsetError::NotAssigned(partition))?;
            match tracked.last_delivered {
                Some(delivered) if offset <= delivered => {}
                last_delivered => {
                    return Err(OffsetError::AheadOfDelivery {
                        partition,
                        offset,
                        last_delivered,
                    })
                }
            }
            if let Some(committed) = tracked.last_committed {
                if offset < committed {
                    return Err(OffsetError::BehindCommitted {
                        partition,
                        offset,
                        last_committed: committed,
                    });
                }
            }
        }
        Ok(CommitCheck::Valid)
    }

    /// Advance `last_committed` for every still-assigned partition in the batch.
    pub fn mark_committed(&mut self, offsets: &BTreeMap<Partition, Offset>) {
        for (partition, &offset) in offsets {
            if let Some(entry) = self.partitions.get_mut(partition) {
                entry.last_committed = Some(entry.last_committed.map_or(offset, |c| c.max(offset)));
            }
        }
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }
}
