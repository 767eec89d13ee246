use thiserror::Error;

use crate::record::Partition;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Partitions not owned by this member: {0:?}")]
    NotOwned(Vec<Partition>),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Transient log error: {0}")]
    Transient(String),

    #[error("Fatal log error: {0}")]
    Fatal(String),

    #[error("Consumer is closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConsumerError {
    /// Whether the consumer can no longer serve its session.
    ///
    /// Everything else is recovered locally: polls retry on the next cycle and
    /// failed commits are reported to the subscriber.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsumerError::Fatal(_) | ConsumerError::Closed | ConsumerError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
