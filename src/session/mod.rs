//! Per-connection session protocol.
//!
//! A [`Session`] is the state machine: it owns the credit pool, the offset
//! tracker, the commit correlation table and the road consumer. The driver
//! feeds it inbound frames and its own delivery steps one at a time.

mod control;
mod driver;
mod machine;
mod state;

#[cfg(test)]
mod tests;

use road_consumer::OffsetPolicy;

pub use control::{SessionControl, StopReason};
pub use driver::drive;
pub use machine::{Session, SessionServices};
pub use state::SessionState;

use crate::error::Result;

pub type SessionId = uuid::Uuid;

/// The road, stream and default offset a connection asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub road: String,
    pub stream: String,
    pub policy: OffsetPolicy,
}

impl StreamTarget {
    pub fn new(road: impl Into<String>, stream: impl Into<String>, policy: OffsetPolicy) -> Self {
        Self {
            road: road.into(),
            stream: stream.into(),
            policy,
        }
    }
}

/// Decides whether an agent may start streaming once it has identified itself.
pub trait Admission: Send + Sync {
    fn admit(&self, session: SessionId, target: &StreamTarget, agent: &str) -> Result<()>;
}

/// Admits every agent.
pub struct AdmitAll;

impl Admission for AdmitAll {
    fn admit(&self, _session: SessionId, _target: &StreamTarget, _agent: &str) -> Result<()> {
        Ok(())
    }
}
