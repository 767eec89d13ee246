//! Out-of-band control of a running session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

/// Why the session manager ended a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Evicted(String),
    IdleTimeout(Duration),
    Shutdown,
}

impl From<StopReason> for SessionError {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Evicted(why) => SessionError::Evicted(why),
            StopReason::IdleTimeout(idle) => SessionError::IdleTimeout(idle),
            StopReason::Shutdown => SessionError::Shutdown,
        }
    }
}

/// Shared between a session's driver and the session manager.
#[derive(Debug, Clone)]
pub struct SessionControl {
    cancel: CancellationToken,
    reason: Arc<Mutex<Option<StopReason>>>,
    last_activity: Arc<Mutex<Instant>>,
}

impl SessionControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            reason: Arc::new(Mutex::new(None)),
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Ask the driver to terminate. The first reason wins.
    pub fn stop(&self, reason: StopReason) {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(reason);
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session should terminate.
    pub async fn stopped(&self) -> SessionError {
        self.cancel.cancelled().await;
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(StopReason::Shutdown)
            .into()
    }

    /// Record client activity.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}
