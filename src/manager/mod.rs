//! Process-wide registry of active sessions.
//!
//! The session map is the only cross-session shared state. It is touched on
//! create, authenticate and removal, and by the eviction paths, which never
//! reach into a session directly: they only signal its [`SessionControl`] and
//! let the driver run the normal closing path.


use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{Sink, Stream};
use road_consumer::ConsumerFactory;
use road_registry::{RoadRegistry, RoadSnapshot};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::error::{ErrorClass, Result, SessionError};
use crate::metrics::MetricsSink;
use crate::session::{
    drive, Admission, Session, SessionControl, SessionId, SessionServices, StopReason,
    StreamTarget,
};

struct SessionEntry {
    target: StreamTarget,
    agent: Option<String>,
    control: SessionControl,
}

/// Point-in-time description of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub road: String,
    pub stream: String,
    pub agent: Option<String>,
    pub idle_secs: u64,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    registry: Arc<dyn RoadRegistry>,
    consumers: Arc<dyn ConsumerFactory>,
    metrics: Arc<dyn MetricsSink>,
    settings: SessionSettings,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl SessionManager {
    pub fn new(
        registry: Arc<dyn RoadRegistry>,
        consumers: Arc<dyn ConsumerFactory>,
        metrics: Arc<dyn MetricsSink>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            registry,
            consumers,
            metrics,
            settings,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register a new session in `CONNECTING` with a fresh consumer.
    pub fn create(self: &Arc<Self>, target: StreamTarget) -> Result<(Session, SessionControl)> {
        if self.is_shutting_down() {
            return Err(SessionError::Shutdown);
        }
        let consumer = self.consumers.create(&target.road, &target.stream)?;

        let id = Uuid::new_v4();
        let control = SessionControl::new(self.shutdown.child_token());
        let admission: Arc<dyn Admission> = self.clone();
        let services = SessionServices {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            admission,
        };

        self.lock().insert(
            id,
            SessionEntry {
                target: target.clone(),
                agent: None,
                control: control.clone(),
            },
        );
        self.metrics.session_opened(&target.road);
        info!(
            session = %id,
            road = %target.road,
            stream = %target.stream,
            "Session created"
        );

        Ok((Session::new(id, target, consumer, services), control))
    }

    /// Bind an agent identity to a session.
    ///
    /// With exclusive streams, a second live session of the same agent on the
    /// same road and stream is refused.
    pub fn authenticate(&self, id: SessionId, agent: &str) -> Result<()> {
        let mut sessions = self.lock();
        let target = sessions
            .get(&id)
            .map(|entry| entry.target.clone())
            .ok_or_else(|| SessionError::Evicted(format!("session {id} is not registered")))?;

        if self.settings.exclusive_streams {
            let taken = sessions.iter().any(|(other, entry)| {
                *other != id
                    && entry.agent.as_deref() == Some(agent)
                    && entry.target.road == target.road
                    && entry.target.stream == target.stream
            });
            if taken {
                warn!(
                    session = %id,
                    road = %target.road,
                    stream = %target.stream,
                    agent,
                    "Duplicate session refused"
                );
                return Err(SessionError::DuplicateSession {
                    road: target.road,
                    stream: target.stream,
                    agent: agent.to_string(),
                });
            }
        }

        if let Some(entry) = sessions.get_mut(&id) {
            entry.agent = Some(agent.to_string());
        }
        debug!(session = %id, agent, "Session authenticated");
        Ok(())
    }

    /// Drive a created session to completion, then deregister it.
    ///
    /// [`shutdown`](Self::shutdown) waits for every call in progress.
    pub async fn serve<I, E, O>(
        &self,
        mut session: Session,
        control: SessionControl,
        inbound: &mut I,
        outbound: &mut O,
    ) -> Result<()>
    where
        I: Stream<Item = std::result::Result<String, E>> + Unpin,
        E: Into<SessionError>,
        O: Sink<String> + Unpin,
        O::Error: Display,
    {
        let id = session.id();
        self.tracker
            .track_future(async {
                let outcome = drive(&mut session, &control, inbound, outbound).await;
                if let Err(e) = &outcome {
                    if e.class() == ErrorClass::Log {
                        warn!(
                            session = %id,
                            road = %session.target().road,
                            "Session lost its log: {e}"
                        );
                    }
                }
                self.remove(id);
                outcome
            })
            .await
    }

    fn remove(&self, id: SessionId) {
        let removed = self.lock().remove(&id);
        if let Some(entry) = removed {
            self.metrics.session_closed(&entry.target.road);
            debug!(session = %id, "Session deregistered");
        }
    }

    /// Ask one session to terminate. Returns whether it was registered.
    pub fn terminate(&self, id: SessionId, reason: StopReason) -> bool {
        match self.lock().get(&id) {
            Some(entry) => {
                entry.control.stop(reason);
                true
            }
            None => false,
        }
    }

    /// Terminate every session of `road`.
    pub fn evict_road(&self, road: &str, why: &str) -> usize {
        let sessions = self.lock();
        let mut evicted = 0;
        for entry in sessions.values().filter(|e| e.target.road == road) {
            entry.control.stop(StopReason::Evicted(why.to_string()));
            evicted += 1;
        }
        if evicted > 0 {
            info!(road, evicted, "Evicted sessions: {why}");
        }
        evicted
    }

    /// Evict sessions whose road is missing, disabled or deleted in `snapshot`.
    pub fn evict_unavailable(&self, snapshot: &RoadSnapshot) -> usize {
        let roads: BTreeSet<String> = self
            .lock()
            .values()
            .map(|entry| entry.target.road.clone())
            .collect();

        let mut evicted = 0;
        for road in roads {
            let why = match snapshot.get(&road) {
                None => format!("road {road} was removed"),
                Some(r) if r.deleted => format!("road {road} was deleted"),
                Some(r) if !r.enabled => format!("road {road} was disabled"),
                Some(_) => continue,
            };
            evicted += self.evict_road(&road, &why);
        }
        evicted
    }

    /// Terminate sessions without client activity for the idle timeout.
    pub fn reap_idle(&self) -> usize {
        let timeout = self.settings.idle_timeout;
        let sessions = self.lock();
        let mut reaped = 0;
        for (id, entry) in sessions.iter() {
            if !entry.control.is_stopped() && entry.control.idle_for() >= timeout {
                info!(session = %id, "Session idle for {timeout:?}, terminating");
                entry.control.stop(StopReason::IdleTimeout(timeout));
                reaped += 1;
            }
        }
        reaped
    }

    pub fn spawn_idle_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.reap_idle();
                    }
                }
            }
        })
    }

    /// Evict sessions of roads that become unavailable in a new registry snapshot.
    pub fn spawn_registry_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        let mut updates = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            debug!("Road registry dropped, stopping watch");
                            break;
                        }
                        let snapshot = updates.borrow_and_update().clone();
                        manager.evict_unavailable(&snapshot);
                    }
                }
            }
        })
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.lock()
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                road: entry.target.road.clone(),
                stream: entry.target.stream.clone(),
                agent: entry.agent.clone(),
                idle_secs: entry.control.idle_for().as_secs(),
            })
            .collect()
    }

    /// Terminate every session and wait until each has released its consumer.
    pub async fn shutdown(&self) {
        let active = self.active();
        info!(active, "Shutting down sessions");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("All sessions closed");
    }
}

impl Admission for SessionManager {
    fn admit(&self, session: SessionId, _target: &StreamTarget, agent: &str) -> Result<()> {
        self.authenticate(session, agent)
    }
}
