//! Registry snapshot publication.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, Result};
use crate::road::{Road, RoadSnapshot};

/// Read-only access to the current road snapshot.
pub trait RoadRegistry: Send + Sync {
    /// The snapshot in effect right now.
    fn snapshot(&self) -> Arc<RoadSnapshot>;

    /// Look up one road in the current snapshot.
    fn get(&self, road: &str) -> Option<Arc<Road>> {
        self.snapshot().get(road).cloned()
    }

    /// Receiver notified every time a new snapshot is published.
    fn subscribe(&self) -> watch::Receiver<Arc<RoadSnapshot>>;
}

/// Registry whose snapshot is replaced programmatically.
pub struct StaticRoadRegistry {
    current: watch::Sender<Arc<RoadSnapshot>>,
}

impl StaticRoadRegistry {
    pub fn new(snapshot: RoadSnapshot) -> Self {
        let (current, _) = watch::channel(Arc::new(snapshot));
        Self { current }
    }

    pub fn from_roads(roads: impl IntoIterator<Item = Road>) -> Self {
        Self::new(RoadSnapshot::new(roads))
    }

    /// Publish a new snapshot. Readers holding the old one keep it.
    pub fn replace(&self, snapshot: RoadSnapshot) {
        self.current.send_replace(Arc::new(snapshot));
    }
}

impl RoadRegistry for StaticRoadRegistry {
    fn snapshot(&self) -> Arc<RoadSnapshot> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<RoadSnapshot>> {
        self.current.subscribe()
    }
}

/// Registry backed by a YAML file that is re-read on demand or on an interval.
pub struct FileRoadRegistry {
    path: PathBuf,
    inner: StaticRoadRegistry,
}

impl FileRoadRegistry {
    /// Load the initial snapshot. Fails if the file is missing or invalid.
    ///
    /// Blocks on file I/O; call it before serving traffic.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        let snapshot = RoadSnapshot::from_yaml(&content)?;
        info!(
            "Loaded road registry from {:?}: {} roads",
            path,
            snapshot.len()
        );
        Ok(Self {
            path,
            inner: StaticRoadRegistry::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish it. On failure the previous snapshot stays.
    pub async fn reload(&self) -> Result<()> {
        let snapshot = read_snapshot(&self.path).await?;
        debug!("Reloaded road registry: {} roads", snapshot.len());
        self.inner.replace(snapshot);
        Ok(())
    }

    /// Reload the file every `interval` until the task is aborted.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.reload().await {
                    warn!("Keeping previous road registry snapshot: {e}");
                }
            }
        })
    }
}

impl RoadRegistry for FileRoadRegistry {
    fn snapshot(&self) -> Arc<RoadSnapshot> {
        self.inner.snapshot()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<RoadSnapshot>> {
        self.inner.subscribe()
    }
}

async fn read_snapshot(path: &Path) -> Result<RoadSnapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    RoadSnapshot::from_yaml(&content)
}
