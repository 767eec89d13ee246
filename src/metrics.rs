//! Delivery metrics.
//!
//! Sessions report through [`MetricsSink`]; reporting is fire-and-forget and
//! never influences the protocol.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use road_consumer::{Offset, Partition};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

pub trait MetricsSink: Send + Sync {
    fn bytes_consumed(&self, road: &str, bytes: u64);
    fn message_delivered(&self, road: &str, partition: Partition, offset: Offset);
    fn commit_completed(&self, road: &str, success: bool);
    fn session_opened(&self, road: &str);
    fn session_closed(&self, road: &str);
}

/// Discards everything.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn bytes_consumed(&self, _road: &str, _bytes: u64) {}
    fn message_delivered(&self, _road: &str, _partition: Partition, _offset: Offset) {}
    fn commit_completed(&self, _road: &str, _success: bool) {}
    fn session_opened(&self, _road: &str) {}
    fn session_closed(&self, _road: &str) {}
}

/// In-process counters, optionally emitted as JSON lines.
#[derive(Clone)]
pub struct MetricsCollector {
    bytes_consumed: Arc<AtomicU64>,
    messages_delivered: Arc<AtomicU64>,
    commits_succeeded: Arc<AtomicU64>,
    commits_failed: Arc<AtomicU64>,
    active_sessions: Arc<AtomicI64>,
    high_water: Arc<Mutex<BTreeMap<String, BTreeMap<Partition, Offset>>>>,
    start_time: Instant,
}

/// Single metrics entry (one JSON line)
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsEntry {
    pub timestamp: String,
    pub bytes_consumed: u64,
    pub messages_delivered: u64,
    pub commits_succeeded: u64,
    pub commits_failed: u64,
    pub active_sessions: i64,
    /// Highest delivered offset per road and partition
    pub high_water_offsets: BTreeMap<String, BTreeMap<Partition, Offset>>,
    pub throughput_messages_per_sec: f64,
    pub elapsed_secs: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            bytes_consumed: Arc::new(AtomicU64::new(0)),
            messages_delivered: Arc::new(AtomicU64::new(0)),
            commits_succeeded: Arc::new(AtomicU64::new(0)),
            commits_failed: Arc::new(AtomicU64::new(0)),
            active_sessions: Arc::new(AtomicI64::new(0)),
            high_water: Arc::new(Mutex::new(BTreeMap::new())),
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsEntry {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let messages = self.messages_delivered.load(Ordering::Relaxed);

        let throughput = if elapsed > 0.0 {
            messages as f64 / elapsed
        } else {
            0.0
        };

        MetricsEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            messages_delivered: messages,
            commits_succeeded: self.commits_succeeded.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            high_water_offsets: self
                .high_water
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            throughput_messages_per_sec: throughput,
            elapsed_secs: elapsed,
        }
    }

    /// Start background metrics emission task
    pub fn start_emission_task(
        &self,
        output_path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        let collector = self.clone();

        tokio::spawn(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&output_path)
                .await?;

            let mut interval_timer = tokio::time::interval(interval);

            loop {
                interval_timer.tick().await;

                let metrics = collector.snapshot();
                let json_line = serde_json::to_string(&metrics)?;
                file.write_all(json_line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }
        })
    }
}

impl MetricsSink for MetricsCollector {
    fn bytes_consumed(&self, _road: &str, bytes: u64) {
        self.bytes_consumed.fetch_add(bytes, Ordering::Relaxed);
    }

    fn message_delivered(&self, road: &str, partition: Partition, offset: Offset) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
        let mut high_water = self.high_water.lock().unwrap_or_else(PoisonError::into_inner);
        let current = high_water
            .entry(road.to_string())
            .or_default()
            .entry(partition)
            .or_insert(offset);
        *current = (*current).max(offset);
    }

    fn commit_completed(&self, _road: &str, success: bool) {
        let counter = if success {
            &self.commits_succeeded
        } else {
            &self.commits_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn session_opened(&self, _road: &str) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    fn session_closed(&self, _road: &str) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}
