//! Metric ingestion: a lock-free ring buffer in front of the time-series
//! store, drained periodically by a flusher task.
//!
//! The flusher can run as either a tokio task or a dedicated OS thread
//! (`FlusherHandle::spawn_tokio` / `spawn_thread`) since callers embedding
//! this engine in a sync binary shouldn't have to pull in a runtime just to
//! drain a ring buffer.

use crate::series::{SeriesConfig, SeriesError, TimeSeriesStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use telemetry_ring::mpmc::{MpmcConfig, Queue, QueueError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid ring configuration: {0}")]
    InvalidRing(#[from] QueueError),
    #[error("invalid series configuration: {0}")]
    InvalidSeries(#[from] SeriesError),
}

/// A single metric observation flowing through the ingress ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub metric_name: String,
    pub value: f64,
    pub timestamp: SystemTime,
}

impl Observation {
    pub fn new(metric_name: impl Into<String>, value: f64, timestamp: SystemTime) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            timestamp,
        }
    }
}

/// Configuration for a [`StorageEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Ingress ring capacity; must be a power of two (see [`telemetry_ring::Config`]).
    pub ring_capacity: usize,
    /// Upper bound on distinct metric series; further creations are rejected.
    pub max_metrics: usize,
    /// How often the flusher drains the ring into the time-series store.
    pub flush_interval: Duration,
    pub series: SeriesConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 8192,
            max_metrics: 10_000,
            flush_interval: Duration::from_secs(1),
            series: SeriesConfig::default(),
        }
    }
}

/// Counters tracking ingestion and flush health.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub dropped_ingress: AtomicU64,
    pub dropped_series_creation: AtomicU64,
    pub failed_flushes: AtomicU64,
    pub flush_count: AtomicU64,
}

impl EngineStats {
    pub fn dropped_ingress(&self) -> u64 {
        self.dropped_ingress.load(Ordering::Relaxed)
    }

    pub fn dropped_series_creation(&self) -> u64 {
        self.dropped_series_creation.load(Ordering::Relaxed)
    }

    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }
}

/// Owns the ingress ring and the time-series store it feeds.
///
/// The ingress ring is the genuine lock-free MPMC [`Queue`]
/// (`telemetry_ring::mpmc`), not the SPSC [`telemetry_ring::Ring`] — host
/// applications record observations from arbitrarily many threads
/// concurrently, so the hand-off structure in front of the flusher must
/// tolerate concurrent producers without a per-producer registration step.
pub struct StorageEngine {
    ring: Queue<Observation>,
    store: Arc<TimeSeriesStore>,
    max_metrics: usize,
    stats: Arc<EngineStats>,
    running: AtomicBool,
    closed: AtomicBool,
}

impl StorageEngine {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        let ring = Queue::new(MpmcConfig {
            capacity: config.ring_capacity,
        })?;
        let store = Arc::new(TimeSeriesStore::new(config.series)?);
        Ok(Arc::new(Self {
            ring,
            store,
            max_metrics: config.max_metrics,
            stats: Arc::new(EngineStats::default()),
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }))
    }

    /// Submits an observation onto the ingress ring. Returns `false` (and
    /// bumps `dropped_ingress`) if the ring is full or has been closed by
    /// [`StorageEngine::shutdown`].
    pub fn ingest(&self, observation: Observation) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.stats.dropped_ingress.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.ring.push(observation) {
            Ok(()) => true,
            Err(_) => {
                self.stats.dropped_ingress.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Drains up to one ring-capacity worth of observations, grouping by
    /// metric name before appending into the time-series store so that a
    /// burst for one metric doesn't starve admission checks for another.
    pub fn flush(&self) {
        let mut grouped: HashMap<String, Vec<Observation>> = HashMap::new();
        let capacity = self.ring.capacity();
        self.ring.drain_up_to(capacity, |obs| {
            grouped.entry(obs.metric_name.clone()).or_default().push(obs);
        });

        if grouped.is_empty() {
            return;
        }

        let series_touched = grouped.len();
        let mut any_failed = false;
        for (name, observations) in grouped {
            if !self.store.contains(&name) && self.store.series_count() >= self.max_metrics {
                tracing::warn!(metric = %name, count = observations.len(), max_metrics = self.max_metrics, "rejecting new series past max_metrics");
                self.stats
                    .dropped_series_creation
                    .fetch_add(observations.len() as u64, Ordering::Relaxed);
                any_failed = true;
                continue;
            }
            for obs in observations {
                self.store.record(&name, obs.value, obs.timestamp);
            }
        }

        if any_failed {
            self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(series_touched, flush_count = self.stats.flush_count(), "drained ingress ring");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the flusher loop, performs one final drain, and closes the
    /// ingress ring to new writers. Idempotent: a second call just performs
    /// another (empty) final drain.
    pub fn shutdown(&self) {
        tracing::debug!("storage engine shutting down, performing final drain");
        self.running.store(false, Ordering::Release);
        self.flush();
        self.closed.store(true, Ordering::Release);
    }
}

/// A running flusher task, either tokio- or thread-backed.
pub enum FlusherHandle {
    Tokio(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

impl FlusherHandle {
    /// Spawns the flush loop on the current tokio runtime.
    pub fn spawn_tokio(engine: Arc<StorageEngine>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while engine.is_running() {
                ticker.tick().await;
                if engine.is_running() {
                    engine.flush();
                }
            }
        });
        FlusherHandle::Tokio(handle)
    }

    /// Spawns the flush loop on a dedicated OS thread, for embedding this
    /// engine in a binary with no async runtime.
    pub fn spawn_thread(engine: Arc<StorageEngine>, interval: Duration) -> Self {
        let handle = std::thread::spawn(move || {
            while engine.is_running() {
                std::thread::sleep(interval);
                if engine.is_running() {
                    engine.flush();
                }
            }
        });
        FlusherHandle::Thread(handle)
    }

    pub async fn join(self) {
        match self {
            FlusherHandle::Tokio(handle) => {
                let _ = handle.await;
            }
            FlusherHandle::Thread(handle) => {
                let _ = handle.join();
            }
        }
    }

    pub fn join_blocking(self) {
        match self {
            FlusherHandle::Tokio(handle) => handle.abort(),
            FlusherHandle::Thread(handle) => {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::AggregateFn;

    fn config() -> EngineConfig {
        EngineConfig {
            ring_capacity: 64,
            max_metrics: 2,
            flush_interval: Duration::from_millis(10),
            series: SeriesConfig::default(),
        }
    }

    #[test]
    fn ingest_and_flush_populates_the_store() {
        let engine = StorageEngine::new(config()).unwrap();
        let now = SystemTime::now();
        assert!(engine.ingest(Observation::new("cpu", 1.0, now)));
        assert!(engine.ingest(Observation::new("cpu", 2.0, now)));
        engine.flush();

        let stored = engine.store().latest("cpu").unwrap();
        assert_eq!(stored.value, 2.0);
        assert_eq!(engine.stats().flush_count(), 1);
    }

    #[test]
    fn rejects_new_series_past_max_metrics() {
        let engine = StorageEngine::new(config()).unwrap();
        let now = SystemTime::now();
        engine.ingest(Observation::new("a", 1.0, now));
        engine.ingest(Observation::new("b", 1.0, now));
        engine.ingest(Observation::new("c", 1.0, now));
        engine.flush();

        assert_eq!(engine.store().series_count(), 2);
        assert!(engine.stats().dropped_series_creation() > 0);
        assert_eq!(engine.stats().failed_flushes(), 1);
    }

    #[test]
    fn flush_is_a_no_op_when_ring_is_empty() {
        let engine = StorageEngine::new(config()).unwrap();
        engine.flush();
        assert_eq!(engine.stats().flush_count(), 0);
    }

    #[test]
    fn shutdown_performs_final_drain_and_closes_ring() {
        let engine = StorageEngine::new(config()).unwrap();
        engine.ingest(Observation::new("cpu", 42.0, SystemTime::now()));
        engine.shutdown();
        assert!(engine.store().latest("cpu").is_some());
        assert!(!engine.ingest(Observation::new("cpu", 1.0, SystemTime::now())));
    }

    #[tokio::test]
    async fn tokio_flusher_drains_periodically() {
        let engine = StorageEngine::new(config()).unwrap();
        let handle = FlusherHandle::spawn_tokio(Arc::clone(&engine), Duration::from_millis(5));
        engine.ingest(Observation::new("cpu", 7.0, SystemTime::now()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown();
        handle.join().await;

        assert_eq!(engine.store().latest("cpu").unwrap().value, 7.0);
        let _ = engine
            .store()
            .aggregate("cpu", SystemTime::UNIX_EPOCH, SystemTime::now(), AggregateFn::Count);
    }
}
