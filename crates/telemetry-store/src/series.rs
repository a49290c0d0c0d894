//! Per-metric fixed-capacity time-series storage with retention and
//! point-in-time aggregate queries.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeriesError {
    #[error("max_points must be non-zero")]
    ZeroCapacity,
    #[error("series '{0}' not found")]
    NotFound(String),
}

/// Configuration shared by every series a [`TimeSeriesStore`] creates.
#[derive(Debug, Clone, Copy)]
pub struct SeriesConfig {
    /// Capacity of each series' point ring. Oldest points are evicted once full.
    pub max_points: usize,
    /// Points older than this, relative to the newest point recorded, are
    /// pruned lazily on write and on read.
    pub retention_period: Duration,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            max_points: 3600,
            retention_period: Duration::from_secs(3600),
        }
    }
}

impl SeriesConfig {
    pub fn validate(&self) -> Result<(), SeriesError> {
        if self.max_points == 0 {
            return Err(SeriesError::ZeroCapacity);
        }
        Ok(())
    }
}

/// A single recorded observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: SystemTime,
    pub value: f64,
}

/// Aggregation functions supported by [`TimeSeriesStore::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFn {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Quantile(f64),
}

struct SeriesData {
    points: VecDeque<Point>,
    max_points: usize,
    retention_period: Duration,
}

impl SeriesData {
    fn new(config: SeriesConfig) -> Self {
        Self {
            points: VecDeque::with_capacity(config.max_points),
            max_points: config.max_points,
            retention_period: config.retention_period,
        }
    }

    fn prune(&mut self, now: SystemTime) {
        while let Some(front) = self.points.front() {
            match now.duration_since(front.timestamp) {
                Ok(age) if age > self.retention_period => {
                    self.points.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Appends `point`, pruning expired points first. Returns `false` (and
    /// leaves `points` untouched) if `point` is a late arrival — its
    /// timestamp is older than the series' current newest point — so that
    /// successive stored timestamps stay non-decreasing.
    fn push(&mut self, point: Point) -> bool {
        if let Some(newest) = self.points.back() {
            if point.timestamp < newest.timestamp {
                return false;
            }
        }
        self.prune(point.timestamp);
        if self.points.len() >= self.max_points {
            self.points.pop_front();
        }
        self.points.push_back(point);
        true
    }

    fn in_range(&self, from: SystemTime, to: SystemTime) -> Vec<Point> {
        self.points
            .iter()
            .filter(|p| p.timestamp >= from && p.timestamp <= to)
            .copied()
            .collect()
    }
}

/// Thread-safe map of named time series.
///
/// The map itself is guarded by an `RwLock` since lookups (series already
/// exists) vastly outnumber structural inserts — "readers dominate" per the
/// storage layer's concurrency model. Mutating an individual series (append
/// a point) only needs that series' own `Mutex`, not the map-wide write lock.
pub struct TimeSeriesStore {
    config: SeriesConfig,
    series: RwLock<HashMap<String, Mutex<SeriesData>>>,
    dropped_late_arrivals: AtomicU64,
}

impl TimeSeriesStore {
    pub fn new(config: SeriesConfig) -> Result<Self, SeriesError> {
        config.validate()?;
        Ok(Self {
            config,
            series: RwLock::new(HashMap::new()),
            dropped_late_arrivals: AtomicU64::new(0),
        })
    }

    /// Records a value, creating the series on first write.
    ///
    /// Returns `true` if this call created a brand-new series — callers
    /// (the storage engine, which owns the `max_metrics` cap) use this to
    /// decide whether to run their own admission check. A late-arriving
    /// point (older than the series' current newest point) is dropped and
    /// counted in [`TimeSeriesStore::dropped_late_arrivals`] rather than
    /// creating a series or being stored out of order.
    pub fn record(&self, name: &str, value: f64, timestamp: SystemTime) -> bool {
        {
            let map = self.series.read().unwrap();
            if let Some(series) = map.get(name) {
                if !series.lock().unwrap().push(Point { timestamp, value }) {
                    self.dropped_late_arrivals.fetch_add(1, Ordering::Relaxed);
                }
                return false;
            }
        }

        let mut map = self.series.write().unwrap();
        // Re-check: another writer may have created it while we waited for
        // the write lock.
        let created = !map.contains_key(name);
        let series = map
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(SeriesData::new(self.config)));
        if !series.lock().unwrap().push(Point { timestamp, value }) {
            self.dropped_late_arrivals.fetch_add(1, Ordering::Relaxed);
        }
        created
    }

    /// Count of points dropped for arriving out of order (older than the
    /// series' current newest point at the time they were recorded).
    pub fn dropped_late_arrivals(&self) -> u64 {
        self.dropped_late_arrivals.load(Ordering::Relaxed)
    }

    pub fn latest(&self, name: &str) -> Option<Point> {
        let map = self.series.read().unwrap();
        let series = map.get(name)?;
        series.lock().unwrap().points.back().copied()
    }

    pub fn range(&self, name: &str, from: SystemTime, to: SystemTime) -> Result<Vec<Point>, SeriesError> {
        let map = self.series.read().unwrap();
        let series = map.get(name).ok_or_else(|| SeriesError::NotFound(name.to_string()))?;
        Ok(series.lock().unwrap().in_range(from, to))
    }

    pub fn aggregate(
        &self,
        name: &str,
        from: SystemTime,
        to: SystemTime,
        func: AggregateFn,
    ) -> Result<Option<f64>, SeriesError> {
        let points = self.range(name, from, to)?;
        if points.is_empty() {
            return Ok(None);
        }
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        Ok(Some(apply_aggregate(&values, func)))
    }

    /// Number of distinct series currently tracked.
    pub fn series_count(&self) -> usize {
        self.series.read().unwrap().len()
    }

    pub fn series_names(&self) -> Vec<String> {
        self.series.read().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.series.read().unwrap().contains_key(name)
    }

    /// Removes a series outright. The eviction policy (which series, and
    /// when) belongs to the storage engine that owns `max_metrics`; this
    /// just performs the removal it asks for.
    pub fn evict(&self, name: &str) -> bool {
        self.series.write().unwrap().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.series.write().unwrap().clear();
    }
}

fn apply_aggregate(values: &[f64], func: AggregateFn) -> f64 {
    match func {
        AggregateFn::Sum => values.iter().sum(),
        AggregateFn::Mean => values.iter().sum::<f64>() / values.len() as f64,
        AggregateFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateFn::Count => values.len() as f64,
        AggregateFn::Quantile(p) => quantile_of_sorted_copy(values, p),
    }
}

fn quantile_of_sorted_copy(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p = p.clamp(0.0, 1.0);
    let rank = (sorted.len() - 1) as f64 * p;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + frac * (sorted[upper] - sorted[lower])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn ts(secs_from_epoch: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + StdDuration::from_secs(secs_from_epoch)
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = SeriesConfig { max_points: 0, ..SeriesConfig::default() };
        assert_eq!(TimeSeriesStore::new(config).unwrap_err(), SeriesError::ZeroCapacity);
    }

    #[test]
    fn record_creates_series_on_first_write() {
        let store = TimeSeriesStore::new(SeriesConfig::default()).unwrap();
        assert!(store.record("cpu", 1.0, ts(100)));
        assert!(!store.record("cpu", 2.0, ts(101)));
        assert_eq!(store.series_count(), 1);
    }

    #[test]
    fn latest_returns_most_recent_point() {
        let store = TimeSeriesStore::new(SeriesConfig::default()).unwrap();
        store.record("cpu", 1.0, ts(100));
        store.record("cpu", 2.0, ts(200));
        let latest = store.latest("cpu").unwrap();
        assert_eq!(latest.value, 2.0);
    }

    #[test]
    fn ring_drops_oldest_point_past_capacity() {
        let config = SeriesConfig { max_points: 3, retention_period: Duration::from_secs(1_000_000) };
        let store = TimeSeriesStore::new(config).unwrap();
        for i in 0..5 {
            store.record("cpu", i as f64, ts(100 + i));
        }
        let all = store.range("cpu", ts(0), ts(10_000)).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].value, 2.0);
        assert_eq!(all[2].value, 4.0);
    }

    #[test]
    fn retention_prunes_points_older_than_period() {
        let config = SeriesConfig { max_points: 100, retention_period: Duration::from_secs(10) };
        let store = TimeSeriesStore::new(config).unwrap();
        store.record("cpu", 1.0, ts(0));
        store.record("cpu", 2.0, ts(5));
        store.record("cpu", 3.0, ts(50)); // prunes the two points now older than retention
        let all = store.range("cpu", ts(0), ts(100)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, 3.0);
    }

    #[test]
    fn aggregate_computes_each_function() {
        let store = TimeSeriesStore::new(SeriesConfig::default()).unwrap();
        for (i, v) in [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().enumerate() {
            store.record("latency", v, ts(i as u64));
        }
        let from = ts(0);
        let to = ts(100);
        assert_eq!(store.aggregate("latency", from, to, AggregateFn::Sum).unwrap(), Some(15.0));
        assert_eq!(store.aggregate("latency", from, to, AggregateFn::Mean).unwrap(), Some(3.0));
        assert_eq!(store.aggregate("latency", from, to, AggregateFn::Min).unwrap(), Some(1.0));
        assert_eq!(store.aggregate("latency", from, to, AggregateFn::Max).unwrap(), Some(5.0));
        assert_eq!(store.aggregate("latency", from, to, AggregateFn::Count).unwrap(), Some(5.0));
        let median = store.aggregate("latency", from, to, AggregateFn::Quantile(0.5)).unwrap().unwrap();
        assert!((median - 3.0).abs() < 1e-9);
    }

    #[test]
    fn queries_against_unknown_series_return_not_found() {
        let store = TimeSeriesStore::new(SeriesConfig::default()).unwrap();
        assert_eq!(
            store.range("missing", ts(0), ts(1)).unwrap_err(),
            SeriesError::NotFound("missing".to_string())
        );
    }

    #[test]
    fn late_arrivals_are_dropped_and_counted() {
        let store = TimeSeriesStore::new(SeriesConfig::default()).unwrap();
        store.record("cpu", 1.0, ts(100));
        store.record("cpu", 2.0, ts(200));
        assert_eq!(store.dropped_late_arrivals(), 0);

        // Older than the current newest point: dropped, not stored.
        store.record("cpu", 99.0, ts(150));
        assert_eq!(store.dropped_late_arrivals(), 1);

        let latest = store.latest("cpu").unwrap();
        assert_eq!(latest.value, 2.0);
        let all = store.range("cpu", ts(0), ts(1_000)).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn evict_removes_the_series() {
        let store = TimeSeriesStore::new(SeriesConfig::default()).unwrap();
        store.record("cpu", 1.0, ts(0));
        assert!(store.evict("cpu"));
        assert!(!store.contains("cpu"));
        assert!(!store.evict("cpu"));
    }
}
