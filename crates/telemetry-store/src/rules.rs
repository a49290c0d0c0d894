//! Rule-driven fan-out of raw observations into per-rule stream aggregators,
//! emitting derived metrics back into the time-series store on an interval
//! or on explicit request.

use crate::engine::StorageEngine;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use telemetry_stats::{AggregatorConfig, StreamAggregator, StreamStatistics};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("source metric name must not be empty")]
    EmptySource,
    #[error("target metric prefix must not be empty")]
    EmptyPrefix,
    #[error("aggregation interval must be positive")]
    NonPositiveInterval,
    #[error("a rule for source metric '{0}' already exists")]
    AlreadyExists(String),
    #[error("no aggregation rule for metric '{0}'")]
    NotFound(String),
}

/// Configuration for a single aggregation rule: which raw metric it
/// consumes, what derived metric names it emits, and on what cadence.
#[derive(Debug, Clone)]
pub struct AggregationRule {
    pub source_metric: String,
    pub target_prefix: String,
    pub interval: Duration,
    pub percentiles: Vec<f64>,
    pub compute_rate: bool,
    pub detect_outliers: bool,
    pub outlier_threshold: f64,
}

impl AggregationRule {
    #[must_use]
    pub fn new(source_metric: impl Into<String>, target_prefix: impl Into<String>) -> Self {
        Self {
            source_metric: source_metric.into(),
            target_prefix: target_prefix.into(),
            interval: Duration::from_secs(60),
            percentiles: vec![0.5, 0.9, 0.95, 0.99],
            compute_rate: false,
            detect_outliers: true,
            outlier_threshold: 3.0,
        }
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.source_metric.is_empty() {
            return Err(RuleError::EmptySource);
        }
        if self.target_prefix.is_empty() {
            return Err(RuleError::EmptyPrefix);
        }
        if self.interval.is_zero() {
            return Err(RuleError::NonPositiveInterval);
        }
        Ok(())
    }
}

/// Result of one aggregation pass over a rule's accumulated observations.
#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub source_metric: String,
    pub samples_processed: u64,
    pub statistics: StreamStatistics,
    pub timestamp: SystemTime,
    pub emitted_to_storage: bool,
}

struct RuleEntry {
    rule: AggregationRule,
    aggregator: StreamAggregator,
    last_aggregation: SystemTime,
}

/// Rule registry fanning observations into per-rule [`StreamAggregator`]s
/// and, on interval boundary or explicit request, emitting derived
/// `<prefix>.mean` / `.min` / `.max` / `.stddev` / `.count` / `.p<NN>`
/// metrics into a [`StorageEngine`].
pub struct AggregationProcessor {
    entries: RwLock<HashMap<String, RuleEntry>>,
}

impl Default for AggregationProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new aggregation rule. Rejects an empty source/prefix, a
    /// non-positive interval, or a duplicate rule for the same source metric.
    pub fn add_rule(&self, rule: AggregationRule) -> Result<(), RuleError> {
        rule.validate()?;

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&rule.source_metric) {
            return Err(RuleError::AlreadyExists(rule.source_metric));
        }

        let aggregator_config = AggregatorConfig {
            enable_outlier_detection: rule.detect_outliers,
            outlier_threshold: rule.outlier_threshold,
            percentiles_to_track: rule.percentiles.clone(),
        };
        // Rule validation above already guarantees non-empty source/prefix;
        // the aggregator config can still fail its own checks (percentile
        // out of range, non-positive threshold) independently.
        let aggregator = StreamAggregator::new(aggregator_config)
            .map_err(|_| RuleError::EmptySource)?;

        entries.insert(
            rule.source_metric.clone(),
            RuleEntry {
                rule,
                aggregator,
                last_aggregation: SystemTime::now(),
            },
        );
        Ok(())
    }

    pub fn remove_rule(&self, source_metric: &str) -> Result<(), RuleError> {
        let mut entries = self.entries.write().unwrap();
        entries
            .remove(source_metric)
            .map(|_| ())
            .ok_or_else(|| RuleError::NotFound(source_metric.to_string()))
    }

    pub fn has_rule(&self, source_metric: &str) -> bool {
        self.entries.read().unwrap().contains_key(source_metric)
    }

    pub fn rule_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn configured_metrics(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    /// Feeds one observation into the matching rule's aggregator, if any.
    /// Observations for metrics with no registered rule are silently
    /// ignored — this is fan-out, not validation.
    pub fn process_observation(&self, metric_name: &str, value: f64) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(metric_name) {
            entry.aggregator.add_observation(value);
        }
    }

    /// Returns the current (not-yet-emitted) statistics for a rule, without
    /// resetting its aggregator.
    pub fn current_statistics(&self, source_metric: &str) -> Result<StreamStatistics, RuleError> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(source_metric)
            .ok_or_else(|| RuleError::NotFound(source_metric.to_string()))?;
        Ok(entry.aggregator.get_statistics())
    }

    /// Emits derived metrics for every rule whose `interval` has elapsed
    /// since its last emission, into `storage`.
    pub fn tick(&self, storage: &StorageEngine, now: SystemTime) -> Vec<AggregationResult> {
        let due: Vec<String> = {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .filter(|(_, entry)| {
                    now.duration_since(entry.last_aggregation)
                        .map(|elapsed| elapsed >= entry.rule.interval)
                        .unwrap_or(false)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        due.into_iter()
            .filter_map(|name| self.force_aggregation(&name, storage).ok())
            .collect()
    }

    /// Immediately computes and emits derived metrics for `source_metric`,
    /// resetting its aggregator, regardless of interval.
    pub fn force_aggregation(
        &self,
        source_metric: &str,
        storage: &StorageEngine,
    ) -> Result<AggregationResult, RuleError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(source_metric)
            .ok_or_else(|| RuleError::NotFound(source_metric.to_string()))?;

        let stats = entry.aggregator.get_statistics();
        let timestamp = SystemTime::now();
        let prefix = &entry.rule.target_prefix;

        emit_derived_metrics(storage, prefix, &stats, timestamp);

        entry.aggregator.reset();
        entry.last_aggregation = timestamp;

        Ok(AggregationResult {
            source_metric: source_metric.to_string(),
            samples_processed: stats.count,
            statistics: stats,
            timestamp,
            emitted_to_storage: true,
        })
    }

}

fn emit_derived_metrics(
    storage: &StorageEngine,
    prefix: &str,
    stats: &StreamStatistics,
    timestamp: SystemTime,
) {
    use crate::engine::Observation;

    let emit = |name: String, value: f64| {
        storage.ingest(Observation::new(name, value, timestamp));
    };

    emit(format!("{prefix}.mean"), stats.mean);
    emit(format!("{prefix}.min"), stats.min);
    emit(format!("{prefix}.max"), stats.max);
    emit(format!("{prefix}.stddev"), stats.std_deviation);
    emit(format!("{prefix}.count"), stats.count as f64);
    for (p, value) in &stats.percentiles {
        emit(format!("{prefix}.p{}", (p.0 * 100.0) as i64), *value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;

    fn processor_with_rule() -> (AggregationProcessor, std::sync::Arc<StorageEngine>) {
        let processor = AggregationProcessor::new();
        let mut rule = AggregationRule::new("response_time", "response_time_agg");
        rule.interval = Duration::from_millis(0).max(Duration::from_nanos(1));
        processor.add_rule(rule).unwrap();
        let storage = StorageEngine::new(EngineConfig {
            ring_capacity: 1024,
            max_metrics: 64,
            ..EngineConfig::default()
        })
        .unwrap();
        (processor, storage)
    }

    #[test]
    fn rejects_invalid_rules() {
        let processor = AggregationProcessor::new();
        assert_eq!(
            processor.add_rule(AggregationRule::new("", "prefix")).unwrap_err(),
            RuleError::EmptySource
        );
        assert_eq!(
            processor
                .add_rule(AggregationRule::new("source", ""))
                .unwrap_err(),
            RuleError::EmptyPrefix
        );
        let mut rule = AggregationRule::new("source", "prefix");
        rule.interval = Duration::ZERO;
        assert_eq!(processor.add_rule(rule).unwrap_err(), RuleError::NonPositiveInterval);
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let processor = AggregationProcessor::new();
        processor
            .add_rule(AggregationRule::new("cpu", "cpu_agg"))
            .unwrap();
        assert_eq!(
            processor
                .add_rule(AggregationRule::new("cpu", "cpu_agg_2"))
                .unwrap_err(),
            RuleError::AlreadyExists("cpu".to_string())
        );
    }

    #[test]
    fn observations_for_unmatched_metric_are_ignored() {
        let (processor, _storage) = processor_with_rule();
        processor.process_observation("unrelated", 42.0);
        let stats = processor.current_statistics("response_time").unwrap();
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn force_aggregation_emits_derived_metrics_and_resets() {
        let (processor, storage) = processor_with_rule();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            processor.process_observation("response_time", v);
        }
        let result = processor.force_aggregation("response_time", &storage).unwrap();
        assert_eq!(result.samples_processed, 5);
        storage.flush();

        assert_eq!(
            storage.store().latest("response_time_agg.mean").unwrap().value,
            30.0
        );
        assert_eq!(
            storage.store().latest("response_time_agg.count").unwrap().value,
            5.0
        );

        let post_reset = processor.current_statistics("response_time").unwrap();
        assert_eq!(post_reset.count, 0);
    }

    #[test]
    fn force_aggregation_on_unknown_rule_returns_not_found() {
        let (processor, storage) = processor_with_rule();
        assert_eq!(
            processor.force_aggregation("missing", &storage).unwrap_err(),
            RuleError::NotFound("missing".to_string())
        );
    }

    #[test]
    fn tick_only_emits_rules_past_their_interval() {
        let processor = AggregationProcessor::new();
        let mut fast = AggregationRule::new("fast", "fast_agg");
        fast.interval = Duration::from_nanos(1);
        let mut slow = AggregationRule::new("slow", "slow_agg");
        slow.interval = Duration::from_secs(3600);
        processor.add_rule(fast).unwrap();
        processor.add_rule(slow).unwrap();

        let storage = StorageEngine::new(EngineConfig {
            ring_capacity: 1024,
            max_metrics: 64,
            ..EngineConfig::default()
        })
        .unwrap();

        processor.process_observation("fast", 1.0);
        processor.process_observation("slow", 1.0);

        std::thread::sleep(Duration::from_millis(5));
        let results = processor.tick(&storage, SystemTime::now());
        let names: Vec<_> = results.iter().map(|r| r.source_metric.clone()).collect();
        assert!(names.contains(&"fast".to_string()));
        assert!(!names.contains(&"slow".to_string()));
    }
}
