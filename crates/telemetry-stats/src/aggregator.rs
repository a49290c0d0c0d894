//! Composes [`OnlineStats`] and a bank of [`QuantileEstimator`]s into a
//! single streaming aggregator, with optional z-score outlier flagging.

use crate::online::{OnlineStats, QuantileEstimator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Outliers are capped at this many entries; once full, the oldest is
/// dropped to make room for the newest (FIFO), matching the reference
/// aggregator this crate is grounded on.
const MAX_OUTLIERS: usize = 100;

/// Z-scores are only evaluated once the stream has enough history for
/// `stddev` to be meaningful.
const OUTLIER_MIN_SAMPLES: u64 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregatorConfigError {
    #[error("percentiles_to_track must all lie in (0.0, 1.0)")]
    PercentileOutOfRange,
    #[error("outlier_threshold must be positive")]
    NonPositiveThreshold,
}

/// Configuration for a [`StreamAggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub enable_outlier_detection: bool,
    pub outlier_threshold: f64,
    pub percentiles_to_track: Vec<f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enable_outlier_detection: true,
            outlier_threshold: 3.0,
            percentiles_to_track: vec![0.5, 0.9, 0.95, 0.99],
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), AggregatorConfigError> {
        if self.percentiles_to_track.iter().any(|p| *p <= 0.0 || *p >= 1.0) {
            return Err(AggregatorConfigError::PercentileOutOfRange);
        }
        if self.outlier_threshold <= 0.0 {
            return Err(AggregatorConfigError::NonPositiveThreshold);
        }
        Ok(())
    }
}

/// A point-in-time snapshot of everything a [`StreamAggregator`] has seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatistics {
    pub count: u64,
    pub mean: f64,
    pub variance: f64,
    pub std_deviation: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub outlier_count: u64,
    pub outliers: Vec<f64>,
    /// Percentile -> estimated value, in ascending percentile order.
    pub percentiles: BTreeMap<OrderedPercentile, f64>,
}

/// Wraps `f64` so it can key a [`BTreeMap`] (percentiles are configuration,
/// never `NaN`, so a total order is safe here).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderedPercentile(pub f64);

impl Eq for OrderedPercentile {}

impl PartialOrd for OrderedPercentile {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedPercentile {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// A streaming aggregator combining running mean/variance/min/max (Welford)
/// with a bank of P² quantile estimators and z-score outlier detection.
pub struct StreamAggregator {
    config: AggregatorConfig,
    stats: OnlineStats,
    quantiles: BTreeMap<OrderedPercentile, QuantileEstimator>,
    outliers: Vec<f64>,
    outlier_count: u64,
}

impl StreamAggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, AggregatorConfigError> {
        config.validate()?;
        let quantiles = config
            .percentiles_to_track
            .iter()
            .map(|&p| (OrderedPercentile(p), QuantileEstimator::new(p)))
            .collect();
        Ok(Self {
            config,
            stats: OnlineStats::new(),
            quantiles,
            outliers: Vec::new(),
            outlier_count: 0,
        })
    }

    pub fn add_observation(&mut self, value: f64) {
        if self.config.enable_outlier_detection && self.stats.count() > OUTLIER_MIN_SAMPLES {
            let stddev = self.stats.stddev();
            let z_score = (value - self.stats.mean()).abs() / (stddev + 1e-10);
            if z_score > self.config.outlier_threshold {
                self.outlier_count += 1;
                self.outliers.push(value);
                if self.outliers.len() > MAX_OUTLIERS {
                    self.outliers.remove(0);
                }
            }
        }

        self.stats.add(value);
        for estimator in self.quantiles.values_mut() {
            estimator.add_observation(value);
        }
    }

    pub fn get_percentile(&self, p: f64) -> Option<f64> {
        self.quantiles.get(&OrderedPercentile(p))?.quantile()
    }

    pub fn get_statistics(&self) -> StreamStatistics {
        let percentiles = self
            .quantiles
            .iter()
            .map(|(p, est)| (*p, est.quantile().unwrap_or(0.0)))
            .collect();

        StreamStatistics {
            count: self.stats.count(),
            mean: self.stats.mean(),
            variance: self.stats.variance(),
            std_deviation: self.stats.stddev(),
            min: self.stats.min(),
            max: self.stats.max(),
            sum: self.stats.sum(),
            outlier_count: self.outlier_count,
            outliers: self.outliers.clone(),
            percentiles,
        }
    }

    pub fn reset(&mut self) {
        self.stats.reset();
        for estimator in self.quantiles.values_mut() {
            estimator.reset();
        }
        self.outliers.clear();
        self.outlier_count = 0;
    }
}

/// Pearson correlation coefficient between two equal-length samples.
///
/// Returns `0.0` if either sample has zero variance or the inputs differ in
/// length (rather than erroring — callers computing cross-metric
/// correlation across a sliding window routinely hit this on startup, before
/// both series have enough history).
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..x.len() {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}
