//! Statistical primitives for the telemetry pipeline: vectorised slice
//! reductions, streaming mean/variance/quantile estimators, and a composed
//! stream aggregator with outlier detection.

pub mod aggregator;
pub mod online;
pub mod simd;

pub use aggregator::{
    pearson_correlation, AggregatorConfig, AggregatorConfigError, OrderedPercentile,
    StreamAggregator, StreamStatistics,
};
pub use online::{OnlineStats, QuantileEstimator};
pub use simd::{Backend, ReducerStats, SimdConfig, SimdError, SimdReducer, Summary};
