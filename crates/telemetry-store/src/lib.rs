//! Time-series storage: an ingress ring feeding a per-metric ring-buffered
//! store, plus a rule-driven aggregation processor that derives summary
//! metrics from raw observation streams.

pub mod engine;
pub mod rules;
pub mod series;

pub use engine::{EngineConfig, EngineError, EngineStats, FlusherHandle, Observation, StorageEngine};
pub use rules::{AggregationProcessor, AggregationResult, AggregationRule, RuleError};
pub use series::{AggregateFn, Point, SeriesConfig, SeriesError, TimeSeriesStore};
