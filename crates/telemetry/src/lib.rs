//! Coordinated metrics, health, and distributed-tracing runtime for a host
//! process.
//!
//! Binds four independently-useful crates behind one lifecycle:
//!
//! - [`telemetry_store`] — lock-free ingestion, retention-windowed
//!   time-series storage, and rule-driven aggregation.
//! - [`telemetry_trace`] — span creation, W3C context propagation, and
//!   batched export.
//! - [`telemetry_health`] — a dependency-aware health check graph with a
//!   background scheduler and recovery handlers.
//! - [`telemetry_stats`] / [`telemetry_ring`] — the streaming statistics
//!   and lock-free primitives the above are built from.
//!
//! See [`Monitor`] for the entry point.

pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod monitor;

pub use collector::{Collect, CollectBoxed, FunctionalCollector, MetricSnapshot, MetricValue};
pub use config::MonitoringConfig;
pub use context::{current, enrich, EnrichmentContext, EnrichmentGuard};
pub use error::{ErrorCode, MonitoringError};
pub use monitor::{Monitor, StatusSummary};

pub use telemetry_health::{
    FunctionalProbe, HealthCheckResult, HealthProbe, HealthProbeBoxed, HealthStatus, ProbeType,
};
pub use telemetry_store::{AggregationResult, AggregationRule, EngineStats, Observation, Point};
pub use telemetry_trace::{Span, SpanExporter, SpanExporterBoxed, TraceContext, Tracer};
