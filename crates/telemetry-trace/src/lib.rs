//! Distributed tracing span runtime and export pipeline.
//!
//! A high-performance distributed tracing span collector that combines
//! `telemetry-ring`'s lock-free MPSC channels with async Rust. Enables
//! instrumented services to submit spans with <100ns latency while batching
//! exports to tracing backends.
//!
//! # Native async traits
//!
//! This crate uses native async fn in traits (no `#[async_trait]` macro),
//! paired with a parallel object-safe `*Boxed` trait for dynamic dispatch.

pub mod async_bridge;
pub mod batch_processor;
pub mod collector;
pub mod exporter;
pub mod rate_limiter;
pub mod resilient_exporter;
pub mod span;
pub mod wire;

// Re-export main types
pub use async_bridge::{AsyncCollectorConfig, AsyncSpanCollector, AsyncSpanProducer, ExportMetrics};
pub use batch_processor::{BatchConfig, BatchMetrics, BatchProcessor};
pub use collector::{CollectorConfig, CollectorMetrics, RegistrationError, SpanCollector, SpanProducer, SubmitError};
pub use exporter::{ExportError, JsonFileExporter, NullExporter, SpanExporter, SpanExporterBoxed, StdoutExporter};
pub use rate_limiter::{IntervalRateLimiter, RateLimiter, RateLimiterBoxed};
pub use resilient_exporter::{
    CircuitBreakerConfig, CircuitBreakerExporter, CircuitState, RateLimitedExporter,
    ResilientExporterBuilder, RetryConfig, RetryingExporter,
};
pub use span::{
    AttributeValue, CurrentSpanGuard, Span, SpanBatch, SpanError, SpanEvent, SpanKind, SpanStatus,
    TraceContext, TraceContextError, Tracer, TracerConfig, TracerError,
};
pub use wire::{JaegerEncoder, OtlpEncoder, PrometheusEncoder, StatsdEncoder, ZipkinEncoder};
