//! Host-registered metric collectors: a small capability trait
//! (`Collect`) plus the snapshot type [`crate::Monitor::collect_now`]
//! assembles from every registered collector and from the storage engine's
//! own latest values.
//!
//! Grounded in the same async-fn-trait-plus-boxed-blanket-impl pattern used
//! by `telemetry_trace::exporter::SpanExporter` / `SpanExporterBoxed` and
//! `telemetry_health::probe::HealthProbe` / `HealthProbeBoxed`, so a host
//! can register either a plain async fn-backed closure or a `dyn`-boxed
//! trait object uniformly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

/// A single named value captured by a collector, with optional tags.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
    pub timestamp: SystemTime,
    pub tags: HashMap<String, String>,
}

impl MetricValue {
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: SystemTime::now(),
            tags: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A point-in-time collection of metric values, identified by the
/// collector (or the facade itself) that produced it.
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    pub source_id: String,
    pub capture_time: Option<SystemTime>,
    pub metrics: Vec<MetricValue>,
}

impl MetricSnapshot {
    #[must_use]
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            capture_time: Some(SystemTime::now()),
            metrics: Vec::new(),
        }
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push(MetricValue::new(name, value));
    }

    #[must_use]
    pub fn get_metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }

    /// Moves every metric out of `other` into `self`, leaving `other` empty.
    pub fn merge(&mut self, other: &mut MetricSnapshot) {
        self.metrics.append(&mut other.metrics);
    }
}

/// A host-registered source of metric values, sampled on every
/// `collect_now` pass.
///
/// Implementors only provide `collect` and `name`; [`CollectBoxed`] is
/// derived automatically via the blanket impl below, for callers that need
/// `Arc<dyn CollectBoxed>`.
pub trait Collect: Send + Sync {
    fn collect(&self) -> impl Future<Output = MetricSnapshot> + Send;
    fn name(&self) -> &str;
}

/// Object-safe counterpart to [`Collect`], used wherever collectors are
/// stored behind `dyn` (the facade's registry).
pub trait CollectBoxed: Send + Sync {
    fn collect_boxed(&self) -> Pin<Box<dyn Future<Output = MetricSnapshot> + Send + '_>>;
    fn name(&self) -> &str;
}

impl<T: Collect> CollectBoxed for T {
    fn collect_boxed(&self) -> Pin<Box<dyn Future<Output = MetricSnapshot> + Send + '_>> {
        Box::pin(self.collect())
    }

    fn name(&self) -> &str {
        Collect::name(self)
    }
}

/// A [`Collect`] implementation backed by a plain closure, for hosts that
/// don't want to define a type just to report a gauge or two.
pub struct FunctionalCollector<F> {
    name: String,
    sampler: F,
}

impl<F, Fut> FunctionalCollector<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = MetricSnapshot> + Send,
{
    pub fn new(name: impl Into<String>, sampler: F) -> Self {
        Self {
            name: name.into(),
            sampler,
        }
    }
}

impl<F, Fut> Collect for FunctionalCollector<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = MetricSnapshot> + Send,
{
    fn collect(&self) -> impl Future<Output = MetricSnapshot> + Send {
        (self.sampler)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get_metric_round_trips() {
        let mut snapshot = MetricSnapshot::new("cpu");
        snapshot.add_metric("cpu.load", 0.42);
        assert_eq!(snapshot.get_metric("cpu.load"), Some(0.42));
        assert_eq!(snapshot.get_metric("missing"), None);
    }

    #[test]
    fn merge_moves_metrics_and_empties_source() {
        let mut a = MetricSnapshot::new("a");
        a.add_metric("a.x", 1.0);
        let mut b = MetricSnapshot::new("b");
        b.add_metric("b.y", 2.0);

        a.merge(&mut b);
        assert_eq!(a.metrics.len(), 2);
        assert!(b.metrics.is_empty());
    }

    #[tokio::test]
    async fn functional_collector_invokes_closure() {
        let collector = FunctionalCollector::new("mem", || async {
            let mut snapshot = MetricSnapshot::new("mem");
            snapshot.add_metric("mem.used", 123.0);
            snapshot
        });
        let snapshot = Collect::collect(&collector).await;
        assert_eq!(snapshot.get_metric("mem.used"), Some(123.0));
        assert_eq!(Collect::name(&collector), "mem");
    }

    #[tokio::test]
    async fn collect_boxed_dispatches_dynamically() {
        let collector: std::sync::Arc<dyn CollectBoxed> =
            std::sync::Arc::new(FunctionalCollector::new("disk", || async {
                MetricSnapshot::new("disk")
            }));
        let snapshot = collector.collect_boxed().await;
        assert_eq!(snapshot.source_id, "disk");
    }
}
