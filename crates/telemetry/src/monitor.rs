//! The `Monitor` facade: binds the ingress/storage engine, the rule-driven
//! aggregation processor, the span tracer and its export consumer, and the
//! health dependency graph into one `configure -> start -> (record | query
//! | check)* -> stop` lifecycle.

use crate::collector::{CollectBoxed, MetricSnapshot};
use crate::config::MonitoringConfig;
use crate::context;
use crate::error::{ErrorCode, MonitoringError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use telemetry_health::{HealthCheckResult, HealthMonitor, HealthProbeBoxed, HealthStatus};
use telemetry_store::{
    AggregationProcessor, AggregationResult, AggregationRule, EngineStats, FlusherHandle,
    Observation, StorageEngine,
};
use telemetry_trace::{Span, SpanExporterBoxed, TraceContext, Tracer};

/// Aggregate status reported by [`Monitor::status_summary`].
#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub running: bool,
    pub health: HealthStatus,
    pub tracked_series: usize,
    pub dropped_observations: u64,
    pub registered_collectors: usize,
}

struct Running {
    flusher: FlusherHandle,
    export_consumer: tokio::task::JoinHandle<()>,
    export_shutdown: tokio::sync::watch::Sender<bool>,
}

/// Coordinated metrics, health, and distributed-tracing runtime for a host
/// process.
///
/// Built from one [`MonitoringConfig`] via [`Monitor::new`]; the returned
/// instance is inert until [`Monitor::start`] is called. All public methods
/// are safe to call from multiple threads/tasks concurrently.
pub struct Monitor {
    config: MonitoringConfig,
    storage: Arc<StorageEngine>,
    aggregation: Arc<AggregationProcessor>,
    tracer: Arc<Tracer>,
    health: Arc<HealthMonitor>,
    exporters: RwLock<Vec<Arc<dyn SpanExporterBoxed>>>,
    collectors: RwLock<HashMap<String, Arc<dyn CollectBoxed>>>,
    running: AtomicBool,
    state: Mutex<Option<Running>>,
}

impl Monitor {
    /// Builds a `Monitor` from `config`, failing fast on an invalid
    /// configuration rather than at `start` time.
    pub fn new(config: MonitoringConfig) -> Result<Arc<Self>, MonitoringError> {
        config.validate()?;
        let storage = StorageEngine::new(config.engine_config())?;
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let tracer = Arc::new(Tracer::new(config.tracer.clone()));
        Ok(Arc::new(Self {
            storage,
            aggregation: Arc::new(AggregationProcessor::new()),
            tracer,
            health,
            exporters: RwLock::new(Vec::new()),
            collectors: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            state: Mutex::new(None),
            config,
        }))
    }

    // ---- collector / exporter / health-check registration ----

    pub fn add_collector(&self, collector: Arc<dyn CollectBoxed>) -> Result<(), MonitoringError> {
        let mut collectors = self.collectors.write().unwrap();
        if collectors.contains_key(collector.name()) {
            return Err(MonitoringError::new(
                ErrorCode::AlreadyExists,
                format!("collector '{}' already registered", collector.name()),
            ));
        }
        collectors.insert(collector.name().to_string(), collector);
        Ok(())
    }

    pub fn add_exporter(&self, exporter: Arc<dyn SpanExporterBoxed>) {
        self.exporters.write().unwrap().push(exporter);
    }

    pub fn register_health_check(
        &self,
        name: impl Into<String>,
        probe: Arc<dyn HealthProbeBoxed>,
    ) -> Result<(), MonitoringError> {
        self.health.register_check(name, probe)?;
        Ok(())
    }

    pub fn add_health_dependency(
        &self,
        dependent: &str,
        dependency: &str,
    ) -> Result<(), MonitoringError> {
        self.health.add_dependency(dependent, dependency)?;
        Ok(())
    }

    pub fn add_aggregation_rule(&self, rule: AggregationRule) -> Result<(), MonitoringError> {
        self.aggregation.add_rule(rule)?;
        Ok(())
    }

    // ---- lifecycle ----

    /// Spawns the storage flusher and, if enabled, the health scheduler and
    /// the span export consumer. Idempotent: calling `start` twice is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("monitor starting: spawning flusher, health scheduler, export consumer");

        let flusher = FlusherHandle::spawn_tokio(Arc::clone(&self.storage), self.config.collection_interval);

        if self.config.enable_health_monitoring {
            self.health.start();
        }

        let (export_shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let this = Arc::clone(self);
        let export_consumer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.collection_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.drain_and_export().await;
                    }
                    _ = shutdown_rx.changed() => {
                        this.drain_and_export().await;
                        break;
                    }
                }
            }
        });

        *self.state.lock().unwrap() = Some(Running {
            flusher,
            export_consumer,
            export_shutdown,
        });
    }

    async fn drain_and_export(&self) {
        let batch = self.tracer.take_pending_batch();
        if batch.spans.is_empty() {
            return;
        }
        let exporters: Vec<_> = self.exporters.read().unwrap().clone();
        tracing::debug!(spans = batch.spans.len(), exporters = exporters.len(), "draining pending span batch");
        for exporter in exporters {
            if let Err(err) = exporter.export_boxed(batch.clone()).await {
                tracing::warn!(exporter = exporter.name(), error = %err, "span export failed");
            }
        }
    }

    /// Stops every background task and performs one final drain/flush of
    /// both storage and pending spans. Idempotent: a second call returns
    /// immediately.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("monitor stopping: flushing storage and draining pending spans");

        if self.config.enable_health_monitoring {
            self.health.stop().await;
        }

        let state = self.state.lock().unwrap().take();
        if let Some(state) = state {
            self.storage.shutdown();
            state.flusher.join().await;
            let _ = state.export_shutdown.send(true);
            let _ = state.export_consumer.await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ---- recording ----

    /// Records a single raw observation and fans it out to any aggregation
    /// rule registered for `metric_name`.
    pub fn record_observation(&self, metric_name: &str, value: f64) {
        self.aggregation.process_observation(metric_name, value);
        self.storage
            .ingest(Observation::new(metric_name, value, SystemTime::now()));
    }

    /// Forces emission of derived metrics for every aggregation rule whose
    /// interval has elapsed.
    pub fn tick_aggregation(&self) -> Vec<AggregationResult> {
        self.aggregation.tick(&self.storage, SystemTime::now())
    }

    // ---- spans ----

    #[must_use]
    pub fn start_span(&self, operation_name: impl Into<String>) -> Span {
        self.tracer.start_span(operation_name, None)
    }

    #[must_use]
    pub fn start_child_span(&self, parent: &Span, operation_name: impl Into<String>) -> Span {
        self.tracer.start_child_span(parent, operation_name)
    }

    #[must_use]
    pub fn start_span_from_context(&self, context: &TraceContext, operation_name: impl Into<String>) -> Span {
        self.tracer.start_span_from_context(context, operation_name)
    }

    #[must_use]
    pub fn extract_context(&self, span: &Span) -> TraceContext {
        self.tracer.extract_context(span)
    }

    pub fn finish_span(&self, span: Span) -> Result<Span, MonitoringError> {
        Ok(self.tracer.finish_span(span)?)
    }

    // ---- collection / querying ----

    /// Samples every registered collector concurrently, merges their
    /// snapshots into one, and stamps every metric with the calling
    /// thread's active [`EnrichmentContext`] tags (request/correlation/
    /// trace id, baggage), if any. Also ingests each value into storage so
    /// it participates in retention and aggregation like any other
    /// observation. A collector whose task panics or is cancelled is
    /// skipped; it does not abort the rest of the snapshot.
    pub async fn collect_now(&self) -> MetricSnapshot {
        let collectors: Vec<_> = self.collectors.read().unwrap().values().cloned().collect();

        let mut joins = tokio::task::JoinSet::new();
        for collector in collectors {
            joins.spawn(async move { collector.collect_boxed().await });
        }

        let tags = context::current().map(|ctx| ctx.as_tags()).unwrap_or_default();

        let mut merged = MetricSnapshot::new("monitor");
        while let Some(result) = joins.join_next().await {
            let Ok(mut snapshot) = result else {
                tracing::warn!("collector task panicked or was cancelled, skipping its snapshot");
                continue;
            };
            for metric in &mut snapshot.metrics {
                metric.tags.extend(tags.clone());
                self.storage
                    .ingest(Observation::new(metric.name.clone(), metric.value, metric.timestamp));
            }
            merged.merge(&mut snapshot);
        }
        merged
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    #[must_use]
    pub fn storage_stats(&self) -> &Arc<EngineStats> {
        self.storage.stats()
    }

    #[must_use]
    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    // ---- health ----

    pub async fn check_health(&self) -> HashMap<String, HealthCheckResult> {
        self.health.check_all().await
    }

    pub async fn check_health_for(&self, name: &str) -> Result<HealthCheckResult, MonitoringError> {
        Ok(self.health.check(name).await?)
    }

    #[must_use]
    pub fn overall_health(&self) -> HealthStatus {
        self.health.overall_status()
    }

    #[must_use]
    pub fn failure_impact(&self, name: &str) -> Vec<String> {
        self.health.get_failure_impact(name)
    }

    #[must_use]
    pub fn status_summary(&self) -> StatusSummary {
        StatusSummary {
            running: self.is_running(),
            health: self.overall_health(),
            tracked_series: self.storage.store().series_count(),
            dropped_observations: self.storage.stats().dropped_ingress(),
            registered_collectors: self.collectors.read().unwrap().len(),
        }
    }
}
