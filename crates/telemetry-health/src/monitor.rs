//! Health monitor controller: binds a [`DependencyGraph`] to a background
//! scheduler that re-evaluates probes in topological order, caches results
//! for `cache_duration`, and drives bounded-attempt recovery handlers.

use crate::graph::{DependencyGraph, GraphError};
use crate::probe::{HealthCheckResult, HealthProbeBoxed, HealthStatus};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Configuration for a [`HealthMonitor`].
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub cache_duration: Duration,
    pub max_parallel_checks: usize,
    pub enable_auto_recovery: bool,
    pub max_recovery_attempts: u32,
    pub recovery_delay: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            cache_duration: Duration::from_secs(10),
            max_parallel_checks: 10,
            enable_auto_recovery: false,
            max_recovery_attempts: 3,
            recovery_delay: Duration::from_secs(60),
        }
    }
}

/// Counters tracking monitor-wide check and recovery activity.
#[derive(Debug, Default)]
pub struct HealthStats {
    pub total_checks: AtomicU64,
    pub healthy_checks: AtomicU64,
    pub degraded_checks: AtomicU64,
    pub unhealthy_checks: AtomicU64,
    pub timeout_count: AtomicU64,
    pub recovery_attempts: AtomicU64,
    pub successful_recoveries: AtomicU64,
}

impl HealthStats {
    fn record(&self, result: &HealthCheckResult) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        match result.status {
            HealthStatus::Healthy => self.healthy_checks.fetch_add(1, Ordering::Relaxed),
            HealthStatus::Degraded => self.degraded_checks.fetch_add(1, Ordering::Relaxed),
            HealthStatus::Unhealthy => self.unhealthy_checks.fetch_add(1, Ordering::Relaxed),
            HealthStatus::Unknown => 0,
        };
        if result.message.contains("did not complete") {
            self.timeout_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

type RecoveryHandler = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Binds a [`DependencyGraph`] to a background scheduler, a result cache
/// keyed by `cache_duration`, and optional recovery handlers.
pub struct HealthMonitor {
    graph: Arc<DependencyGraph>,
    config: HealthMonitorConfig,
    stats: Arc<HealthStats>,
    recovery_handlers: Mutex<HashMap<String, RecoveryHandler>>,
    recovery_attempts: Mutex<HashMap<String, u32>>,
    running: Arc<AtomicBool>,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            graph: Arc::new(DependencyGraph::new()),
            config,
            stats: Arc::new(HealthStats::default()),
            recovery_handlers: Mutex::new(HashMap::new()),
            recovery_attempts: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            scheduler: Mutex::new(None),
        }
    }

    pub fn register_check(
        &self,
        name: impl Into<String>,
        probe: Arc<dyn HealthProbeBoxed>,
    ) -> Result<(), MonitorError> {
        self.graph.add_node(name, probe)?;
        Ok(())
    }

    pub fn unregister_check(&self, name: &str) -> Result<(), MonitorError> {
        self.graph.remove_node(name)?;
        Ok(())
    }

    pub fn add_dependency(&self, dependent: &str, dependency: &str) -> Result<(), MonitorError> {
        self.graph.add_dependency(dependent, dependency)?;
        Ok(())
    }

    pub fn register_recovery_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.recovery_handlers
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(move || Box::pin(handler())));
    }

    /// Starts the background scheduler. Idempotent: calling `start` on an
    /// already-running monitor is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.check_interval);
            while this.running.load(Ordering::Acquire) {
                ticker.tick().await;
                if !this.running.load(Ordering::Acquire) {
                    break;
                }
                this.run_scheduled_pass().await;
            }
        });
        *self.scheduler.lock().unwrap() = Some(handle);
    }

    /// Stops the scheduler and joins it. Idempotent: a second `stop` call
    /// returns immediately.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let handle = self.scheduler.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs every probe once in topological order, honouring
    /// `cache_duration`, and schedules recovery for anything non-operational.
    async fn run_scheduled_pass(&self) {
        for name in self.graph.topological_sort() {
            if self.cached_result_is_fresh(&name) {
                continue;
            }
            let Ok(result) = self.graph.check_with_dependencies(&name).await else {
                continue;
            };
            self.stats.record(&result);
            if !result.status.is_operational() {
                tracing::warn!(probe = %name, status = ?result.status, "probe non-operational");
                self.maybe_recover(&name).await;
            } else {
                self.recovery_attempts.lock().unwrap().remove(&name);
            }
        }
    }

    fn cached_result_is_fresh(&self, name: &str) -> bool {
        match self.graph.last_check_time(name) {
            Ok(Some(last)) => SystemTime::now()
                .duration_since(last)
                .map(|elapsed| elapsed < self.config.cache_duration)
                .unwrap_or(false),
            _ => false,
        }
    }

    async fn maybe_recover(&self, name: &str) {
        if !self.config.enable_auto_recovery {
            return;
        }
        let handler = self.recovery_handlers.lock().unwrap().get(name).cloned();
        let Some(handler) = handler else { return };

        let attempts = {
            let mut attempts = self.recovery_attempts.lock().unwrap();
            let counter = attempts.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        if attempts > self.config.max_recovery_attempts {
            tracing::warn!(probe = %name, attempts, max = self.config.max_recovery_attempts, "recovery attempts exhausted");
            return;
        }

        tracing::debug!(probe = %name, attempt = attempts, "scheduling recovery handler");
        tokio::time::sleep(self.config.recovery_delay).await;
        self.stats.recovery_attempts.fetch_add(1, Ordering::Relaxed);
        if handler().await {
            tracing::debug!(probe = %name, "recovery handler succeeded");
            self.stats.successful_recoveries.fetch_add(1, Ordering::Relaxed);
            self.recovery_attempts.lock().unwrap().remove(name);
        } else {
            tracing::warn!(probe = %name, "recovery handler failed");
        }
    }

    /// Forces an immediate, dependency-aware re-check of one probe,
    /// ignoring the result cache.
    pub async fn check(&self, name: &str) -> Result<HealthCheckResult, MonitorError> {
        let result = self.graph.check_with_dependencies(name).await?;
        self.stats.record(&result);
        Ok(result)
    }

    /// Forces an immediate re-check of every probe in topological order,
    /// ignoring the result cache.
    pub async fn check_all(&self) -> HashMap<String, HealthCheckResult> {
        let mut out = HashMap::new();
        for name in self.graph.topological_sort() {
            if let Ok(result) = self.graph.check_with_dependencies(&name).await {
                self.stats.record(&result);
                out.insert(name, result);
            }
        }
        out
    }

    /// `refresh` is `check_all` under another name: force every probe to
    /// re-run right now, bypassing the cache, without touching the
    /// scheduler's running state.
    pub async fn refresh(&self) -> HashMap<String, HealthCheckResult> {
        self.check_all().await
    }

    /// Aggregate status: healthy if every probe is healthy; degraded if any
    /// is degraded but none unhealthy; unhealthy if any *critical* probe is
    /// unhealthy (a non-critical unhealthy probe only degrades).
    pub fn overall_status(&self) -> HealthStatus {
        let names = self.graph.node_names();
        if names.is_empty() {
            return HealthStatus::Unknown;
        }

        let mut any_degraded = false;
        for name in &names {
            let Ok(Some(result)) = self.graph.last_result(name) else {
                return HealthStatus::Unknown;
            };
            match result.status {
                HealthStatus::Unhealthy => {
                    if self.graph.is_critical(name).unwrap_or(true) {
                        return HealthStatus::Unhealthy;
                    }
                    any_degraded = true;
                }
                HealthStatus::Degraded => any_degraded = true,
                HealthStatus::Unknown => return HealthStatus::Unknown,
                HealthStatus::Healthy => {}
            }
        }

        if any_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<HealthStats> {
        &self.stats
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn get_failure_impact(&self, name: &str) -> Vec<String> {
        self.graph.get_failure_impact(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FunctionalProbe, ProbeType};
    use std::sync::atomic::AtomicU32;

    fn probe_returning(name: &str, status: HealthStatus) -> Arc<dyn HealthProbeBoxed> {
        let name_owned = name.to_string();
        Arc::new(FunctionalProbe::new(name_owned, ProbeType::Readiness, move || {
            let status = status;
            async move {
                match status {
                    HealthStatus::Healthy => HealthCheckResult::healthy("ok"),
                    HealthStatus::Degraded => HealthCheckResult::degraded("meh"),
                    _ => HealthCheckResult::unhealthy("bad"),
                }
            }
        }))
    }

    #[tokio::test]
    async fn overall_status_is_healthy_when_everything_passes() {
        let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig::default()));
        monitor
            .register_check("db", probe_returning("db", HealthStatus::Healthy))
            .unwrap();
        monitor.check_all().await;
        assert_eq!(monitor.overall_status(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn overall_status_is_unhealthy_when_a_critical_probe_fails() {
        let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig::default()));
        monitor
            .register_check("db", probe_returning("db", HealthStatus::Unhealthy))
            .unwrap();
        monitor.check_all().await;
        assert_eq!(monitor.overall_status(), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn overall_status_is_degraded_without_any_unhealthy() {
        let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig::default()));
        monitor
            .register_check("cache", probe_returning("cache", HealthStatus::Degraded))
            .unwrap();
        monitor.check_all().await;
        assert_eq!(monitor.overall_status(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig {
            check_interval: Duration::from_millis(5),
            ..HealthMonitorConfig::default()
        }));
        monitor.start();
        monitor.stop().await;
        monitor.stop().await;
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn recovery_handler_runs_after_failure_and_resets_on_success() {
        let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig {
            enable_auto_recovery: true,
            recovery_delay: Duration::from_millis(1),
            max_recovery_attempts: 3,
            ..HealthMonitorConfig::default()
        }));
        monitor
            .register_check("db", probe_returning("db", HealthStatus::Unhealthy))
            .unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);
        monitor.register_recovery_handler("db", move || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::Relaxed);
                true
            }
        });

        monitor.run_scheduled_pass().await;
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(monitor.stats().successful_recoveries.load(Ordering::Relaxed), 1);
    }
}
