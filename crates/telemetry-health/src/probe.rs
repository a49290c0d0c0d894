//! Health probe types: status levels, probe results, and the trait a host
//! implements to describe a single check.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

/// Overall health level reported by a probe or the aggregate monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// `true` for [`HealthStatus::Healthy`] or [`HealthStatus::Degraded`] —
    /// the "operational enough to keep serving dependents" predicate used by
    /// [`crate::graph::DependencyGraph::check_with_dependencies`].
    #[must_use]
    pub fn is_operational(self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    #[must_use]
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// What a probe is checking for, mirroring Kubernetes-style probe taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProbeType {
    Liveness,
    Readiness,
    Startup,
}

/// The outcome of running one probe once.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(with = "system_time_secs")]
    pub timestamp: SystemTime,
    pub metadata: HashMap<String, String>,
}

impl HealthCheckResult {
    #[must_use]
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, message)
    }

    #[must_use]
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, message)
    }

    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, message)
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: format!("probe did not complete within {after:?}"),
            duration: after,
            timestamp: SystemTime::now(),
            metadata: HashMap::new(),
        }
    }

    fn with_status(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            duration: Duration::ZERO,
            timestamp: SystemTime::now(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single health probe. Implementations describe how to check one
/// dependency (a database ping, a downstream RPC, a disk-space check).
///
/// Uses native async-fn-in-trait for the static-dispatch path; dynamic
/// dispatch goes through [`HealthProbeBoxed`], implemented for every `T:
/// HealthProbe` via the blanket impl below — callers storing probes in a
/// dependency graph never implement `HealthProbeBoxed` directly.
pub trait HealthProbe: Send + Sync {
    fn check(&self) -> impl Future<Output = HealthCheckResult> + Send;

    fn name(&self) -> &str;

    fn probe_type(&self) -> ProbeType {
        ProbeType::Liveness
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Object-safe counterpart of [`HealthProbe`], used wherever probes are
/// stored behind `Arc<dyn HealthProbeBoxed>` (the dependency graph's nodes).
pub trait HealthProbeBoxed: Send + Sync {
    fn check_boxed(&self) -> Pin<Box<dyn Future<Output = HealthCheckResult> + Send + '_>>;
    fn name(&self) -> &str;
    fn probe_type(&self) -> ProbeType;
    fn timeout(&self) -> Duration;
    fn is_critical(&self) -> bool;
}

impl<T: HealthProbe> HealthProbeBoxed for T {
    fn check_boxed(&self) -> Pin<Box<dyn Future<Output = HealthCheckResult> + Send + '_>> {
        Box::pin(self.check())
    }

    fn name(&self) -> &str {
        HealthProbe::name(self)
    }

    fn probe_type(&self) -> ProbeType {
        HealthProbe::probe_type(self)
    }

    fn timeout(&self) -> Duration {
        HealthProbe::timeout(self)
    }

    fn is_critical(&self) -> bool {
        HealthProbe::is_critical(self)
    }
}

/// A probe built from a plain closure, for the common case where a check is
/// just "run this function and map its result" with no state of its own.
pub struct FunctionalProbe<F> {
    name: String,
    probe_type: ProbeType,
    timeout: Duration,
    critical: bool,
    check_fn: F,
}

impl<F, Fut> FunctionalProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HealthCheckResult> + Send,
{
    pub fn new(name: impl Into<String>, probe_type: ProbeType, check_fn: F) -> Self {
        Self {
            name: name.into(),
            probe_type,
            timeout: Duration::from_secs(5),
            critical: true,
            check_fn,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

impl<F, Fut> HealthProbe for FunctionalProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HealthCheckResult> + Send,
{
    fn check(&self) -> impl Future<Output = HealthCheckResult> + Send {
        (self.check_fn)()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn probe_type(&self) -> ProbeType {
        self.probe_type
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

mod system_time_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        s.serialize_f64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn functional_probe_reports_its_check_fn_result() {
        let probe = FunctionalProbe::new("disk", ProbeType::Readiness, || async {
            HealthCheckResult::healthy("disk space ok")
        });
        let result = probe.check().await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(probe.probe_type(), ProbeType::Readiness);
    }

    #[test]
    fn operational_predicate_covers_healthy_and_degraded_only() {
        assert!(HealthStatus::Healthy.is_operational());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert!(!HealthStatus::Unknown.is_operational());
    }
}
