//! Top-level facade configuration, plus the per-subsystem configs it hands
//! down when wiring storage, aggregation, tracing, and health monitoring
//! together.

use crate::error::{ErrorCode, MonitoringError};
use std::time::Duration;
use telemetry_health::HealthMonitorConfig;
use telemetry_store::{EngineConfig, SeriesConfig};
use telemetry_trace::TracerConfig;

/// Configuration for the [`crate::Monitor`] facade.
///
/// Mirrors the validation rules a host-facing monitoring core applies
/// before it will start: a non-zero history size, a floor on the
/// collection interval so a misconfigured caller can't busy-loop the
/// collector, and a buffer at least as large as the history it is meant to
/// back.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Number of points retained per metric series.
    pub history_size: usize,
    /// How often the facade's periodic collection pass runs.
    pub collection_interval: Duration,
    /// Capacity of the ingress ring feeding the storage engine.
    pub buffer_size: usize,
    /// Upper bound on distinct metric series the storage engine will track.
    pub max_collectors: usize,
    pub health: HealthMonitorConfig,
    pub tracer: TracerConfig,
    /// Whether `start` spawns the health monitor's background scheduler.
    pub enable_health_monitoring: bool,
    /// Whether `start` spawns the span export consumer loop.
    pub enable_tracing: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            history_size: 3_600,
            collection_interval: Duration::from_secs(1),
            buffer_size: 8_192,
            max_collectors: 10_000,
            health: HealthMonitorConfig::default(),
            tracer: TracerConfig::default(),
            enable_health_monitoring: true,
            enable_tracing: true,
        }
    }
}

impl MonitoringConfig {
    /// Validates cross-field invariants before a [`crate::Monitor`] is built.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidConfiguration`] if `history_size` is
    /// zero, `collection_interval` is below 10ms, or `buffer_size` is
    /// smaller than `history_size`.
    pub fn validate(&self) -> Result<(), MonitoringError> {
        if self.history_size == 0 {
            return Err(MonitoringError::new(
                ErrorCode::InvalidConfiguration,
                "history_size must be non-zero",
            ));
        }
        if self.collection_interval < Duration::from_millis(10) {
            return Err(MonitoringError::new(
                ErrorCode::InvalidConfiguration,
                "collection_interval must be at least 10ms",
            ));
        }
        if self.buffer_size < self.history_size {
            return Err(MonitoringError::new(
                ErrorCode::InvalidConfiguration,
                "buffer_size must be at least history_size",
            ));
        }
        Ok(())
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ring_capacity: self.buffer_size.next_power_of_two(),
            max_metrics: self.max_collectors,
            flush_interval: self.collection_interval,
            series: SeriesConfig {
                max_points: self.history_size,
                ..SeriesConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        MonitoringConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_history_size() {
        let config = MonitoringConfig {
            history_size: 0,
            ..MonitoringConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().code,
            ErrorCode::InvalidConfiguration
        );
    }

    #[test]
    fn rejects_sub_floor_collection_interval() {
        let config = MonitoringConfig {
            collection_interval: Duration::from_millis(1),
            ..MonitoringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_buffer_smaller_than_history() {
        let config = MonitoringConfig {
            history_size: 1_000,
            buffer_size: 100,
            ..MonitoringConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
