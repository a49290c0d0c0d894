//! Health-dependency graph: a DAG of named probes with cycle rejection,
//! topological evaluation order, dependency-aware checks, blast-radius
//! queries, and a scheduler/recovery controller.

pub mod graph;
pub mod monitor;
pub mod probe;

pub use graph::{DependencyGraph, GraphError};
pub use monitor::{HealthMonitor, HealthMonitorConfig, HealthStats, MonitorError};
pub use probe::{
    FunctionalProbe, HealthCheckResult, HealthProbe, HealthProbeBoxed, HealthStatus, ProbeType,
};
