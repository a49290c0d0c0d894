//! The closed error-kind set shared across every public operation the
//! facade exposes. Individual crates keep their own narrow `thiserror`
//! enums (`SeriesError`, `SpanError`, `GraphError`, ...); this one is the
//! facade's boundary type, classifying those into the fixed taxonomy a host
//! application branches on.

use std::fmt;

/// Closed set of error kinds. `Unknown` is reserved for the boundary
/// between this crate and truly unclassifiable host errors — the core
/// itself never constructs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    InvalidConfiguration,
    CollectionFailed,
    StorageFull,
    StorageEmpty,
    NetworkError,
    OperationTimeout,
    ResourceExhausted,
    ResourceUnavailable,
    NotFound,
    AlreadyExists,
    DependencyMissing,
    InvalidState,
    ExportFailed,
    ProcessingFailed,
    MemoryAllocationFailed,
    InvalidArgument,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidConfiguration => "invalid_configuration",
            ErrorCode::CollectionFailed => "collection_failed",
            ErrorCode::StorageFull => "storage_full",
            ErrorCode::StorageEmpty => "storage_empty",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::OperationTimeout => "operation_timeout",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::ResourceUnavailable => "resource_unavailable",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::DependencyMissing => "dependency_missing",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::ExportFailed => "export_failed",
            ErrorCode::ProcessingFailed => "processing_failed",
            ErrorCode::MemoryAllocationFailed => "memory_allocation_failed",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A tagged error: a closed [`ErrorCode`], a human-readable message, and
/// optional free-form context (e.g. the metric name or probe name involved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<String>,
}

impl fmt::Display for MonitoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl std::error::Error for MonitoringError {}

impl MonitoringError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl From<telemetry_store::EngineError> for MonitoringError {
    fn from(err: telemetry_store::EngineError) -> Self {
        MonitoringError::new(ErrorCode::InvalidConfiguration, err.to_string())
    }
}

impl From<telemetry_store::SeriesError> for MonitoringError {
    fn from(err: telemetry_store::SeriesError) -> Self {
        let code = match err {
            telemetry_store::SeriesError::ZeroCapacity => ErrorCode::InvalidConfiguration,
            telemetry_store::SeriesError::NotFound(_) => ErrorCode::NotFound,
        };
        MonitoringError::new(code, err.to_string())
    }
}

impl From<telemetry_store::RuleError> for MonitoringError {
    fn from(err: telemetry_store::RuleError) -> Self {
        let code = match err {
            telemetry_store::RuleError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            telemetry_store::RuleError::NotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::InvalidConfiguration,
        };
        MonitoringError::new(code, err.to_string())
    }
}

impl From<telemetry_health::GraphError> for MonitoringError {
    fn from(err: telemetry_health::GraphError) -> Self {
        let code = match err {
            telemetry_health::GraphError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            telemetry_health::GraphError::NotFound(_) => ErrorCode::NotFound,
            telemetry_health::GraphError::WouldCreateCycle { .. } => ErrorCode::InvalidState,
        };
        MonitoringError::new(code, err.to_string())
    }
}

impl From<telemetry_health::MonitorError> for MonitoringError {
    fn from(err: telemetry_health::MonitorError) -> Self {
        match err {
            telemetry_health::MonitorError::Graph(g) => g.into(),
        }
    }
}

impl From<telemetry_trace::TracerError> for MonitoringError {
    fn from(err: telemetry_trace::TracerError) -> Self {
        let code = match err {
            telemetry_trace::TracerError::Span(_) => ErrorCode::AlreadyExists,
            telemetry_trace::TracerError::TraceFull => ErrorCode::ResourceExhausted,
        };
        MonitoringError::new(code, err.to_string())
    }
}
