//! Span lifecycle: creation, parent/child linkage, W3C trace-context
//! propagation, and the in-process trace registry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// The kind of work a span represents, mirroring the OpenTelemetry
/// `SpanKind` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// Terminal status of a finished span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

/// A typed attribute value, used for both span tags and baggage-free
/// key/value attributes attached to events.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// A timestamped event recorded within a span's lifetime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpanEvent {
    pub name: String,
    #[serde(with = "system_time_nanos")]
    pub timestamp: SystemTime,
    pub attributes: HashMap<String, AttributeValue>,
}

/// Error finishing or operating on a [`Span`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SpanError {
    /// `finish` was called on a span that had already finished.
    #[error("span already finished")]
    AlreadyFinished,
}

/// A single unit of traced work.
///
/// `trace_id` is a 128-bit identifier shared by every span in a trace;
/// `span_id` is a 64-bit identifier unique within that trace. A
/// `parent_span_id` of `0` means "no parent" (a root span).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub trace_id: u128,
    pub span_id: u64,
    pub parent_span_id: u64,
    pub operation_name: String,
    pub service_name: String,
    pub kind: SpanKind,
    #[serde(with = "system_time_nanos")]
    pub start_time: SystemTime,
    #[serde(with = "system_time_nanos_opt")]
    pub end_time: Option<SystemTime>,
    pub status: SpanStatus,
    pub tags: HashMap<String, AttributeValue>,
    pub baggage: HashMap<String, String>,
    pub events: Vec<SpanEvent>,
}

impl Span {
    /// Creates a new, unfinished root or child span starting now.
    ///
    /// `parent_span_id` of `0` marks a root span. Callers that want full
    /// parent/baggage inheritance should prefer [`Tracer::start_child_span`]
    /// or [`Tracer::start_span_from_context`] over constructing directly.
    #[must_use]
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        operation_name: String,
        kind: SpanKind,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            operation_name,
            service_name: String::new(),
            kind,
            start_time: SystemTime::now(),
            end_time: None,
            status: SpanStatus::Unset,
            tags: HashMap::new(),
            baggage: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// True once [`Span::finish`] has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Marks the span as finished at the current time.
    ///
    /// Sets `status` to [`SpanStatus::Ok`] if it is still
    /// [`SpanStatus::Unset`]; callers that observed an error should call
    /// [`Span::set_status`] before finishing.
    ///
    /// # Errors
    ///
    /// Returns [`SpanError::AlreadyFinished`] if called twice.
    pub fn finish(&mut self) -> Result<(), SpanError> {
        if self.is_finished() {
            return Err(SpanError::AlreadyFinished);
        }
        self.end_time = Some(SystemTime::now());
        if self.status == SpanStatus::Unset {
            self.status = SpanStatus::Ok;
        }
        Ok(())
    }

    /// Wall-clock duration of the span. Returns `0` if not yet finished.
    #[must_use]
    pub fn duration_nanos(&self) -> u64 {
        match self.end_time {
            Some(end) => end
                .duration_since(self.start_time)
                .unwrap_or(Duration::ZERO)
                .as_nanos() as u64,
            None => 0,
        }
    }

    /// Sets the span's terminal status.
    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    /// Attaches a tag. Overwrites any existing tag with the same key.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Records a timestamped event on the span.
    pub fn add_event(&mut self, name: impl Into<String>, attributes: HashMap<String, AttributeValue>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp: SystemTime::now(),
            attributes,
        });
    }
}

/// A collection of spans ready for export, typically all belonging to one
/// or more traces flushed together.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SpanBatch {
    pub spans: Vec<Span>,
}

impl SpanBatch {
    #[must_use]
    pub fn new() -> Self {
        Self { spans: Vec::new() }
    }

    #[must_use]
    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }
}

/// A W3C `traceparent` context extracted from or injected into a span,
/// used to propagate trace identity across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    /// `01` = sampled, `00` = not sampled (only bit 0 is defined by W3C).
    pub trace_flags: u8,
    pub baggage: HashMap<String, String>,
}

/// Error parsing a W3C `traceparent` header.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TraceContextError {
    #[error("malformed traceparent: wrong field count")]
    WrongFieldCount,
    #[error("malformed traceparent: unsupported version")]
    UnsupportedVersion,
    #[error("malformed traceparent: trace-id must be 32 hex chars")]
    InvalidTraceId,
    #[error("malformed traceparent: parent-id must be 16 hex chars")]
    InvalidSpanId,
    #[error("malformed traceparent: trace-flags must be 2 hex chars")]
    InvalidFlags,
}

impl TraceContext {
    /// Encodes as a W3C `traceparent` header value:
    /// `00-<trace_id:32hex>-<span_id:16hex>-<flags:2hex>`.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.trace_flags
        )
    }

    /// Parses a W3C `traceparent` header value.
    ///
    /// Parsing is case-insensitive, per the W3C spec's ABNF. Malformed
    /// segment lengths are rejected outright; unsupported versions and
    /// field values the spec reserves are also rejected rather than
    /// silently truncated.
    ///
    /// # Errors
    ///
    /// Returns a [`TraceContextError`] describing the first malformed field.
    pub fn from_traceparent(header: &str) -> Result<Self, TraceContextError> {
        let header = header.to_ascii_lowercase();
        let parts: Vec<&str> = header.split('-').collect();
        if parts.len() != 4 {
            return Err(TraceContextError::WrongFieldCount);
        }
        if parts[0] != "00" {
            return Err(TraceContextError::UnsupportedVersion);
        }
        if parts[1].len() != 32 {
            return Err(TraceContextError::InvalidTraceId);
        }
        if parts[2].len() != 16 {
            return Err(TraceContextError::InvalidSpanId);
        }
        if parts[3].len() != 2 {
            return Err(TraceContextError::InvalidFlags);
        }

        let trace_id = u128::from_str_radix(parts[1], 16).map_err(|_| TraceContextError::InvalidTraceId)?;
        let span_id = u64::from_str_radix(parts[2], 16).map_err(|_| TraceContextError::InvalidSpanId)?;
        let trace_flags = u8::from_str_radix(parts[3], 16).map_err(|_| TraceContextError::InvalidFlags)?;

        Ok(Self {
            trace_id,
            span_id,
            trace_flags,
            baggage: HashMap::new(),
        })
    }
}

mod system_time_nanos {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let nanos = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_nanos() as u64;
        nanos.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
    }
}

mod system_time_nanos_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        let nanos = t.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_nanos() as u64);
        nanos.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        let nanos = Option::<u64>::deserialize(d)?;
        Ok(nanos.map(|n| UNIX_EPOCH + Duration::from_nanos(n)))
    }
}

/// Configuration for a [`Tracer`].
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub default_service_name: String,
    pub max_traces: usize,
    pub max_spans_per_trace: usize,
    pub export_batch_size: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            default_service_name: "telemetry".to_string(),
            max_traces: 10_000,
            max_spans_per_trace: 1_000,
            export_batch_size: 100,
        }
    }
}

/// Error recording a span into the [`Tracer`]'s trace registry.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TracerError {
    #[error(transparent)]
    Span(#[from] SpanError),
    /// The trace already holds `max_spans_per_trace` spans.
    #[error("trace exceeded max_spans_per_trace")]
    TraceFull,
}

fn random_u64() -> u64 {
    use rand::RngCore;
    rand::thread_rng().next_u64()
}

fn generate_trace_id() -> u128 {
    (u128::from(random_u64()) << 64) | u128::from(random_u64())
}

fn generate_span_id() -> u64 {
    random_u64()
}

thread_local! {
    static CURRENT_SPAN: RefCell<Option<Span>> = RefCell::new(None);
}

/// RAII guard installed by [`Tracer::enter`]; restores the previous
/// thread-local current span (if any) when dropped.
pub struct CurrentSpanGuard {
    previous: Option<Span>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for CurrentSpanGuard {
    fn drop(&mut self) {
        CURRENT_SPAN.with(|cell| {
            *cell.borrow_mut() = self.previous.take();
        });
    }
}

/// Returns a clone of the span currently active on this thread, if any.
#[must_use]
pub fn get_current_span() -> Option<Span> {
    CURRENT_SPAN.with(|cell| cell.borrow().clone())
}

/// Installs `span` as the current span for this thread, returning a guard
/// that restores the previous span when dropped.
#[must_use]
pub fn set_current_span(span: Span) -> CurrentSpanGuard {
    let previous = CURRENT_SPAN.with(|cell| cell.replace(Some(span)));
    CurrentSpanGuard {
        previous,
        _not_send: std::marker::PhantomData,
    }
}

/// In-process span registry: creates spans with correct parent/trace
/// linkage, tracks finished spans pending export, and enforces retention
/// bounds on the trace table.
pub struct Tracer {
    config: TracerConfig,
    traces: Mutex<HashMap<u128, Vec<Span>>>,
    trace_order: Mutex<Vec<u128>>,
    finished_spans: Mutex<Vec<Span>>,
}

impl Tracer {
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config,
            traces: Mutex::new(HashMap::new()),
            trace_order: Mutex::new(Vec::new()),
            finished_spans: Mutex::new(Vec::new()),
        }
    }

    /// Starts a new root span.
    #[must_use]
    pub fn start_span(&self, operation_name: impl Into<String>, service_name: Option<String>) -> Span {
        let mut span = Span::new(
            generate_trace_id(),
            generate_span_id(),
            0,
            operation_name.into(),
            SpanKind::Internal,
        );
        span.service_name = service_name.unwrap_or_else(|| self.config.default_service_name.clone());
        span.set_tag("span.kind", "internal");
        span.set_tag("service.name", span.service_name.clone());
        span
    }

    /// Starts a child span inheriting `parent`'s trace, service name, and
    /// baggage.
    #[must_use]
    pub fn start_child_span(&self, parent: &Span, operation_name: impl Into<String>) -> Span {
        let mut span = Span::new(
            parent.trace_id,
            generate_span_id(),
            parent.span_id,
            operation_name.into(),
            SpanKind::Internal,
        );
        span.service_name = parent.service_name.clone();
        span.baggage = parent.baggage.clone();
        span.set_tag("span.kind", "internal");
        span.set_tag("service.name", span.service_name.clone());
        span.set_tag("parent.span.id", parent.span_id as i64);
        span
    }

    /// Starts a server-side span continuing a trace propagated from
    /// another process via [`TraceContext`].
    #[must_use]
    pub fn start_span_from_context(&self, context: &TraceContext, operation_name: impl Into<String>) -> Span {
        let mut span = Span::new(
            context.trace_id,
            generate_span_id(),
            context.span_id,
            operation_name.into(),
            SpanKind::Server,
        );
        span.service_name = self.config.default_service_name.clone();
        span.baggage = context.baggage.clone();
        span.set_tag("span.kind", "server");
        span.set_tag("service.name", span.service_name.clone());
        span.set_tag("parent.span.id", context.span_id as i64);
        span
    }

    /// Extracts a [`TraceContext`] from `span`, for propagation to a
    /// downstream service. Always marks the context as sampled.
    #[must_use]
    pub fn extract_context(&self, span: &Span) -> TraceContext {
        TraceContext {
            trace_id: span.trace_id,
            span_id: span.span_id,
            trace_flags: 0x01,
            baggage: span.baggage.clone(),
        }
    }

    /// Finishes `span` and records it into the trace registry and the
    /// pending-export buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TracerError::Span`] if `span` was already finished, or
    /// [`TracerError::TraceFull`] if its trace already holds
    /// `max_spans_per_trace` spans.
    pub fn finish_span(&self, mut span: Span) -> Result<Span, TracerError> {
        span.finish()?;

        {
            let mut traces = self.traces.lock().expect("traces mutex poisoned");
            let mut order = self.trace_order.lock().expect("trace_order mutex poisoned");
            let entry = traces.entry(span.trace_id).or_insert_with(|| {
                order.push(span.trace_id);
                Vec::new()
            });
            if entry.len() >= self.config.max_spans_per_trace {
                return Err(TracerError::TraceFull);
            }
            entry.push(span.clone());

            if traces.len() > self.config.max_traces {
                if let Some(oldest) = order.first().copied() {
                    order.remove(0);
                    traces.remove(&oldest);
                }
            }
        }

        self.finished_spans
            .lock()
            .expect("finished_spans mutex poisoned")
            .push(span.clone());

        Ok(span)
    }

    /// Returns all spans recorded for `trace_id`, oldest first.
    #[must_use]
    pub fn get_trace(&self, trace_id: u128) -> Option<Vec<Span>> {
        self.traces
            .lock()
            .expect("traces mutex poisoned")
            .get(&trace_id)
            .cloned()
    }

    /// Drains up to `config.export_batch_size` finished spans pending
    /// export. Returns an empty batch if none are pending.
    #[must_use]
    pub fn take_pending_batch(&self) -> SpanBatch {
        let mut pending = self.finished_spans.lock().expect("finished_spans mutex poisoned");
        let take = pending.len().min(self.config.export_batch_size);
        SpanBatch::with_spans(pending.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_span_has_no_parent() {
        let tracer = Tracer::new(TracerConfig::default());
        let span = tracer.start_span("op", None);
        assert_eq!(span.parent_span_id, 0);
        assert!(!span.is_finished());
    }

    #[test]
    fn child_span_inherits_trace_and_baggage() {
        let tracer = Tracer::new(TracerConfig::default());
        let mut parent = tracer.start_span("parent-op", Some("svc".to_string()));
        parent.baggage.insert("tenant".to_string(), "acme".to_string());

        let child = tracer.start_child_span(&parent, "child-op");
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent_span_id, parent.span_id);
        assert_eq!(child.baggage.get("tenant"), Some(&"acme".to_string()));
    }

    #[test]
    fn finish_is_idempotent_check() {
        let mut span = Span::new(1, 2, 0, "op".to_string(), SpanKind::Internal);
        assert!(span.finish().is_ok());
        assert_eq!(span.finish().unwrap_err(), SpanError::AlreadyFinished);
    }

    #[test]
    fn finish_sets_ok_status_when_unset() {
        let mut span = Span::new(1, 2, 0, "op".to_string(), SpanKind::Internal);
        span.finish().unwrap();
        assert_eq!(span.status, SpanStatus::Ok);
    }

    #[test]
    fn finish_span_records_into_trace_registry() {
        let tracer = Tracer::new(TracerConfig::default());
        let span = tracer.start_span("op", None);
        let trace_id = span.trace_id;
        tracer.finish_span(span).unwrap();

        let trace = tracer.get_trace(trace_id).unwrap();
        assert_eq!(trace.len(), 1);
        assert!(trace[0].is_finished());
    }

    #[test]
    fn trace_context_roundtrips_through_traceparent() {
        let ctx = TraceContext {
            trace_id: 0x0123_4567_89ab_cdef_0123_4567_89ab_cdef,
            span_id: 0x0011_2233_4455_6677,
            trace_flags: 0x01,
            baggage: HashMap::new(),
        };
        let header = ctx.to_traceparent();
        let parsed = TraceContext::from_traceparent(&header).unwrap();
        assert_eq!(parsed.trace_id, ctx.trace_id);
        assert_eq!(parsed.span_id, ctx.span_id);
        assert_eq!(parsed.trace_flags, ctx.trace_flags);
    }

    #[test]
    fn traceparent_parse_is_case_insensitive() {
        let header = "00-0123456789ABCDEF0123456789ABCDEF-0011223344556677-01";
        assert!(TraceContext::from_traceparent(header).is_ok());
    }

    #[test]
    fn traceparent_rejects_malformed_lengths() {
        assert_eq!(
            TraceContext::from_traceparent("00-deadbeef-0011223344556677-01").unwrap_err(),
            TraceContextError::InvalidTraceId
        );
        assert_eq!(
            TraceContext::from_traceparent("00-0123456789abcdef0123456789abcdef-dead-01").unwrap_err(),
            TraceContextError::InvalidSpanId
        );
        assert_eq!(
            TraceContext::from_traceparent("not-a-traceparent").unwrap_err(),
            TraceContextError::WrongFieldCount
        );
    }

    #[test]
    fn current_span_guard_restores_previous() {
        assert!(get_current_span().is_none());
        let outer = Span::new(1, 1, 0, "outer".to_string(), SpanKind::Internal);
        let _outer_guard = set_current_span(outer.clone());
        assert_eq!(get_current_span().unwrap().span_id, 1);

        {
            let inner = Span::new(1, 2, 1, "inner".to_string(), SpanKind::Internal);
            let _inner_guard = set_current_span(inner);
            assert_eq!(get_current_span().unwrap().span_id, 2);
        }

        assert_eq!(get_current_span().unwrap().span_id, 1);
    }

    #[test]
    fn trace_table_evicts_oldest_when_over_capacity() {
        let tracer = Tracer::new(TracerConfig {
            max_traces: 2,
            ..TracerConfig::default()
        });
        let mut trace_ids = Vec::new();
        for i in 0..3u128 {
            let mut span = Span::new(i + 1, 1, 0, "op".to_string(), SpanKind::Internal);
            span.trace_id = i + 1;
            trace_ids.push(span.trace_id);
            tracer.finish_span(span).unwrap();
        }
        assert!(tracer.get_trace(trace_ids[0]).is_none());
        assert!(tracer.get_trace(trace_ids[2]).is_some());
    }
}
