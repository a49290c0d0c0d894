//! Wire-format encoders for the supported trace/metric export backends.
//!
//! OTLP uses `prost`-generated types (see `build.rs` / `proto/otlp_trace.proto`)
//! rather than a hand-rolled protobuf encoder. Jaeger, Zipkin, Prometheus and
//! StatsD use their respective text/JSON wire formats directly, matching how
//! those backends are reached in practice (Jaeger/Zipkin over HTTP+JSON,
//! Prometheus via text exposition scraping, StatsD via UDP line protocol).

use crate::span::{AttributeValue, Span, SpanKind, SpanStatus};

/// Generated OTLP protobuf types (see `build.rs`).
pub mod otlp {
    include!(concat!(env!("OUT_DIR"), "/telemetry.otlp.trace.v1.rs"));
}

/// Encodes [`Span`]s into OTLP's protobuf `TracesData` message.
pub struct OtlpEncoder {
    pub resource_attributes: Vec<(String, AttributeValue)>,
}

impl OtlpEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self { resource_attributes: Vec::new() }
    }

    #[must_use]
    pub fn encode(&self, spans: &[Span]) -> otlp::TracesData {
        let resource = otlp::Resource {
            attributes: self
                .resource_attributes
                .iter()
                .map(|(k, v)| key_value(k, v))
                .collect(),
        };

        let otlp_spans = spans.iter().map(encode_span).collect();

        otlp::TracesData {
            resource_spans: vec![otlp::ResourceSpans {
                resource: Some(resource),
                scope_spans: vec![otlp::ScopeSpans {
                    scope: Some(otlp::InstrumentationScope {
                        name: "telemetry-trace".to_string(),
                    }),
                    spans: otlp_spans,
                }],
            }],
        }
    }
}

impl Default for OtlpEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_span(span: &Span) -> otlp::Span {
    let kind = match span.kind {
        SpanKind::Internal => otlp::span::SpanKind::Internal,
        SpanKind::Server => otlp::span::SpanKind::Server,
        SpanKind::Client => otlp::span::SpanKind::Client,
        SpanKind::Producer => otlp::span::SpanKind::Producer,
        SpanKind::Consumer => otlp::span::SpanKind::Consumer,
    };
    let status_code = match span.status {
        SpanStatus::Unset => otlp::span::status::StatusCode::Unset,
        SpanStatus::Ok => otlp::span::status::StatusCode::Ok,
        SpanStatus::Error => otlp::span::status::StatusCode::Error,
    };

    let start_nanos = system_time_nanos(span.start_time);
    let end_nanos = span.end_time.map(system_time_nanos).unwrap_or(start_nanos);

    otlp::Span {
        trace_id: span.trace_id.to_be_bytes().to_vec(),
        span_id: span.span_id.to_be_bytes().to_vec(),
        parent_span_id: span.parent_span_id.to_be_bytes().to_vec(),
        name: span.operation_name.clone(),
        kind: kind as i32,
        start_time_unix_nano: start_nanos,
        end_time_unix_nano: end_nanos,
        attributes: span.tags.iter().map(|(k, v)| key_value(k, v)).collect(),
        events: span
            .events
            .iter()
            .map(|e| otlp::Event {
                time_unix_nano: system_time_nanos(e.timestamp),
                name: e.name.clone(),
                attributes: e.attributes.iter().map(|(k, v)| key_value(k, v)).collect(),
            })
            .collect(),
        status: Some(otlp::span::Status { code: status_code as i32 }),
    }
}

fn system_time_nanos(t: std::time::SystemTime) -> u64 {
    t.duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO)
        .as_nanos() as u64
}

fn key_value(key: &str, value: &AttributeValue) -> otlp::KeyValue {
    let any = match value {
        AttributeValue::String(s) => otlp::any_value::Value::StringValue(s.clone()),
        AttributeValue::Int(i) => otlp::any_value::Value::IntValue(*i),
        AttributeValue::Float(f) => otlp::any_value::Value::DoubleValue(*f),
        AttributeValue::Bool(b) => otlp::any_value::Value::BoolValue(*b),
    };
    otlp::KeyValue {
        key: key.to_string(),
        value: Some(otlp::AnyValue { value: Some(any) }),
    }
}

/// Encodes spans into Jaeger's JSON-over-Thrift span representation
/// (`POST /api/traces` batch body), grouped by trace.
pub struct JaegerEncoder {
    pub service_name: String,
}

impl JaegerEncoder {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    #[must_use]
    pub fn encode(&self, spans: &[Span]) -> serde_json::Value {
        let jaeger_spans: Vec<serde_json::Value> = spans
            .iter()
            .map(|s| {
                serde_json::json!({
                    "traceID": format!("{:032x}", s.trace_id),
                    "spanID": format!("{:016x}", s.span_id),
                    "parentSpanID": if s.parent_span_id == 0 { None } else { Some(format!("{:016x}", s.parent_span_id)) },
                    "operationName": s.operation_name,
                    "startTime": system_time_nanos(s.start_time) / 1000,
                    "duration": s.duration_nanos() / 1000,
                    "tags": tags_as_kv_array(s),
                })
            })
            .collect();

        serde_json::json!({
            "process": { "serviceName": self.service_name },
            "spans": jaeger_spans,
        })
    }
}

fn tags_as_kv_array(span: &Span) -> Vec<serde_json::Value> {
    span.tags
        .iter()
        .map(|(k, v)| match v {
            AttributeValue::String(s) => serde_json::json!({"key": k, "type": "string", "value": s}),
            AttributeValue::Int(i) => serde_json::json!({"key": k, "type": "int64", "value": i}),
            AttributeValue::Float(f) => serde_json::json!({"key": k, "type": "float64", "value": f}),
            AttributeValue::Bool(b) => serde_json::json!({"key": k, "type": "bool", "value": b}),
        })
        .collect()
}

/// Encodes spans into Zipkin's v2 JSON span format.
pub struct ZipkinEncoder {
    pub local_service_name: String,
}

impl ZipkinEncoder {
    #[must_use]
    pub fn new(local_service_name: impl Into<String>) -> Self {
        Self { local_service_name: local_service_name.into() }
    }

    #[must_use]
    pub fn encode(&self, spans: &[Span]) -> serde_json::Value {
        let zipkin_spans: Vec<serde_json::Value> = spans
            .iter()
            .map(|s| {
                let kind = match s.kind {
                    SpanKind::Server => "SERVER",
                    SpanKind::Client => "CLIENT",
                    SpanKind::Producer => "PRODUCER",
                    SpanKind::Consumer => "CONSUMER",
                    SpanKind::Internal => "",
                };
                serde_json::json!({
                    "traceId": format!("{:032x}", s.trace_id),
                    "id": format!("{:016x}", s.span_id),
                    "parentId": if s.parent_span_id == 0 { None } else { Some(format!("{:016x}", s.parent_span_id)) },
                    "name": s.operation_name,
                    "kind": kind,
                    "timestamp": system_time_nanos(s.start_time) / 1000,
                    "duration": s.duration_nanos() / 1000,
                    "localEndpoint": { "serviceName": self.local_service_name },
                    "tags": s.tags.iter().map(|(k, v)| (k.clone(), attribute_as_string(v))).collect::<std::collections::HashMap<_, _>>(),
                })
            })
            .collect();
        serde_json::Value::Array(zipkin_spans)
    }
}

fn attribute_as_string(v: &AttributeValue) -> String {
    match v {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Float(f) => f.to_string(),
        AttributeValue::Bool(b) => b.to_string(),
    }
}

/// Encodes span-derived counters into Prometheus text exposition format.
pub struct PrometheusEncoder {
    pub namespace: String,
}

impl PrometheusEncoder {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into() }
    }

    /// Renders span count and total duration, grouped by operation name, as
    /// `# TYPE`-annotated Prometheus text exposition lines.
    #[must_use]
    pub fn encode(&self, spans: &[Span]) -> String {
        use std::collections::HashMap;
        let mut counts: HashMap<&str, u64> = HashMap::new();
        let mut duration_sum: HashMap<&str, u64> = HashMap::new();
        for span in spans {
            *counts.entry(span.operation_name.as_str()).or_insert(0) += 1;
            *duration_sum.entry(span.operation_name.as_str()).or_insert(0) += span.duration_nanos();
        }

        let mut out = String::new();
        out.push_str(&format!("# TYPE {}_spans_total counter\n", self.namespace));
        for (op, count) in &counts {
            out.push_str(&format!(
                "{}_spans_total{{operation=\"{}\"}} {}\n",
                self.namespace, op, count
            ));
        }
        out.push_str(&format!("# TYPE {}_span_duration_nanos_total counter\n", self.namespace));
        for (op, total) in &duration_sum {
            out.push_str(&format!(
                "{}_span_duration_nanos_total{{operation=\"{}\"}} {}\n",
                self.namespace, op, total
            ));
        }
        out
    }
}

/// Encodes span-derived counters into StatsD line protocol datagrams
/// (one line per metric, suitable for UDP transport).
pub struct StatsdEncoder {
    pub prefix: String,
}

impl StatsdEncoder {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Renders one counter increment and one timer sample per span.
    #[must_use]
    pub fn encode(&self, spans: &[Span]) -> Vec<String> {
        spans
            .iter()
            .flat_map(|span| {
                let op = sanitize(&span.operation_name);
                vec![
                    format!("{}.{}.count:1|c", self.prefix, op),
                    format!(
                        "{}.{}.duration_ms:{}|ms",
                        self.prefix,
                        op,
                        span.duration_nanos() / 1_000_000
                    ),
                ]
            })
            .collect()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span() -> Span {
        let mut span = Span::new(1, 2, 0, "op".to_string(), SpanKind::Server);
        span.set_tag("http.method", "GET");
        span.finish().unwrap();
        span
    }

    #[test]
    fn otlp_encodes_trace_and_span_ids_as_big_endian_bytes() {
        let span = sample_span();
        let encoder = OtlpEncoder::new();
        let encoded = encoder.encode(std::slice::from_ref(&span));
        let otlp_span = &encoded.resource_spans[0].scope_spans[0].spans[0];
        assert_eq!(otlp_span.trace_id, 1u128.to_be_bytes().to_vec());
        assert_eq!(otlp_span.span_id, 2u64.to_be_bytes().to_vec());
        assert_eq!(otlp_span.kind, otlp::span::SpanKind::Server as i32);
    }

    #[test]
    fn jaeger_encodes_trace_id_as_32_hex_chars() {
        let span = sample_span();
        let encoded = JaegerEncoder::new("svc").encode(std::slice::from_ref(&span));
        let trace_id = encoded["spans"][0]["traceID"].as_str().unwrap();
        assert_eq!(trace_id.len(), 32);
    }

    #[test]
    fn zipkin_omits_parent_id_for_root_spans() {
        let span = sample_span();
        let encoded = ZipkinEncoder::new("svc").encode(std::slice::from_ref(&span));
        assert!(encoded[0]["parentId"].is_null());
    }

    #[test]
    fn prometheus_emits_counter_lines_per_operation() {
        let span = sample_span();
        let text = PrometheusEncoder::new("telemetry").encode(std::slice::from_ref(&span));
        assert!(text.contains("telemetry_spans_total{operation=\"op\"} 1"));
    }

    #[test]
    fn statsd_emits_count_and_timer_lines() {
        let span = sample_span();
        let lines = StatsdEncoder::new("telemetry").encode(std::slice::from_ref(&span));
        assert!(lines.iter().any(|l| l.contains("|c")));
        assert!(lines.iter().any(|l| l.contains("|ms")));
    }
}
