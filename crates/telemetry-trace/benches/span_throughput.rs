use criterion::{black_box, criterion_group, criterion_main, Criterion};
use telemetry_trace::{Tracer, TracerConfig};

fn bench_root_span(c: &mut Criterion) {
    let tracer = Tracer::new(TracerConfig::default());
    c.bench_function("start_finish_root_span", |b| {
        b.iter(|| {
            let span = tracer.start_span(black_box("handle_request"), None);
            tracer.finish_span(span).unwrap();
        });
    });
}

fn bench_child_span(c: &mut Criterion) {
    let tracer = Tracer::new(TracerConfig::default());
    let root = tracer.start_span("root", None);
    c.bench_function("start_finish_child_span", |b| {
        b.iter(|| {
            let child = tracer.start_child_span(&root, black_box("db_query"));
            tracer.finish_span(child).unwrap();
        });
    });
}

fn bench_context_roundtrip(c: &mut Criterion) {
    let tracer = Tracer::new(TracerConfig::default());
    let span = tracer.start_span("root", None);
    let ctx = tracer.extract_context(&span);
    let header = ctx.to_traceparent();
    c.bench_function("traceparent_roundtrip", |b| {
        b.iter(|| {
            let parsed = telemetry_trace::TraceContext::from_traceparent(black_box(&header)).unwrap();
            black_box(parsed);
        });
    });
}

criterion_group!(benches, bench_root_span, bench_child_span, bench_context_roundtrip);
criterion_main!(benches);
