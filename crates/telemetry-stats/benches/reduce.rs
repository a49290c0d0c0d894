use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use telemetry_stats::{AggregatorConfig, SimdConfig, SimdReducer, StreamAggregator};

fn bench_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("simd_sum");
    for &size in &[64usize, 1024, 65536] {
        let data: Vec<f64> = (0..size).map(|i| i as f64).collect();
        let simd = SimdReducer::new(SimdConfig { enable_simd: true, vector_width: 4 });
        let scalar = SimdReducer::new(SimdConfig { enable_simd: false, vector_width: 4 });

        group.bench_with_input(BenchmarkId::new("vectorized", size), &data, |b, data| {
            b.iter(|| simd.sum(black_box(data)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("scalar", size), &data, |b, data| {
            b.iter(|| scalar.sum(black_box(data)).unwrap());
        });
    }
    group.finish();
}

fn bench_stream_aggregator(c: &mut Criterion) {
    c.bench_function("stream_aggregator_add_observation", |b| {
        let mut agg = StreamAggregator::new(AggregatorConfig::default()).unwrap();
        let mut i = 0.0;
        b.iter(|| {
            agg.add_observation(black_box(i));
            i += 1.0;
        });
    });
}

criterion_group!(benches, bench_sum, bench_stream_aggregator);
criterion_main!(benches);
