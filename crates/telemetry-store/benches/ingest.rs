use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::SystemTime;
use telemetry_store::{EngineConfig, Observation, StorageEngine};

fn bench_ingest_and_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_engine");
    for &batch in &[64usize, 1024, 8192] {
        group.bench_with_input(BenchmarkId::new("ingest", batch), &batch, |b, &batch| {
            b.iter(|| {
                let engine = StorageEngine::new(EngineConfig {
                    ring_capacity: batch.next_power_of_two(),
                    max_metrics: 16,
                    ..EngineConfig::default()
                })
                .unwrap();
                let now = SystemTime::now();
                for i in 0..batch {
                    let metric = if i % 2 == 0 { "cpu" } else { "memory" };
                    black_box(engine.ingest(Observation::new(metric, i as f64, now)));
                }
                engine.flush();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ingest_and_flush);
criterion_main!(benches);
