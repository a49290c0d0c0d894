use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use telemetry_ring::{Channel, Config, MpmcConfig, Queue};

const MSG_PER_PRODUCER: u64 = 1_000_000;
const BATCH_SIZE: usize = 4096;

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    group.bench_function("single_producer_consumer", |b| {
        b.iter(|| {
            let config = Config::default();
            let channel = Arc::new(Channel::<u32>::new(config));
            let producer = channel.register().unwrap();

            let ch = Arc::clone(&channel);
            let producer_handle = thread::spawn(move || {
                let mut sent = 0u64;
                while sent < MSG_PER_PRODUCER {
                    let want = BATCH_SIZE.min((MSG_PER_PRODUCER - sent) as usize);
                    if let Some(mut r) = producer.reserve(want) {
                        let len = {
                            let slice = r.as_mut_slice();
                            for (i, item) in slice.iter_mut().enumerate() {
                                item.write((sent + i as u64) as u32);
                            }
                            slice.len()
                        };
                        r.commit();
                        sent += len as u64;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut count = 0u64;
            while count < MSG_PER_PRODUCER {
                count += ch.consume_all(|item| {
                    black_box(item);
                }) as u64;
                if count < MSG_PER_PRODUCER {
                    std::hint::spin_loop();
                }
            }

            producer_handle.join().unwrap();
        });
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");

    for num_producers in [2, 4, 8].iter() {
        let total_msgs = MSG_PER_PRODUCER * (*num_producers as u64);
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{num_producers}P_1C")),
            num_producers,
            |b, &n| {
                b.iter(|| {
                    let config = Config::new(1024, n.max(16), false);
                    let channel = Arc::new(Channel::<u32>::new(config));

                    let mut producer_handles = vec![];
                    for _ in 0..n {
                        let ch = Arc::clone(&channel);
                        let handle = thread::spawn(move || {
                            let producer = ch.register().unwrap();
                            let mut sent = 0u64;
                            while sent < MSG_PER_PRODUCER {
                                let want = BATCH_SIZE.min((MSG_PER_PRODUCER - sent) as usize);
                                if let Some(mut r) = producer.reserve(want) {
                                    let len = {
                                        let slice = r.as_mut_slice();
                                        for (i, item) in slice.iter_mut().enumerate() {
                                            item.write((sent + i as u64) as u32);
                                        }
                                        slice.len()
                                    };
                                    r.commit();
                                    sent += len as u64;
                                } else {
                                    std::hint::spin_loop();
                                }
                            }
                        });
                        producer_handles.push(handle);
                    }

                    let ch = Arc::clone(&channel);
                    let consumer_handle = thread::spawn(move || {
                        let mut count = 0u64;
                        let target = MSG_PER_PRODUCER * (n as u64);
                        while count < target {
                            count += ch.consume_all(|item| {
                                black_box(item);
                            }) as u64;
                            if count < target {
                                std::hint::spin_loop();
                            }
                        }
                        count
                    });

                    for handle in producer_handles {
                        handle.join().unwrap();
                    }
                    let count = consumer_handle.join().unwrap();
                    assert_eq!(count, MSG_PER_PRODUCER * (n as u64));
                });
            },
        );
    }

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc");

    for num_threads in [2, 4, 8].iter() {
        let total_msgs = MSG_PER_PRODUCER;
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{num_threads}P_{num_threads}C")),
            num_threads,
            |b, &n| {
                b.iter(|| {
                    let queue = Arc::new(Queue::<u32>::new(MpmcConfig { capacity: 4096 }).unwrap());
                    let per_producer = MSG_PER_PRODUCER / n as u64;

                    let producers: Vec<_> = (0..n)
                        .map(|_| {
                            let q = Arc::clone(&queue);
                            thread::spawn(move || {
                                for i in 0..per_producer {
                                    while q.push(i as u32).is_err() {
                                        std::hint::spin_loop();
                                    }
                                }
                            })
                        })
                        .collect();

                    let consumed = Arc::new(std::sync::atomic::AtomicU64::new(0));
                    let target = per_producer * n as u64;
                    let consumers: Vec<_> = (0..n)
                        .map(|_| {
                            let q = Arc::clone(&queue);
                            let consumed = Arc::clone(&consumed);
                            thread::spawn(move || {
                                while consumed.load(Ordering::Relaxed) < target {
                                    if let Ok(v) = q.pop() {
                                        black_box(v);
                                        consumed.fetch_add(1, Ordering::Relaxed);
                                    } else {
                                        std::hint::spin_loop();
                                    }
                                }
                            })
                        })
                        .collect();

                    for p in producers {
                        p.join().unwrap();
                    }
                    for cns in consumers {
                        cns.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpsc, bench_mpmc);
criterion_main!(benches);
