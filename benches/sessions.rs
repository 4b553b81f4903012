use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use sessionflow::operator::{SessionWindow, Timestamp};
use sessionflow::prelude::*;

const KEYS: u64 = 1000;

/// Events with increasing timestamps, with some disorder.
fn events(n: u64) -> Vec<(u64, Timestamp)> {
    let mut rng = SmallRng::seed_from_u64(0xdead);
    let mut ts = 0;
    (0..n)
        .map(|_| {
            ts += rng.random_range(0..5);
            (rng.random_range(0..KEYS), ts - rng.random_range(0..50))
        })
        .collect()
}

fn manager(c: &mut Criterion) {
    let mut g = c.benchmark_group("manager");
    for n in [10_000u64, 100_000] {
        let input = events(n);
        g.throughput(Throughput::Elements(n));
        g.bench_with_input(BenchmarkId::new("add-advance", n), &input, |b, input| {
            b.iter(|| {
                let mut manager = SessionWindow::new(100).build(Count::<(u64, Timestamp)>::new());
                let mut out = Vec::new();
                for (i, &(key, ts)) in input.iter().enumerate() {
                    if manager.is_late(ts) {
                        continue;
                    }
                    manager.add(key, &(key, ts), ts, &mut out).unwrap();
                    if i % 64 == 0 {
                        manager.advance(ts - 50, &mut out);
                    }
                }
                manager.flush(&mut out);
                black_box(out.len())
            })
        });
    }
    g.finish();
}

fn pipeline(c: &mut Criterion) {
    let mut g = c.benchmark_group("pipeline");
    g.sample_size(20);
    let n = 100_000u64;
    let input = events(n);
    g.throughput(Throughput::Elements(n));
    for partitions in [1, 2, 4] {
        g.bench_with_input(
            BenchmarkId::new("partitions", partitions),
            &input,
            |b, input| {
                b.iter(|| {
                    let config = SessionConfig::new(100, 50, 10, Duration::from_secs(60))
                        .partitions(partitions);
                    let env = StreamEnvironment::new(config);
                    let mut job = env
                        .session_windows(
                            |e: &(u64, Timestamp)| e.0,
                            |e: &(u64, Timestamp)| Some(e.1),
                            Count::new(),
                        )
                        .unwrap();
                    let results = job.results();
                    let source = job.sources().pop().unwrap();
                    for &event in input {
                        source.send(event).unwrap();
                    }
                    drop(source);
                    black_box(job.join().unwrap());
                    black_box(results.try_iter().count())
                })
            },
        );
    }
    g.finish();
}

criterion_group!(benches, manager, pipeline);
criterion_main!(benches);
