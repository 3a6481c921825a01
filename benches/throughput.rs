//! Throughput Benchmark for FlashMap
//!
//! This benchmark measures the performance of the sharded map under various
//! workloads, and the cost of a sweep with and without concurrent writers.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use flashmap::storage::{ManualClock, Partition};
use flashmap::{MapConfig, ShardRouter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A router without the background sweeper, so no runtime is needed.
fn router<V: Send + Sync + 'static>() -> ShardRouter<V> {
    ShardRouter::builder()
        .config(MapConfig::default())
        .background_sweep(false)
        .build()
        .unwrap()
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let map = router::<Bytes>();

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        let value = Bytes::from("small_value");
        b.iter(|| {
            map.set(&format!("key:{}", i), value.clone());
            i += 1;
        });
    });

    group.bench_function("set_ex", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            map.set_ex(&format!("ttl:{}", i), value.clone(), Duration::from_secs(3600));
            i += 1;
        });
    });

    group.bench_function("set_nx_existing", |b| {
        map.set("taken", Bytes::from("v"));
        b.iter(|| {
            black_box(map.set_nx("taken", Bytes::from("other")));
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let map = router::<Bytes>();

    // Pre-populate with data
    for i in 0..100_000 {
        map.set(&format!("key:{}", i), Bytes::from(format!("value:{}", i)));
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(map.get(&format!("key:{}", i % 100_000)));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(map.get(&format!("missing:{}", i)));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let map = router::<Bytes>();

    // Pre-populate
    for i in 0..10_000 {
        map.set(&format!("key:{}", i), Bytes::from(format!("value:{}", i)));
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                // 20% writes
                map.set(&format!("new:{}", i), Bytes::from("value"));
            } else {
                // 80% reads
                black_box(map.get(&format!("key:{}", i % 10_000)));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark counter operations
fn bench_incr(c: &mut Criterion) {
    let map = router::<i64>();

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    // Single counter (high contention)
    group.bench_function("single_counter", |b| {
        b.iter(|| {
            black_box(map.incr("counter").unwrap());
        });
    });

    // Multiple counters (low contention)
    group.bench_function("multiple_counters", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(map.incr(&format!("counter:{}", i % 1000)).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let map = Arc::new(router::<Bytes>());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = format!("key:{}:{}", t, i);
                            map.set(&key, Bytes::from("value"));
                            map.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(map.len());
        });
    });

    group.finish();
}

/// A partition holding 10k keys, half of them already expired.
fn half_expired() -> Partition<Bytes> {
    let clock = Arc::new(ManualClock::new(1_000_000_000));
    let partition = Partition::with_clock(clock.clone());
    for i in 0..10_000 {
        let key = format!("key:{}", i);
        if i % 2 == 0 {
            partition.set_ex(&key, Bytes::from("value"), Duration::from_secs(1));
        } else {
            partition.set(&key, Bytes::from("value"));
        }
    }
    clock.advance(Duration::from_secs(2));
    partition
}

/// Benchmark the sweep itself
fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("sweep_idle", |b| {
        b.iter_batched(
            half_expired,
            |partition| black_box(partition.sweep()),
            BatchSize::LargeInput,
        );
    });

    // Writers keep going while the partition sweeps
    group.bench_function("sweep_under_writes", |b| {
        b.iter_batched(
            || Arc::new(half_expired()),
            |partition| {
                let running = Arc::new(AtomicBool::new(true));
                let writer = {
                    let partition = Arc::clone(&partition);
                    let running = Arc::clone(&running);
                    thread::spawn(move || {
                        let mut i = 0u64;
                        while running.load(Ordering::Relaxed) {
                            partition.set(&format!("live:{}", i % 1000), Bytes::from("v"));
                            i += 1;
                        }
                    })
                };

                black_box(partition.sweep());
                running.store(false, Ordering::Relaxed);
                writer.join().unwrap();
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_incr,
    bench_concurrent,
    bench_sweep,
);

criterion_main!(benches);
