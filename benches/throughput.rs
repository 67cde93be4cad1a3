//! Throughput Benchmark for the embedded StandbyKV engine
//!
//! Measures the storage engine under the workloads the services generate:
//! plain key/value traffic, TTL bookkeeping, sorted-set updates and reads,
//! and incremental key scans.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use standbykv::storage::{RankOrder, ScanCursor, StorageEngine};
use std::sync::Arc;
use std::time::Duration;

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, Bytes::from("small_value"), None).unwrap();
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, value.clone(), None).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        engine.set(key, value, None).unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes) across threads
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for i in 0..10_000u32 {
                            let key = format!("key:{}:{}", t, i % 2_000);
                            if i % 5 == 0 {
                                engine
                                    .set(Bytes::from(key), Bytes::from("value"), None)
                                    .unwrap();
                            } else {
                                black_box(engine.get(key.as_bytes()).unwrap());
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.len());
        });
    });

    group.finish();
}

/// Benchmark expiry bookkeeping
fn bench_expiry(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("expiry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine
                .set(key, Bytes::from("value"), Some(Duration::from_secs(3600)))
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("expire_existing", |b| {
        for i in 0..10_000 {
            let key = Bytes::from(format!("expire:{}", i));
            engine.set(key, Bytes::from("value"), None).unwrap();
        }

        let mut i = 0u64;
        b.iter(|| {
            let key = format!("expire:{}", i % 10_000);
            black_box(engine.expire(key.as_bytes(), Duration::from_secs(3600)).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark leaderboard-style sorted-set traffic
fn bench_ranked(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());
    let board = Bytes::from("leaderboard:bench");

    for i in 0..10_000 {
        let member = Bytes::from(format!("student:{}", i));
        engine
            .ranked_upsert(board.clone(), member, fastrand::f64() * 100.0)
            .unwrap();
    }

    let mut group = c.benchmark_group("ranked");
    group.throughput(Throughput::Elements(1));

    group.bench_function("upsert_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let member = Bytes::from(format!("student:{}", i % 10_000));
            black_box(
                engine
                    .ranked_upsert(board.clone(), member, fastrand::f64() * 100.0)
                    .unwrap(),
            );
            i += 1;
        });
    });

    group.bench_function("top_10", |b| {
        b.iter(|| {
            black_box(engine.ranked_range(&board, 0, 9, RankOrder::Descending).unwrap());
        });
    });

    group.bench_function("rank_of", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let member = format!("student:{}", i % 10_000);
            black_box(
                engine
                    .rank_of(&board, member.as_bytes(), RankOrder::Descending)
                    .unwrap(),
            );
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark incremental SCAN with pattern matching
fn bench_scan(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    for i in 0..1_000 {
        engine
            .set(Bytes::from(format!("user:{}", i)), Bytes::from("user_data"), None)
            .unwrap();
        engine
            .set(Bytes::from(format!("session:{}", i)), Bytes::from("session_data"), None)
            .unwrap();
        engine
            .set(Bytes::from(format!("cache:{}", i)), Bytes::from("cache_data"), None)
            .unwrap();
    }

    let full_scan = |pattern: &str| {
        let mut cursor = ScanCursor::start();
        let mut found = 0usize;
        loop {
            let page = engine.scan_keys(pattern, &cursor).unwrap();
            found += page.keys.len();
            if page.cursor.is_done() {
                return found;
            }
            cursor = page.cursor;
        }
    };

    let mut group = c.benchmark_group("scan");

    group.bench_function("scan_pattern", |b| {
        b.iter(|| black_box(full_scan("session:*")));
    });

    group.bench_function("scan_all", |b| {
        b.iter(|| black_box(full_scan("*")));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_concurrent,
    bench_expiry,
    bench_ranked,
    bench_scan,
);

criterion_main!(benches);
