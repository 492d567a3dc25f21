//! Cache benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use littdb_cache::{unit_weight, Cache, FifoCache, SharedCache, ThreadSafeCache, TieredCache};
use rand::Rng;

const ENTRIES: u64 = 10_000;

/// Benchmark FIFO inserts that keep evicting.
fn bench_fifo_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_put");
    group.throughput(Throughput::Elements(1));

    for capacity in [100u64, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, &capacity| {
                let mut cache = FifoCache::new(capacity);
                let mut key = 0u64;
                b.iter(|| {
                    cache.put(black_box(key), key);
                    key += 1;
                });
            },
        );
    }

    group.finish();
}

/// Benchmark FIFO lookups with a mix of hits and misses.
fn bench_fifo_get(c: &mut Criterion) {
    let mut cache = FifoCache::new(ENTRIES);
    for key in 0..ENTRIES {
        cache.put(key, vec![0u8; 64]);
    }
    let mut rng = rand::thread_rng();

    c.bench_function("fifo_get", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..ENTRIES * 2);
            black_box(cache.get(&key));
        });
    });
}

/// Benchmark the tiered cache under churn.
fn bench_tiered_put_get(c: &mut Criterion) {
    let mut cache = TieredCache::new(ENTRIES / 10, ENTRIES, unit_weight());
    let mut rng = rand::thread_rng();
    let mut next = 0u64;

    c.bench_function("tiered_put_get", |b| {
        b.iter(|| {
            cache.put(next, next);
            next += 1;
            let key = rng.gen_range(0..next);
            black_box(cache.get(&key));
        });
    });
}

/// Benchmark the locked wrapper from one thread.
fn bench_thread_safe_get(c: &mut Criterion) {
    let cache = ThreadSafeCache::new(FifoCache::new(ENTRIES));
    for key in 0..ENTRIES {
        SharedCache::put(&cache, key, key);
    }
    let mut key = 0u64;

    c.bench_function("thread_safe_get", |b| {
        b.iter(|| {
            black_box(SharedCache::get(&cache, &(key % ENTRIES)));
            key += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_fifo_put,
    bench_fifo_get,
    bench_tiered_put_get,
    bench_thread_safe_get
);
criterion_main!(benches);
