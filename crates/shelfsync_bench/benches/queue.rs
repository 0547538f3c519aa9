//! Sync queue benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shelfsync_bench::generate_ids;
use shelfsync_protocol::{Operation, RetryConfig, SyncQueue};
use tempfile::TempDir;

/// Benchmark enqueueing distinct items.
fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");

    group.bench_function("in_memory", |b| {
        let queue = SyncQueue::in_memory(RetryConfig::default());
        let ids = generate_ids(10_000);
        let mut next = 0;
        b.iter(|| {
            let id = ids[next % ids.len()].clone();
            next += 1;
            black_box(queue.enqueue(id, Operation::Update).unwrap());
        });
    });

    group.sample_size(20);
    group.bench_function("durable", |b| {
        let dir = TempDir::new().unwrap();
        let queue = SyncQueue::open(dir.path(), RetryConfig::default()).unwrap();
        let ids = generate_ids(1_000);
        let mut next = 0;
        b.iter(|| {
            let id = ids[next % ids.len()].clone();
            next += 1;
            black_box(queue.enqueue(id, Operation::Update).unwrap());
        });
    });

    group.finish();
}

/// Benchmark coalescing into an existing entry.
fn bench_coalesce(c: &mut Criterion) {
    c.bench_function("queue_coalesce", |b| {
        let queue = SyncQueue::in_memory(RetryConfig::default());
        queue.enqueue("hot-item", Operation::Create).unwrap();
        b.iter(|| black_box(queue.enqueue("hot-item", Operation::Update).unwrap()));
    });
}

/// Benchmark a claim/complete round over a populated queue.
fn bench_claim_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_claim_complete");

    for batch in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            b.iter_batched(
                || {
                    let queue = SyncQueue::in_memory(RetryConfig::default());
                    for id in generate_ids(batch) {
                        queue.enqueue(id, Operation::Create).unwrap();
                    }
                    queue
                },
                |queue| {
                    for entry in queue.claim(batch).unwrap() {
                        queue.complete(entry.entry_id).unwrap();
                    }
                    black_box(queue.compact().unwrap())
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_coalesce, bench_claim_complete);

criterion_main!(benches);
