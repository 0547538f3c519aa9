//! Sync cycle benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shelfsync_bench::generate_items;
use shelfsync_blobstore::ContentBlobStore;
use shelfsync_engine::{
    MemoryItemRepository, MemoryObjectStore, RemoteCredentials, StaticCredentialVault, SyncConfig,
    SyncContext, SyncEngine,
};
use shelfsync_protocol::{Operation, RetryConfig, SyncQueue, Timestamp};
use std::sync::Arc;
use tempfile::TempDir;

struct Setup {
    _dir: TempDir,
    engine: SyncEngine<MemoryObjectStore, MemoryItemRepository>,
}

fn device(
    name: &str,
    remote: &Arc<MemoryObjectStore>,
    workers: usize,
) -> (Setup, Arc<MemoryItemRepository>, Arc<SyncQueue>) {
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(ContentBlobStore::open(dir.path().join("blobs")).unwrap());
    let queue = Arc::new(SyncQueue::in_memory(RetryConfig::default()));
    let repo = Arc::new(MemoryItemRepository::new());
    let engine = SyncEngine::new(
        SyncConfig::new(name)
            .with_batch_size(10_000)
            .with_upload_workers(workers),
        Arc::clone(remote),
        Arc::clone(&repo),
        blobs,
        Arc::clone(&queue),
    )
    .with_vault(Arc::new(StaticCredentialVault::new(RemoteCredentials::new(
        "mem://bench",
        "library",
        name,
        "secret",
    ))));
    (Setup { _dir: dir, engine }, repo, queue)
}

fn populate(setup: &Setup, repo: &MemoryItemRepository, queue: &SyncQueue, count: usize) {
    for (id, data) in generate_items(count, 4096) {
        let hash = setup.engine.blob_store().store(&data).unwrap().hash;
        repo.create(id.clone(), Timestamp::now(), Some(hash)).unwrap();
        queue.enqueue(id, Operation::Create).unwrap();
    }
}

/// Benchmark an upload-only cycle by worker count.
fn bench_upload_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_upload");
    group.sample_size(10);
    let count = 200;
    group.throughput(Throughput::Elements(count as u64));

    for workers in [1, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(workers), workers, |b, &workers| {
            b.iter_batched(
                || {
                    let remote = Arc::new(MemoryObjectStore::new());
                    let (setup, repo, queue) = device("laptop", &remote, workers);
                    populate(&setup, &repo, &queue, count);
                    setup
                },
                |setup| black_box(setup.engine.sync(&SyncContext::new()).unwrap()),
                criterion::BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark a download-only cycle on a fresh device.
fn bench_download_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_download");
    group.sample_size(10);

    for count in [50, 200].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let remote = Arc::new(MemoryObjectStore::new());
            let (source, repo, queue) = device("laptop", &remote, 4);
            populate(&source, &repo, &queue, count);
            source.engine.sync(&SyncContext::new()).unwrap();

            b.iter_batched(
                || device("phone", &remote, 4).0,
                |setup| black_box(setup.engine.sync(&SyncContext::new()).unwrap()),
                criterion::BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_upload_cycle, bench_download_cycle);

criterion_main!(benches);
