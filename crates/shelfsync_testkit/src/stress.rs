//! Stress tests for ShelfSync.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::{devices_agree, shared_remote, TestDevice};
use shelfsync_blobstore::ContentBlobStore;
use shelfsync_protocol::{ItemId, Operation, SyncQueue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        info!(
            test = name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration_ms = self.duration.as_millis() as u64,
            ops_per_second = self.ops_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (or devices).
    pub threads: usize,
    /// Size of blob payloads in bytes.
    pub payload_size: usize,
    /// Number of distinct items.
    pub item_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            payload_size: 256,
            item_count: 1_000,
        }
    }
}

impl StressConfig {
    /// A configuration small enough for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            operations: 200,
            threads: 4,
            payload_size: 64,
            item_count: 20,
        }
    }
}

fn payload(seed: usize, size: usize) -> Vec<u8> {
    let mut data = seed.to_le_bytes().to_vec();
    data.resize(size.max(data.len()), (seed % 251) as u8);
    data
}

/// Stores blobs from several threads, half of them duplicates.
///
/// Every successful store must be readable afterward under its hash.
pub fn stress_concurrent_blob_writes(store: &ContentBlobStore, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let per_thread = config.operations / config.threads.max(1);
    let distinct = config.item_count.max(1);

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let successful = &successful;
            let failed = &failed;
            scope.spawn(move || {
                for i in 0..per_thread {
                    let data = payload((t * per_thread + i) % distinct, config.payload_size);
                    match store.store(&data) {
                        Ok(stored) if store.read(&stored.hash).ok().as_deref() == Some(&data[..]) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

/// Enqueues from several threads while one thread claims and completes.
///
/// Counts an operation as failed if a claim hands out an entry that is
/// already claimed.
pub fn stress_queue_producers_consumer(queue: &SyncQueue, config: &StressConfig) -> StressTestResult {
    let enqueued = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let producers_done = AtomicUsize::new(0);
    let per_thread = config.operations / config.threads.max(1);
    let distinct = config.item_count.max(1);

    let start = Instant::now();
    let completed = thread::scope(|scope| {
        for t in 0..config.threads {
            let enqueued = &enqueued;
            let failed = &failed;
            let producers_done = &producers_done;
            scope.spawn(move || {
                for i in 0..per_thread {
                    let item = ItemId::new(format!("item-{}", (t * per_thread + i) % distinct));
                    match queue.enqueue(item, Operation::Update) {
                        Ok(_) => enqueued.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
                producers_done.fetch_add(1, Ordering::SeqCst);
            });
        }

        let consumer = scope.spawn(|| {
            let mut completed = 0usize;
            loop {
                let batch = queue.claim(16).unwrap_or_default();
                if batch.is_empty() {
                    if producers_done.load(Ordering::SeqCst) == config.threads
                        && queue.stats().unsynced() == 0
                    {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                let mut seen = HashSet::new();
                for entry in batch {
                    if !seen.insert(entry.entry_id) || queue.complete(entry.entry_id).is_err() {
                        failed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        completed += 1;
                    }
                }
            }
            completed
        });
        consumer.join().unwrap_or(0)
    });

    info!(completed, "queue consumer drained");
    StressTestResult::new(enqueued.into_inner(), failed.into_inner(), start.elapsed())
}

/// Several devices write overlapping items, then sync until they agree.
///
/// Returns the number of sync rounds needed, or `None` if the devices did
/// not converge within `max_rounds`.
pub fn stress_device_convergence(config: &StressConfig, max_rounds: usize) -> Option<usize> {
    let remote = shared_remote();
    let devices: Vec<TestDevice> = (0..config.threads.max(2))
        .map(|d| TestDevice::new(&format!("device-{d}"), &remote))
        .collect();

    for (d, device) in devices.iter().enumerate() {
        for i in 0..config.item_count {
            let id = format!("item-{i:04}");
            let millis = 1_000 + (i * 7 + d * 13) as i64 % 97;
            let content = payload(d * config.item_count + i, config.payload_size);
            device.create(&id, millis, Some(content.as_slice()));
        }
    }

    for round in 1..=max_rounds {
        thread::scope(|scope| {
            for device in &devices {
                scope.spawn(move || device.sync());
            }
        });

        let settled = devices.iter().all(|d| d.queue.stats().unsynced() == 0);
        if settled && devices.windows(2).all(|pair| devices_agree(&pair[0], &pair[1])) {
            return Some(round);
        }
    }
    None
}
