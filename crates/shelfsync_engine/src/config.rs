//! Configuration for the sync engine.

pub use shelfsync_protocol::RetryConfig;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device identifier, recorded as the origin of uploaded snapshots.
    pub device_id: String,
    /// Maximum number of queue entries claimed per cycle.
    pub batch_size: usize,
    /// Number of parallel upload workers.
    pub upload_workers: usize,
    /// Progress events are emitted every this many percent.
    pub progress_step: u8,
    /// Backoff used for the retry hint after failed cycles.
    ///
    /// Queue entries follow the retry policy their queue was built with.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            batch_size: 100,
            upload_workers: 4,
            progress_step: 10,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the claim batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the number of upload workers.
    pub fn with_upload_workers(mut self, workers: usize) -> Self {
        self.upload_workers = workers.max(1);
        self
    }

    /// Sets the progress granularity in percent.
    pub fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step.clamp(1, 100);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("local")
    }
}
