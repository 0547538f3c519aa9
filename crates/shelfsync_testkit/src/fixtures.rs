//! Test fixtures and device helpers.
//!
//! Provides temporary blob stores and simulated devices that share one
//! in-memory remote, so multi-device scenarios run in a single process.

use shelfsync_blobstore::{BlobHash, ContentBlobStore};
use shelfsync_engine::{
    LocalItemRepository, MemoryItemRepository, MemoryObjectStore, RemoteCredentials,
    StaticCredentialVault, SyncConfig, SyncContext, SyncCycleResult, SyncEngine,
};
use shelfsync_protocol::{Item, ItemId, Operation, RetryConfig, SyncQueue, Timestamp};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Engine type used by test devices.
pub type TestEngine = SyncEngine<MemoryObjectStore, MemoryItemRepository>;

/// A blob store in a temporary directory.
pub struct TestBlobStore {
    /// The store.
    pub store: ContentBlobStore,
    _temp_dir: TempDir,
}

impl TestBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = ContentBlobStore::open(temp_dir.path().join("blobs"))
            .expect("Failed to open blob store");
        Self {
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        self.store.root()
    }
}

impl Default for TestBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestBlobStore {
    type Target = ContentBlobStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary blob store.
pub fn with_temp_blob_store<F, R>(f: F) -> R
where
    F: FnOnce(&ContentBlobStore) -> R,
{
    let store = TestBlobStore::new();
    f(&store.store)
}

/// Creates a remote shared by several test devices.
pub fn shared_remote() -> Arc<MemoryObjectStore> {
    Arc::new(MemoryObjectStore::new())
}

/// Credentials accepted by an unrestricted [`MemoryObjectStore`].
pub fn test_credentials(device: &str) -> RemoteCredentials {
    RemoteCredentials::new("mem://shared", "library", device, "secret")
}

/// One simulated device with its own repository, blobs and durable queue.
pub struct TestDevice {
    /// The engine.
    pub engine: TestEngine,
    /// The device's item repository.
    pub repo: Arc<MemoryItemRepository>,
    /// The device's queue.
    pub queue: Arc<SyncQueue>,
    _temp_dir: TempDir,
}

impl TestDevice {
    /// Creates a device with immediate retries.
    pub fn new(name: &str, remote: &Arc<MemoryObjectStore>) -> Self {
        Self::with_config(
            SyncConfig::new(name).with_retry(RetryConfig::immediate(3)),
            remote,
        )
    }

    /// Creates a device from a full configuration.
    pub fn with_config(config: SyncConfig, remote: &Arc<MemoryObjectStore>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blobs = Arc::new(
            ContentBlobStore::open(temp_dir.path().join("blobs")).expect("Failed to open blob store"),
        );
        let queue = Arc::new(
            SyncQueue::open(temp_dir.path().join("queue"), config.retry.clone())
                .expect("Failed to open queue"),
        );
        let repo = Arc::new(MemoryItemRepository::new());
        let vault = StaticCredentialVault::new(test_credentials(&config.device_id));

        let engine = SyncEngine::new(
            config,
            Arc::clone(remote),
            Arc::clone(&repo),
            blobs,
            Arc::clone(&queue),
        )
        .with_vault(Arc::new(vault));

        Self {
            engine,
            repo,
            queue,
            _temp_dir: temp_dir,
        }
    }

    /// Replaces the engine, keeping the device's stores.
    pub fn map_engine(mut self, f: impl FnOnce(TestEngine) -> TestEngine) -> Self {
        self.engine = f(self.engine);
        self
    }

    /// Creates an item locally and queues it.
    pub fn create(&self, id: &str, millis: i64, content: Option<&[u8]>) -> Option<BlobHash> {
        let hash = content.map(|bytes| self.store_blob(bytes));
        self.repo
            .create(id, Timestamp::from_millis(millis), hash.clone())
            .expect("Failed to create item");
        self.queue
            .enqueue(id, Operation::Create)
            .expect("Failed to enqueue");
        hash
    }

    /// Edits an item locally and queues it.
    pub fn edit(&self, id: &str, millis: i64, content: &[u8]) -> BlobHash {
        let hash = self.store_blob(content);
        self.repo
            .edit(&ItemId::from(id), Timestamp::from_millis(millis), Some(hash.clone()))
            .expect("Failed to edit item");
        self.queue
            .enqueue(id, Operation::Update)
            .expect("Failed to enqueue");
        hash
    }

    /// Deletes an item locally and queues it.
    pub fn delete(&self, id: &str, millis: i64) {
        let current = self.item(id);
        self.repo
            .mark_deleted(&current.id, Timestamp::from_millis(millis), current.version)
            .expect("Failed to delete item");
        self.queue
            .enqueue(id, Operation::Delete)
            .expect("Failed to enqueue");
    }

    /// Runs one cycle and expects it to succeed.
    pub fn sync(&self) -> SyncCycleResult {
        self.engine
            .sync(&SyncContext::new())
            .expect("Sync cycle failed")
    }

    /// Reads an item, panicking if it does not exist.
    pub fn item(&self, id: &str) -> Item {
        self.try_item(id).expect("Item should exist")
    }

    /// Reads an item.
    pub fn try_item(&self, id: &str) -> Option<Item> {
        self.repo
            .get(&ItemId::from(id))
            .expect("Repository read failed")
    }

    /// Reads a blob's content.
    pub fn blob(&self, hash: &BlobHash) -> Vec<u8> {
        self.engine
            .blob_store()
            .read(hash)
            .expect("Blob should exist")
    }

    fn store_blob(&self, content: &[u8]) -> BlobHash {
        self.engine
            .blob_store()
            .store(content)
            .expect("Failed to store blob")
            .hash
    }
}

/// Returns true if both devices hold the same visible state for every item.
///
/// Versions are per-device counters and are not compared.
pub fn devices_agree(a: &TestDevice, b: &TestDevice) -> bool {
    let view = |device: &TestDevice| -> Vec<_> {
        device
            .repo
            .list()
            .expect("Repository read failed")
            .into_iter()
            .map(|item| (item.id, item.updated_at, item.content_hash, item.is_deleted))
            .collect()
    };
    view(a) == view(b)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a device with `count` queued items, each with its own blob.
    pub fn populated_device(name: &str, remote: &Arc<MemoryObjectStore>, count: usize) -> TestDevice {
        let device = TestDevice::new(name, remote);
        for i in 0..count {
            let content = format!("content of item {i} on {name}");
            device.create(&format!("item-{i:04}"), 100 + i as i64, Some(content.as_bytes()));
        }
        device
    }

    /// Creates two devices that both edited item `id` before syncing.
    ///
    /// The first device's edit is at `first_millis` and has been pushed;
    /// the second device's edit is at `second_millis` and is still queued.
    pub fn diverged_pair(
        remote: &Arc<MemoryObjectStore>,
        id: &str,
        first_millis: i64,
        second_millis: i64,
    ) -> (TestDevice, TestDevice) {
        let first = TestDevice::new("first", remote);
        let second = TestDevice::new("second", remote);
        second.create(id, second_millis, Some(b"second device content"));
        first.create(id, first_millis, Some(b"first device content"));
        first.sync();
        (first, second)
    }
}
