//! Remote object store collaborator.
//!
//! The engine maps its identifiers onto an opaque key namespace:
//!
//! ```text
//! items/<item_id>          # CBOR-encoded ItemSnapshot
//! blobs/<shard>/<hash>     # raw blob bytes
//! ```

use crate::vault::RemoteCredentials;
use parking_lot::{Mutex, RwLock};
use shelfsync_blobstore::BlobHash;
use shelfsync_protocol::{ItemId, Timestamp};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Key prefix for item snapshots.
pub const ITEM_PREFIX: &str = "items/";

/// Key prefix for blobs.
pub const BLOB_PREFIX: &str = "blobs/";

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by a remote object store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The store could not be reached.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Server-provided backoff, if any.
        retry_after: Option<Duration>,
    },

    /// Credentials were rejected.
    #[error("access denied: {0}")]
    Auth(String),

    /// No object under this key.
    #[error("no such key: {0}")]
    NotFound(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Creates a network error without a retry hint.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network { .. })
    }
}

/// One entry of a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object key.
    pub key: String,
    /// Last modification time as recorded by the store.
    pub updated_at: Timestamp,
}

/// An S3-compatible object store, addressed by key.
///
/// Implementations must be safe to call from several upload workers at once.
pub trait RemoteObjectStore: Send + Sync {
    /// Validates credentials before a cycle starts.
    fn connect(&self, _credentials: &RemoteCredentials) -> RemoteResult<()> {
        Ok(())
    }

    /// Writes an object, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8]) -> RemoteResult<()>;

    /// Reads an object.
    fn get(&self, key: &str) -> RemoteResult<Vec<u8>>;

    /// Lists objects modified strictly after `since`.
    fn list(&self, since: Timestamp) -> RemoteResult<Vec<RemoteObject>>;

    /// Deletes an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> RemoteResult<()>;
}

/// Returns the key holding an item's snapshot.
pub fn item_key(item_id: &ItemId) -> String {
    format!("{ITEM_PREFIX}{item_id}")
}

/// Returns the key holding a blob.
pub fn blob_key(hash: &BlobHash) -> String {
    format!("{BLOB_PREFIX}{}/{}", hash.shard(), hash)
}

/// Extracts the item id from an item key.
pub fn parse_item_key(key: &str) -> Option<ItemId> {
    key.strip_prefix(ITEM_PREFIX)
        .filter(|id| !id.is_empty())
        .map(ItemId::from)
}

/// Extracts the hash from a blob key.
pub fn parse_blob_key(key: &str) -> Option<BlobHash> {
    let rest = key.strip_prefix(BLOB_PREFIX)?;
    let (shard, hash) = rest.split_once('/')?;
    let hash = BlobHash::parse(hash).ok()?;
    (hash.shard() == shard).then_some(hash)
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    updated_at: Timestamp,
}

#[derive(Debug, Default)]
struct Faults {
    put_failures: Vec<RemoteError>,
    key_failures: Vec<(String, RemoteError)>,
    list_failure: Option<RemoteError>,
}

/// An in-memory object store for testing and embedding.
///
/// Every write advances a logical clock by one millisecond, so listings are
/// totally ordered even when writes land in the same instant. Several
/// engines sharing one instance behave like devices sharing a bucket.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    clock: Mutex<Timestamp>,
    faults: Mutex<Faults>,
    required_secret: Option<String>,
    put_count: Mutex<u64>,
}

impl MemoryObjectStore {
    /// Creates an empty store whose clock starts at the epoch.
    pub fn new() -> Self {
        Self::with_clock(Timestamp::ZERO)
    }

    /// Creates an empty store whose clock starts at `start`.
    pub fn with_clock(start: Timestamp) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            clock: Mutex::new(start),
            faults: Mutex::new(Faults::default()),
            required_secret: None,
            put_count: Mutex::new(0),
        }
    }

    /// Rejects `connect` unless the secret matches.
    pub fn requiring_secret(mut self, secret: impl Into<String>) -> Self {
        self.required_secret = Some(secret.into());
        self
    }

    /// Fails the next `count` puts with `error`.
    pub fn fail_next_puts(&self, count: usize, error: RemoteError) {
        let mut faults = self.faults.lock();
        faults
            .put_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Fails every put to `key` with `error` until cleared.
    pub fn fail_key(&self, key: impl Into<String>, error: RemoteError) {
        self.faults.lock().key_failures.push((key.into(), error));
    }

    /// Fails every list with `error`, or stops doing so with `None`.
    pub fn fail_list(&self, error: Option<RemoteError>) {
        self.faults.lock().list_failure = error;
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Returns all keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Returns true if `key` holds an object.
    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Returns the number of successful puts so far.
    pub fn put_count(&self) -> u64 {
        *self.put_count.lock()
    }

    /// Returns the current logical time.
    pub fn now(&self) -> Timestamp {
        *self.clock.lock()
    }

    fn tick(&self) -> Timestamp {
        let mut clock = self.clock.lock();
        *clock = Timestamp::from_millis(clock.as_millis() + 1);
        *clock
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteObjectStore for MemoryObjectStore {
    fn connect(&self, credentials: &RemoteCredentials) -> RemoteResult<()> {
        match &self.required_secret {
            Some(secret) if secret != credentials.secret_access_key() => Err(RemoteError::Auth(
                format!("invalid secret for {}", credentials.access_key_id),
            )),
            _ => Ok(()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> RemoteResult<()> {
        {
            let mut faults = self.faults.lock();
            if let Some((_, err)) = faults.key_failures.iter().find(|(k, _)| k == key) {
                return Err(err.clone());
            }
            if !faults.put_failures.is_empty() {
                return Err(faults.put_failures.remove(0));
            }
        }

        // tick under the write lock so a concurrent listing never sees a
        // later write without this one
        let mut objects = self.objects.write();
        let updated_at = self.tick();
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                updated_at,
            },
        );
        drop(objects);
        *self.put_count.lock() += 1;
        Ok(())
    }

    fn get(&self, key: &str) -> RemoteResult<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    fn list(&self, since: Timestamp) -> RemoteResult<Vec<RemoteObject>> {
        if let Some(err) = &self.faults.lock().list_failure {
            return Err(err.clone());
        }

        let mut listing: Vec<RemoteObject> = self
            .objects
            .read()
            .iter()
            .filter(|(_, o)| o.updated_at > since)
            .map(|(key, o)| RemoteObject {
                key: key.clone(),
                updated_at: o.updated_at,
            })
            .collect();
        listing.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.key.cmp(&b.key)));
        Ok(listing)
    }

    fn delete(&self, key: &str) -> RemoteResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }
}
