//! Items as seen by the sync core.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use shelfsync_blobstore::BlobHash;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier of a library item.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an item id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The epoch; used as the initial watermark.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    /// Returns the value in milliseconds.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns this timestamp shifted forward.
    #[must_use]
    pub fn saturating_add(&self, delta: std::time::Duration) -> Self {
        let delta = i64::try_from(delta.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A library item, owned by the local item repository.
///
/// # Invariants
///
/// - `version` strictly increases on every local mutation
/// - A tombstoned item keeps its id and version for conflict comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier.
    pub id: ItemId,
    /// Monotonic local version.
    pub version: u64,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Payload blob, if any.
    pub content_hash: Option<BlobHash>,
    /// Tombstone flag.
    pub is_deleted: bool,
}

impl Item {
    /// Creates a live item at version 1.
    pub fn new(id: impl Into<ItemId>, updated_at: Timestamp, content_hash: Option<BlobHash>) -> Self {
        Self {
            id: id.into(),
            version: 1,
            updated_at,
            content_hash,
            is_deleted: false,
        }
    }

    /// Takes a snapshot suitable for the remote store.
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot::from(self)
    }
}

/// The state of an item as written to, or read from, the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Stable identifier.
    pub id: ItemId,
    /// Version on the writing device.
    pub version: u64,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Payload blob, if any.
    pub content_hash: Option<BlobHash>,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Device that wrote this snapshot.
    #[serde(default)]
    pub origin: Option<String>,
}

impl ItemSnapshot {
    /// Sets the writing device.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Returns true if this snapshot carries exactly the item's state.
    ///
    /// Used to recognise our own uploads when they come back in a listing.
    pub fn same_state_as(&self, item: &Item) -> bool {
        self.id == item.id
            && self.updated_at == item.updated_at
            && self.content_hash == item.content_hash
            && self.is_deleted == item.is_deleted
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl From<&Item> for ItemSnapshot {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            version: item.version,
            updated_at: item.updated_at,
            content_hash: item.content_hash.clone(),
            is_deleted: item.is_deleted,
            origin: None,
        }
    }
}
