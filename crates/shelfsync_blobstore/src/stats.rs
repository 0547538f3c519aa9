//! Result types reported by the blob store.

use crate::hash::BlobHash;
use std::collections::BTreeMap;

/// Outcome of a successful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Content hash.
    pub hash: BlobHash,
    /// Payload size in bytes.
    pub size: u64,
    /// True if identical content was already present and nothing was written.
    pub deduplicated: bool,
}

/// Snapshot of what is on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStats {
    /// Number of stored blobs.
    pub total_files: u64,
    /// Sum of blob sizes in bytes.
    pub total_size: u64,
    /// Blob count per shard directory.
    pub per_shard_counts: BTreeMap<String, u64>,
}

/// Outcome of a garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Number of blobs deleted.
    pub removed_count: u64,
    /// Bytes reclaimed.
    pub freed_bytes: u64,
    /// Shard directories removed because they became empty.
    pub shards_removed: u64,
}
