//! # ShelfSync Blob Store
//!
//! Content-addressed storage for binary payloads (documents, media,
//! export archives).
//!
//! Blobs are identified solely by the SHA-256 digest of their bytes and
//! stored under a two-character shard directory:
//!
//! ```text
//! <root>/ab/ab31…   # full 64-character lowercase hex digest
//! ```
//!
//! ## Design Principles
//!
//! - Identical bytes ⇒ identical path ⇒ storing twice is a no-op
//! - Blobs are immutable once written
//! - Writes stage in a private temp directory and rename into place
//! - The store keeps no reference counts; callers garbage-collect by
//!   passing the full reachable set to [`ContentBlobStore::cleanup`]
//! - Payloads under 16 bytes are rejected as likely corrupt or placeholder
//!
//! ## Example
//!
//! ```rust
//! use shelfsync_blobstore::ContentBlobStore;
//! use std::collections::HashSet;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ContentBlobStore::open(dir.path()).unwrap();
//!
//! let stored = store.store(b"chapter one, first draft").unwrap();
//! assert_eq!(store.read(&stored.hash).unwrap(), b"chapter one, first draft");
//!
//! let report = store.cleanup(&HashSet::new()).unwrap();
//! assert_eq!(report.removed_count, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod hash;
mod stats;
mod store;

pub use config::{BlobStoreConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_SIZE, DEFAULT_TEMP_DIR};
pub use error::{BlobError, BlobResult};
pub use hash::{BlobHash, HASH_HEX_LEN, SHARD_LEN};
pub use stats::{BlobStats, CleanupReport, StoredBlob};
pub use store::ContentBlobStore;
