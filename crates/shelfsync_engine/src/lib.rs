//! # Shelfsync Engine
//!
//! Offline-first synchronization of a local item library with a remote
//! object store.
//!
//! This crate provides:
//! - The sync engine and its state machine
//! - Remote object store and local repository collaborator traits
//! - Credential vault and watermark persistence
//! - Lifecycle events and status payloads for an API layer
//!
//! ## Cycle
//!
//! A cycle claims a batch of local changes, lists remote changes since the
//! watermark, uploads the local changes that have no remote counterpart,
//! then applies remote changes one by one, resolving overlaps with
//! last-write-wins. Finally the watermark moves past every change that was
//! fully applied.
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - A newer remote change is never overwritten by an upload
//! - The watermark never skips an unapplied remote change
//! - Every conflict decision is recorded
//!
//! ```
//! use shelfsync_blobstore::ContentBlobStore;
//! use shelfsync_engine::{
//!     MemoryItemRepository, MemoryObjectStore, RemoteCredentials, StaticCredentialVault,
//!     SyncConfig, SyncContext, SyncEngine,
//! };
//! use shelfsync_protocol::{Operation, RetryConfig, SyncQueue, Timestamp};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let blobs = Arc::new(ContentBlobStore::open(dir.path()).unwrap());
//! let repo = Arc::new(MemoryItemRepository::new());
//! let queue = Arc::new(SyncQueue::in_memory(RetryConfig::default()));
//! let vault = StaticCredentialVault::new(RemoteCredentials::new(
//!     "https://objects.example.com", "library", "key-id", "secret",
//! ));
//!
//! let engine = SyncEngine::new(
//!     SyncConfig::new("laptop"),
//!     Arc::new(MemoryObjectStore::new()),
//!     Arc::clone(&repo),
//!     blobs,
//!     Arc::clone(&queue),
//! )
//! .with_vault(Arc::new(vault));
//!
//! repo.create("book-1", Timestamp::now(), None).unwrap();
//! queue.enqueue("book-1", Operation::Create).unwrap();
//!
//! let result = engine.sync(&SyncContext::new()).unwrap();
//! assert_eq!(result.uploaded_count, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod events;
mod remote;
mod repository;
mod state;
mod status;
mod vault;
mod watermark;

pub use config::{RetryConfig, SyncConfig};
pub use context::SyncContext;
pub use error::{SyncError, SyncResult, ALREADY_RUNNING_RETRY_AFTER, DEFAULT_NETWORK_RETRY_AFTER};
pub use events::{ChannelEventSink, NoopEventSink, RecordingEventSink, SyncEvent, SyncEventSink};
pub use remote::{
    blob_key, item_key, parse_blob_key, parse_item_key, MemoryObjectStore, RemoteError,
    RemoteObject, RemoteObjectStore, RemoteResult, BLOB_PREFIX, ITEM_PREFIX,
};
pub use repository::{LocalItemRepository, MemoryItemRepository, RepositoryError, RepositoryResult};
pub use state::{ItemFailure, SyncCycleResult, SyncEngine, SyncState};
pub use status::{SyncStatus, SyncStatusReport, TriggerResponse};
pub use vault::{CredentialVault, RemoteCredentials, StaticCredentialVault};
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
