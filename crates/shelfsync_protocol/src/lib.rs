//! # ShelfSync Protocol
//!
//! Item model, sync queue and conflict resolution for ShelfSync.
//!
//! This crate provides:
//! - [`Item`] and [`ItemSnapshot`], with CBOR codecs for the remote store
//! - [`SyncQueue`], the ordered record of local mutations awaiting upload
//! - [`ConflictResolver`] and the [`ConflictLog`] audit trail
//! - [`RetryConfig`] backoff shared by the queue and the engine
//!
//! Apart from the optional queue journal this crate performs no I/O.
//!
//! ## Example
//!
//! ```rust
//! use shelfsync_protocol::{Operation, RetryConfig, SyncQueue};
//!
//! let queue = SyncQueue::in_memory(RetryConfig::default());
//! queue.enqueue("note-1", Operation::Create).unwrap();
//! queue.enqueue("note-1", Operation::Update).unwrap();
//!
//! assert_eq!(queue.stats().pending, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod item;
mod journal;
mod operation;
mod queue;
mod retry;

pub use conflict::{ConflictLog, ConflictRecord, ConflictResolver, Resolution, Winner};
pub use error::{CodecError, CodecResult, QueueError, QueueResult};
pub use item::{Item, ItemId, ItemSnapshot, Timestamp};
pub use journal::write_atomic;
pub use operation::Operation;
pub use queue::{EntryStatus, FailOutcome, QueueStats, SyncQueue, SyncQueueEntry};
pub use retry::RetryConfig;
