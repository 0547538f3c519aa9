//! Error types for the protocol crate.

use std::io;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for encoding and decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// CBOR encoding or decoding failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The bytes are not a valid encoding of the expected type.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Errors that can occur during sync queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No entry with this id exists.
    #[error("unknown queue entry: {0}")]
    UnknownEntry(u64),

    /// The entry is not in a state that allows the requested transition.
    #[error("invalid transition for entry {entry_id}: {from} -> {to}")]
    InvalidTransition {
        /// Entry id.
        entry_id: u64,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Another process holds the queue directory.
    #[error("queue locked: another process has exclusive access")]
    Locked,

    /// The journal could not be encoded or decoded.
    #[error("queue journal codec error: {0}")]
    Codec(#[from] CodecError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl QueueError {
    pub(crate) fn invalid_transition(
        entry_id: u64,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entry_id,
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = QueueError::UnknownEntry(7);
        assert_eq!(err.to_string(), "unknown queue entry: 7");

        let err = QueueError::invalid_transition(3, "Done", "InFlight");
        assert!(err.to_string().contains("entry 3"));
        assert!(err.to_string().contains("Done"));
    }
}
