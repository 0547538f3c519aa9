//! Error types for blob store operations.

use crate::hash::BlobHash;
use std::io;
use thiserror::Error;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The payload was empty.
    #[error("content is empty")]
    EmptyContent,

    /// The payload is below the minimum accepted size.
    #[error("content too small: {size} bytes, minimum is {min}")]
    TooSmall {
        /// Size of the rejected payload.
        size: u64,
        /// Configured minimum size.
        min: u64,
    },

    /// The hash is not a 64-character hex SHA-256 digest.
    #[error("invalid blob hash {0:?}: expected 64 hex characters")]
    InvalidHash(String),

    /// No blob is stored under this hash.
    #[error("blob not found: {0}")]
    NotFound(BlobHash),

    /// Stored bytes no longer hash to their file name.
    #[error("integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch {
        /// Hash the blob is stored under.
        expected: BlobHash,
        /// Hash of the bytes actually on disk.
        actual: BlobHash,
    },

    /// A streaming write was cancelled before completion.
    #[error("blob write cancelled")]
    Cancelled,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BlobError {
    /// Returns true for input validation failures.
    ///
    /// These are never worth retrying: the same input fails the same way.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BlobError::EmptyContent | BlobError::TooSmall { .. } | BlobError::InvalidHash(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors() {
        assert!(BlobError::EmptyContent.is_validation());
        assert!(BlobError::TooSmall { size: 3, min: 16 }.is_validation());
        assert!(BlobError::InvalidHash("xyz".into()).is_validation());
        assert!(!BlobError::Cancelled.is_validation());
        assert!(!BlobError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_validation());
    }

    #[test]
    fn error_display() {
        let err = BlobError::TooSmall { size: 3, min: 16 };
        assert_eq!(err.to_string(), "content too small: 3 bytes, minimum is 16");
    }
}
