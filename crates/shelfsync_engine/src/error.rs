//! Error types for the sync engine.

use crate::remote::RemoteError;
use crate::repository::RepositoryError;
use crate::state::SyncCycleResult;
use shelfsync_blobstore::BlobError;
use shelfsync_protocol::{CodecError, QueueError};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Retry hint for network failures that carry none of their own.
pub const DEFAULT_NETWORK_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Retry hint when a cycle is already running.
pub const ALREADY_RUNNING_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store could not be reached.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Server-provided backoff, if any.
        retry_after: Option<Duration>,
    },

    /// The remote store rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A blob or remote key is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote store failed for another reason.
    #[error("remote store error: {0}")]
    Remote(String),

    /// Local blob store error.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// Sync queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Local item repository error.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A remote object could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Watermark persistence failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No remote credentials are configured.
    #[error("sync is not configured")]
    NotConfigured,

    /// Another cycle holds the single-flight lock.
    #[error("a sync cycle is already running")]
    AlreadyRunning,

    /// The cycle was cancelled; `partial` holds what it finished.
    #[error("sync cancelled after {} uploads and {} downloads", partial.uploaded_count, partial.downloaded_count)]
    Cancelled {
        /// Work completed before cancellation.
        partial: Box<SyncCycleResult>,
    },
}

impl SyncError {
    /// Creates a network error without a retry hint.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retry_after: None,
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::Cancelled {
            partial: Box::default(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { .. } => true,
            SyncError::AlreadyRunning => true,
            SyncError::Cancelled { .. } => true,
            SyncError::Queue(QueueError::Io(_)) => true,
            SyncError::Io(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error must stop the whole cycle rather than
    /// just the item being processed.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_) | SyncError::NotConfigured | SyncError::Cancelled { .. }
        )
    }

    /// Returns true for input-validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Blob(e) if e.is_validation())
    }

    /// Returns a stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Network { .. } => "network",
            SyncError::Auth(_) => "auth",
            SyncError::NotFound(_) => "not_found",
            SyncError::Remote(_) => "remote",
            SyncError::Blob(BlobError::NotFound(_)) => "not_found",
            SyncError::Blob(e) if e.is_validation() => "invalid_content",
            SyncError::Blob(_) => "blob",
            SyncError::Queue(_) => "queue",
            SyncError::Repository(RepositoryError::VersionMismatch { .. }) => "version_mismatch",
            SyncError::Repository(_) => "repository",
            SyncError::Codec(_) => "codec",
            SyncError::Io(_) => "io",
            SyncError::NotConfigured => "not_configured",
            SyncError::AlreadyRunning => "already_running",
            SyncError::Cancelled { .. } => "cancelled",
        }
    }

    /// Returns how long a caller should wait before retrying, if at all.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Network { retry_after, .. } => {
                Some(retry_after.unwrap_or(DEFAULT_NETWORK_RETRY_AFTER))
            }
            SyncError::AlreadyRunning => Some(ALREADY_RUNNING_RETRY_AFTER),
            SyncError::Cancelled { .. } => Some(Duration::ZERO),
            _ => None,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network {
                message,
                retry_after,
            } => SyncError::Network {
                message,
                retry_after,
            },
            RemoteError::Auth(message) => SyncError::Auth(message),
            RemoteError::NotFound(key) => SyncError::NotFound(key),
            RemoteError::Other(message) => SyncError::Remote(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync_protocol::ItemId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection reset").is_retryable());
        assert!(SyncError::AlreadyRunning.is_retryable());
        assert!(!SyncError::Auth("bad key".into()).is_retryable());
        assert!(!SyncError::NotFound("items/x".into()).is_retryable());
        assert!(!SyncError::Blob(BlobError::EmptyContent).is_retryable());
    }

    #[test]
    fn auth_is_cycle_fatal() {
        assert!(SyncError::Auth("expired".into()).is_cycle_fatal());
        assert!(!SyncError::network("timeout").is_cycle_fatal());
        assert!(!SyncError::Blob(BlobError::EmptyContent).is_cycle_fatal());
    }

    #[test]
    fn error_codes() {
        assert_eq!(SyncError::network("x").error_code(), "network");
        assert_eq!(
            SyncError::Blob(BlobError::TooSmall { size: 3, min: 16 }).error_code(),
            "invalid_content"
        );
        assert_eq!(
            SyncError::Repository(RepositoryError::VersionMismatch {
                item_id: ItemId::from("a"),
                expected: Some(1),
                actual: Some(2),
            })
            .error_code(),
            "version_mismatch"
        );
        assert_eq!(SyncError::cancelled().error_code(), "cancelled");
    }

    #[test]
    fn retry_hints() {
        assert_eq!(
            SyncError::network("x").retry_after(),
            Some(DEFAULT_NETWORK_RETRY_AFTER)
        );
        let throttled = SyncError::Network {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(SyncError::Auth("x".into()).retry_after(), None);
    }

    #[test]
    fn remote_errors_map_onto_taxonomy() {
        let err: SyncError = RemoteError::Auth("denied".into()).into();
        assert!(matches!(err, SyncError::Auth(_)));

        let err: SyncError = RemoteError::network("unreachable").into();
        assert!(err.is_retryable());

        let err: SyncError = RemoteError::NotFound("blobs/ab/ab".into()).into();
        assert_eq!(err.error_code(), "not_found");
    }

    #[test]
    fn cancelled_display_reports_progress() {
        let mut partial = SyncCycleResult::default();
        partial.uploaded_count = 2;
        let err = SyncError::Cancelled {
            partial: Box::new(partial),
        };
        assert_eq!(err.to_string(), "sync cancelled after 2 uploads and 0 downloads");
    }
}
