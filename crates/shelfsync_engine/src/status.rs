//! Status and trigger payloads for the API layer.

use crate::state::SyncCycleResult;
use serde::{Deserialize, Serialize};
use shelfsync_protocol::{ConflictRecord, QueueStats, Timestamp};

/// Coarse engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No cycle running; the last one (if any) succeeded.
    Idle,
    /// A cycle is running.
    Syncing,
    /// The last cycle failed.
    Failed,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    /// Coarse status.
    pub status: SyncStatus,
    /// End of the last successful cycle.
    pub last_sync: Option<Timestamp>,
    /// Local changes not yet propagated, dead ones excluded.
    pub pending_changes: usize,
    /// Queue breakdown.
    pub queue_stats: QueueStats,
    /// Whether remote credentials are available.
    pub configured: bool,
}

/// Answer to a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// Entries propagated.
    pub uploaded: usize,
    /// Remote changes applied.
    pub downloaded: usize,
    /// Conflicts resolved during the cycle.
    pub conflicts: Vec<ConflictRecord>,
    /// Cycle wall time in milliseconds.
    pub duration_ms: u64,
}

impl From<&SyncCycleResult> for TriggerResponse {
    fn from(result: &SyncCycleResult) -> Self {
        Self {
            uploaded: result.uploaded_count,
            downloaded: result.downloaded_count,
            conflicts: result.conflicts.clone(),
            duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
