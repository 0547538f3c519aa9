//! Persisted sync watermark.
//!
//! The watermark is the remote modification time up to which every change
//! has been applied locally. It only moves forward, and only past changes
//! that were fully applied.

use crate::error::SyncResult;
use parking_lot::Mutex;
use shelfsync_protocol::{write_atomic, CodecError, Timestamp};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Storage for the engine's watermark.
pub trait WatermarkStore: Send + Sync {
    /// Loads the watermark; a store that was never written yields the epoch.
    fn load(&self) -> SyncResult<Timestamp>;

    /// Persists a new watermark.
    fn save(&self, watermark: Timestamp) -> SyncResult<()>;
}

/// A watermark kept in memory.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Timestamp>,
}

impl MemoryWatermarkStore {
    /// Creates a store at the epoch.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self) -> SyncResult<Timestamp> {
        Ok(*self.value.lock())
    }

    fn save(&self, watermark: Timestamp) -> SyncResult<()> {
        *self.value.lock() = watermark;
        Ok(())
    }
}

/// A watermark persisted as 8 little-endian bytes.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    /// Uses the file at `path`, which need not exist yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> SyncResult<Timestamp> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Timestamp::ZERO),
            Err(e) => return Err(e.into()),
        };
        let bytes: [u8; 8] = data.as_slice().try_into().map_err(|_| {
            CodecError::Decode(format!("watermark file has {} bytes, expected 8", data.len()))
        })?;
        Ok(Timestamp::from_millis(i64::from_le_bytes(bytes)))
    }

    fn save(&self, watermark: Timestamp) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, &watermark.as_millis().to_le_bytes())?;
        Ok(())
    }
}

/// Computes the watermark after a pull.
///
/// `changes` pairs each listed change's remote modification time with
/// whether it was applied. The result never moves past an unapplied change
/// and never moves backwards.
pub(crate) fn advance(current: Timestamp, changes: &[(Timestamp, bool)]) -> Timestamp {
    let first_unapplied = changes
        .iter()
        .filter(|(_, applied)| !applied)
        .map(|(ts, _)| *ts)
        .min();

    changes
        .iter()
        .filter(|(ts, applied)| *applied && first_unapplied.map_or(true, |f| *ts < f))
        .map(|(ts, _)| *ts)
        .fold(current, Timestamp::max)
}
