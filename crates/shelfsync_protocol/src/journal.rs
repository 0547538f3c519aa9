//! On-disk persistence for the sync queue.
//!
//! ```text
//! <queue_dir>/
//! ├─ LOCK          # Advisory lock, one owning process
//! └─ queue.cbor    # Full queue state, rewritten on every mutation
//! ```

use crate::error::{CodecError, QueueError, QueueResult};
use crate::queue::SyncQueueEntry;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "queue.cbor";

/// Current journal format version.
const JOURNAL_VERSION: u16 = 1;

/// Serialized queue state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct JournalState {
    pub version: u16,
    pub next_entry_id: u64,
    pub entries: Vec<SyncQueueEntry>,
}

/// Owns a queue directory while open.
#[derive(Debug)]
pub(crate) struct QueueJournal {
    dir: PathBuf,
    _lock_file: File,
}

impl QueueJournal {
    /// Opens or creates a queue directory and takes its lock.
    pub fn open(dir: &Path) -> QueueResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(QueueError::Locked);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Loads the persisted state, or `None` for a fresh directory.
    pub fn load(&self) -> QueueResult<Option<JournalState>> {
        let data = match fs::read(self.dir.join(JOURNAL_FILE)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(None);
        }

        let state: JournalState = ciborium::from_reader(data.as_slice())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        if state.version != JOURNAL_VERSION {
            return Err(CodecError::Decode(format!(
                "unsupported queue journal version {}",
                state.version
            ))
            .into());
        }
        Ok(Some(state))
    }

    /// Replaces the persisted state.
    pub fn save(&self, next_entry_id: u64, entries: Vec<SyncQueueEntry>) -> QueueResult<()> {
        let state = JournalState {
            version: JOURNAL_VERSION,
            next_entry_id,
            entries,
        };
        let mut data = Vec::new();
        ciborium::into_writer(&state, &mut data).map_err(|e| CodecError::Encode(e.to_string()))?;
        write_atomic(&self.dir.join(JOURNAL_FILE), &data)?;
        Ok(())
    }
}

/// Writes `data` to `path` so that readers see either the old or new
/// contents, never a torn file.
///
/// The data goes to a sibling temp file which is fsynced, renamed over
/// `path`, and the parent directory is then fsynced.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_directory(parent)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_directory_has_no_state() {
        let temp = tempdir().unwrap();
        let journal = QueueJournal::open(&temp.path().join("queue")).unwrap();
        assert!(journal.load().unwrap().is_none());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _journal = QueueJournal::open(temp.path()).unwrap();
        assert!(matches!(
            QueueJournal::open(temp.path()),
            Err(QueueError::Locked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _journal = QueueJournal::open(temp.path()).unwrap();
        }
        QueueJournal::open(temp.path()).unwrap();
    }

    #[test]
    fn save_then_load() {
        let temp = tempdir().unwrap();
        let journal = QueueJournal::open(temp.path()).unwrap();

        journal.save(42, Vec::new()).unwrap();
        let state = journal.load().unwrap().unwrap();

        assert_eq!(state.next_entry_id, 42);
        assert!(state.entries.is_empty());
        assert!(!temp.path().join("queue.cbor.tmp").exists());
    }

    #[test]
    fn corrupt_journal_is_reported() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(JOURNAL_FILE), [0xff, 0xfe, 0x01]).unwrap();
        let journal = QueueJournal::open(temp.path()).unwrap();
        assert!(matches!(journal.load(), Err(QueueError::Codec(_))));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("watermark");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
