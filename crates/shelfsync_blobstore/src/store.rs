//! Content-addressed blob store on the local filesystem.
//!
//! Layout:
//!
//! ```text
//! <root>/
//! ├─ .tmp/                 # private staging area for in-progress writes
//! ├─ ab/
//! │  └─ ab31…              # file named by its full SHA-256 digest
//! └─ e3/
//!    └─ e3b0…
//! ```
//!
//! The content at `<shard>/<hash>` always hashes to `<hash>`, so readers and
//! concurrent writers need no locking: a write stages bytes in `.tmp`,
//! then renames into place without clobbering. Losing that race means the
//! identical bytes are already there, which counts as success.

use crate::config::BlobStoreConfig;
use crate::error::{BlobError, BlobResult};
use crate::hash::{BlobHash, SHARD_LEN};
use crate::stats::{BlobStats, CleanupReport, StoredBlob};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Prefix for staged temp files.
const TEMP_PREFIX: &str = "blob-";

/// Attempts at renaming into a shard that a concurrent cleanup may remove.
const PERSIST_ATTEMPTS: usize = 3;

/// A deduplicating, content-addressed blob store.
///
/// # Thread Safety
///
/// All operations take `&self` and may run concurrently, including
/// concurrent stores of the same bytes. The store never tracks reference
/// counts; unreferenced blobs are only removed by [`ContentBlobStore::cleanup`].
///
/// # Example
///
/// ```no_run
/// use shelfsync_blobstore::ContentBlobStore;
///
/// let store = ContentBlobStore::open("library/blobs").unwrap();
/// let stored = store.store(b"a payload of at least sixteen bytes").unwrap();
/// assert!(store.exists(&stored.hash));
/// ```
#[derive(Debug)]
pub struct ContentBlobStore {
    root: PathBuf,
    config: BlobStoreConfig,
}

impl ContentBlobStore {
    /// Opens or creates a blob store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl AsRef<Path>) -> BlobResult<Self> {
        Self::open_with_config(root, BlobStoreConfig::default())
    }

    /// Opens or creates a blob store with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open_with_config(root: impl AsRef<Path>, config: BlobStoreConfig) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(&config.temp_dir_name))?;
        Ok(Self { root, config })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    /// Returns the on-disk path for a hash.
    #[must_use]
    pub fn path_for(&self, hash: &BlobHash) -> PathBuf {
        self.root.join(hash.shard()).join(hash.as_str())
    }

    /// Stores a payload and returns its hash.
    ///
    /// Storing bytes that are already present is a no-op.
    ///
    /// # Errors
    ///
    /// - `EmptyContent` for an empty payload
    /// - `TooSmall` for payloads under the configured minimum
    /// - `Io` if staging or renaming fails
    pub fn store(&self, data: &[u8]) -> BlobResult<StoredBlob> {
        self.check_size(data.len() as u64)?;

        let hash = BlobHash::of(data);
        let size = data.len() as u64;
        if self.path_for(&hash).exists() {
            debug!(hash = %hash, size, "blob already present");
            return Ok(StoredBlob {
                hash,
                size,
                deduplicated: true,
            });
        }

        let mut temp = self.stage()?;
        temp.write_all(data)?;
        self.persist(temp, hash, size)
    }

    /// Stores a payload read from a stream.
    ///
    /// The digest is computed while copying. `cancel` is checked between
    /// chunks; a cancelled write leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Same as [`ContentBlobStore::store`], plus `Cancelled`.
    pub fn store_reader<R: Read>(&self, mut reader: R, cancel: &AtomicBool) -> BlobResult<StoredBlob> {
        let mut temp = self.stage()?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut size = 0u64;

        loop {
            if cancel.load(Ordering::SeqCst) {
                debug!(bytes_read = size, "blob write cancelled");
                return Err(BlobError::Cancelled);
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buffer[..read]);
            temp.write_all(&buffer[..read])?;
            size += read as u64;
        }

        self.check_size(size)?;
        let hash = BlobHash::from_digest(hasher.finalize().into());
        self.persist(temp, hash, size)
    }

    /// Opens a stored blob for reading.
    ///
    /// # Errors
    ///
    /// - `InvalidHash` if `hash` is not a 64-character hex digest
    /// - `NotFound` if no blob is stored under it
    pub fn retrieve(&self, hash: impl AsRef<str>) -> BlobResult<File> {
        let hash = BlobHash::parse(hash.as_ref())?;
        match File::open(self.path_for(&hash)) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(hash)),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a stored blob fully into memory.
    ///
    /// # Errors
    ///
    /// Same as [`ContentBlobStore::retrieve`].
    pub fn read(&self, hash: impl AsRef<str>) -> BlobResult<Vec<u8>> {
        let mut file = self.retrieve(hash)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Returns true if a blob is stored under `hash`.
    ///
    /// Malformed hashes are never present.
    pub fn exists(&self, hash: impl AsRef<str>) -> bool {
        BlobHash::parse(hash.as_ref())
            .map(|hash| self.path_for(&hash).is_file())
            .unwrap_or(false)
    }

    /// Deletes a blob. Deleting an absent blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHash` for malformed hashes, or `Io` if removal fails.
    pub fn delete(&self, hash: impl AsRef<str>) -> BlobResult<()> {
        let hash = BlobHash::parse(hash.as_ref())?;
        match fs::remove_file(self.path_for(&hash)) {
            Ok(()) => {
                debug!(hash = %hash, "blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-hashes a stored blob and checks it still matches its name.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityMismatch` if the bytes were altered on disk.
    pub fn verify(&self, hash: impl AsRef<str>) -> BlobResult<()> {
        let expected = BlobHash::parse(hash.as_ref())?;
        let mut file = self.retrieve(&expected)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        let actual = BlobHash::from_digest(hasher.finalize().into());

        if actual == expected {
            Ok(())
        } else {
            warn!(expected = %expected, actual = %actual, "blob failed integrity check");
            Err(BlobError::IntegrityMismatch { expected, actual })
        }
    }

    /// Lists every stored blob hash in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory scan fails.
    pub fn list(&self) -> BlobResult<Vec<BlobHash>> {
        let mut hashes = Vec::new();
        for shard in self.shard_dirs()? {
            for (hash, _) in Self::blobs_in(&shard)? {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Scans the whole store.
    ///
    /// Intended for observability; the cost is a full directory walk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory scan fails.
    pub fn stats(&self) -> BlobResult<BlobStats> {
        let mut stats = BlobStats::default();
        for shard in self.shard_dirs()? {
            let blobs = Self::blobs_in(&shard)?;
            if blobs.is_empty() {
                continue;
            }
            let name = shard_name(&shard);
            for (_, size) in &blobs {
                stats.total_files += 1;
                stats.total_size += size;
            }
            stats.per_shard_counts.insert(name, blobs.len() as u64);
        }
        Ok(stats)
    }

    /// Deletes every blob whose hash is not in `reachable`.
    ///
    /// The caller must pass the complete reachable set: anything missing
    /// from it is removed. Shard directories left empty are removed too.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory scan or a removal fails.
    pub fn cleanup(&self, reachable: &HashSet<BlobHash>) -> BlobResult<CleanupReport> {
        let mut report = CleanupReport::default();

        for shard in self.shard_dirs()? {
            for (hash, size) in Self::blobs_in(&shard)? {
                if reachable.contains(&hash) {
                    continue;
                }
                match fs::remove_file(shard.join(hash.as_str())) {
                    Ok(()) => {
                        report.removed_count += 1;
                        report.freed_bytes += size;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }

            if fs::read_dir(&shard)?.next().is_none() {
                // A concurrent store may repopulate the shard; losing that race is fine.
                match fs::remove_dir(&shard) {
                    Ok(()) => report.shards_removed += 1,
                    Err(e) => debug!(shard = %shard.display(), error = %e, "shard not removed"),
                }
            }
        }

        if report.removed_count > 0 {
            self.sync_directory(&self.root)?;
        }
        info!(
            removed = report.removed_count,
            freed_bytes = report.freed_bytes,
            shards_removed = report.shards_removed,
            "blob cleanup finished"
        );
        Ok(report)
    }

    fn check_size(&self, size: u64) -> BlobResult<()> {
        if size == 0 {
            return Err(BlobError::EmptyContent);
        }
        if size < self.config.min_size {
            return Err(BlobError::TooSmall {
                size,
                min: self.config.min_size,
            });
        }
        Ok(())
    }

    /// Creates a temp file in the staging directory.
    ///
    /// The file is removed when dropped unless it is persisted.
    fn stage(&self) -> BlobResult<NamedTempFile> {
        let temp_dir = self.root.join(&self.config.temp_dir_name);
        fs::create_dir_all(&temp_dir)?;
        Ok(tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(temp_dir)?)
    }

    /// Moves a staged file to its content-addressed path.
    fn persist(&self, mut temp: NamedTempFile, hash: BlobHash, size: u64) -> BlobResult<StoredBlob> {
        let dest = self.path_for(&hash);
        let shard_dir = self.root.join(hash.shard());

        if self.config.sync_writes {
            temp.as_file().sync_all()?;
        }

        for attempt in 1..=PERSIST_ATTEMPTS {
            fs::create_dir_all(&shard_dir)?;
            match temp.persist_noclobber(&dest) {
                Ok(_) => {
                    self.sync_directory(&shard_dir)?;
                    debug!(hash = %hash, size, "blob stored");
                    return Ok(StoredBlob {
                        hash,
                        size,
                        deduplicated: false,
                    });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(hash = %hash, size, "blob written concurrently");
                    return Ok(StoredBlob {
                        hash,
                        size,
                        deduplicated: true,
                    });
                }
                Err(e) if e.error.kind() == io::ErrorKind::NotFound && attempt < PERSIST_ATTEMPTS => {
                    // Shard removed by a concurrent cleanup between create and rename.
                    temp = e.file;
                }
                Err(e) => return Err(BlobError::Io(e.error)),
            }
        }

        Err(BlobError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("could not persist blob {hash}"),
        )))
    }

    /// Returns every shard directory under the root.
    fn shard_dirs(&self) -> BlobResult<Vec<PathBuf>> {
        let mut shards = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_shard_name(name) && name != self.config.temp_dir_name {
                shards.push(entry.path());
            }
        }
        shards.sort();
        Ok(shards)
    }

    /// Returns the well-formed blobs in a shard with their sizes.
    fn blobs_in(shard: &Path) -> BlobResult<Vec<(BlobHash, u64)>> {
        let shard_name = shard_name(shard);
        let entries = match fs::read_dir(shard) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(hash) = BlobHash::parse(name) else {
                continue;
            };
            // Only lowercase names at the right shard are part of the layout.
            if hash.as_str() != name || hash.shard() != shard_name {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if metadata.is_file() {
                blobs.push((hash, metadata.len()));
            }
        }
        Ok(blobs)
    }

    /// Fsyncs a directory so renames and removals inside it are durable.
    #[cfg(unix)]
    fn sync_directory(&self, dir: &Path) -> BlobResult<()> {
        if self.config.sync_writes {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self, _dir: &Path) -> BlobResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

fn is_shard_name(name: &str) -> bool {
    name.len() == SHARD_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn shard_name(shard: &Path) -> String {
    shard
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TEMP_DIR;
    use tempfile::tempdir;

    fn payload(tag: &str) -> Vec<u8> {
        format!("payload-{tag}-padded-to-length").into_bytes()
    }

    #[test]
    fn store_and_read_back() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let data = payload("a");
        let stored = store.store(&data).unwrap();

        assert_eq!(stored.hash, BlobHash::of(&data));
        assert_eq!(stored.size, data.len() as u64);
        assert!(!stored.deduplicated);
        assert_eq!(store.read(&stored.hash).unwrap(), data);
    }

    #[test]
    fn layout_is_sharded_by_hash_prefix() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let stored = store.store(&payload("layout")).unwrap();
        let expected = dir
            .path()
            .join(&stored.hash.as_str()[..2])
            .join(stored.hash.as_str());

        assert_eq!(store.path_for(&stored.hash), expected);
        assert!(expected.is_file());
    }

    #[test]
    fn second_store_is_deduplicated() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let data = payload("dup");
        let first = store.store(&data).unwrap();
        let stats_after_first = store.stats().unwrap();
        let second = store.store(&data).unwrap();

        assert_eq!(first.hash, second.hash);
        assert!(second.deduplicated);
        assert_eq!(store.stats().unwrap(), stats_after_first);
    }

    #[test]
    fn size_boundaries() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        assert!(matches!(store.store(b""), Err(BlobError::EmptyContent)));
        for len in 1..=15 {
            let data = vec![7u8; len];
            assert!(matches!(
                store.store(&data),
                Err(BlobError::TooSmall { min: 16, .. })
            ));
        }
        assert!(store.store(&[7u8; 16]).is_ok());
    }

    #[test]
    fn rejected_stores_leave_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();
        let cancel = AtomicBool::new(false);

        let _ = store.store_reader(&b"short"[..], &cancel);
        let _ = store.store_reader(&b""[..], &cancel);

        let staged = fs::read_dir(dir.path().join(DEFAULT_TEMP_DIR)).unwrap().count();
        assert_eq!(staged, 0);
    }

    #[test]
    fn store_reader_matches_store() {
        let dir = tempdir().unwrap();
        let config = BlobStoreConfig::new().with_chunk_size(5);
        let store = ContentBlobStore::open_with_config(dir.path(), config).unwrap();
        let cancel = AtomicBool::new(false);

        let data = payload("stream");
        let streamed = store.store_reader(data.as_slice(), &cancel).unwrap();

        assert_eq!(streamed.hash, BlobHash::of(&data));
        assert_eq!(streamed.size, data.len() as u64);
        assert!(store.store(&data).unwrap().deduplicated);
    }

    #[test]
    fn cancelled_store_reader_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();
        let cancel = AtomicBool::new(true);

        let result = store.store_reader(payload("cancel").as_slice(), &cancel);

        assert!(matches!(result, Err(BlobError::Cancelled)));
        assert_eq!(store.stats().unwrap().total_files, 0);
        assert_eq!(fs::read_dir(dir.path().join(DEFAULT_TEMP_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn retrieve_validates_hash() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.retrieve("abc"),
            Err(BlobError::InvalidHash(_))
        ));

        let missing = BlobHash::of(b"never stored");
        assert!(matches!(
            store.retrieve(&missing),
            Err(BlobError::NotFound(hash)) if hash == missing
        ));
    }

    #[test]
    fn exists_and_idempotent_delete() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let stored = store.store(&payload("del")).unwrap();
        assert!(store.exists(&stored.hash));
        assert!(!store.exists("not-a-hash"));

        store.delete(&stored.hash).unwrap();
        assert!(!store.exists(&stored.hash));
        store.delete(&stored.hash).unwrap();
        assert!(store.delete("short").is_err());
    }

    #[test]
    fn verify_detects_tampering() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let stored = store.store(&payload("verify")).unwrap();
        store.verify(&stored.hash).unwrap();

        fs::write(store.path_for(&stored.hash), b"tampered content on disk").unwrap();
        assert!(matches!(
            store.verify(&stored.hash),
            Err(BlobError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn stats_counts_per_shard() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let mut expected_size = 0;
        for i in 0..10 {
            let data = payload(&i.to_string());
            expected_size += data.len() as u64;
            store.store(&data).unwrap();
        }
        fs::write(dir.path().join("README"), b"not a blob").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_files, 10);
        assert_eq!(stats.total_size, expected_size);
        assert_eq!(stats.per_shard_counts.values().sum::<u64>(), 10);
        assert_eq!(store.list().unwrap().len(), 10);
    }

    #[test]
    fn cleanup_removes_only_unreachable() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let keep = store.store(&payload("keep")).unwrap();
        let drop_a = store.store(&payload("drop-a")).unwrap();
        let drop_b = store.store(&payload("drop-bb")).unwrap();

        let reachable: HashSet<BlobHash> = [keep.hash.clone()].into_iter().collect();
        let report = store.cleanup(&reachable).unwrap();

        assert_eq!(report.removed_count, 2);
        assert_eq!(report.freed_bytes, drop_a.size + drop_b.size);
        assert!(store.exists(&keep.hash));
        assert!(!store.exists(&drop_a.hash));
        assert!(!store.exists(&drop_b.hash));
        assert_eq!(store.read(&keep.hash).unwrap(), payload("keep"));
    }

    #[test]
    fn cleanup_removes_empty_shards() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let stored = store.store(&payload("shard")).unwrap();
        let shard = dir.path().join(stored.hash.shard());
        assert!(shard.is_dir());

        let report = store.cleanup(&HashSet::new()).unwrap();
        assert_eq!(report.shards_removed, 1);
        assert!(!shard.exists());
        assert!(dir.path().join(DEFAULT_TEMP_DIR).is_dir());
    }

    #[test]
    fn custom_staging_directory_survives_cleanup() {
        let dir = tempdir().unwrap();
        // a two-hex-digit name would otherwise look like a shard
        let config = BlobStoreConfig::new().with_temp_dir_name("ab");
        let store = ContentBlobStore::open_with_config(dir.path(), config).unwrap();
        assert!(dir.path().join("ab").is_dir());
        assert!(!dir.path().join(DEFAULT_TEMP_DIR).exists());

        let stored = store.store(&payload("staged elsewhere")).unwrap();
        let report = store.cleanup(&HashSet::from([stored.hash.clone()])).unwrap();

        assert_eq!(report.removed_count, 0);
        assert!(dir.path().join("ab").is_dir());
        assert_eq!(store.list().unwrap(), vec![stored.hash]);
    }

    #[test]
    fn store_after_cleanup_recreates_shard() {
        let dir = tempdir().unwrap();
        let store = ContentBlobStore::open(dir.path()).unwrap();

        let data = payload("again");
        store.store(&data).unwrap();
        store.cleanup(&HashSet::new()).unwrap();

        let stored = store.store(&data).unwrap();
        assert!(!stored.deduplicated);
        assert!(store.exists(&stored.hash));
    }
}
