//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoopEventSink, ProgressTracker, SyncEvent, SyncEventSink};
use crate::remote::{blob_key, item_key, parse_item_key, RemoteError, RemoteObjectStore};
use crate::repository::{LocalItemRepository, RepositoryError};
use crate::status::{SyncStatus, SyncStatusReport, TriggerResponse};
use crate::vault::{CredentialVault, StaticCredentialVault};
use crate::watermark::{self, MemoryWatermarkStore, WatermarkStore};
use parking_lot::{Mutex, RwLock};
use shelfsync_blobstore::{BlobError, BlobHash, CleanupReport, ContentBlobStore};
use shelfsync_protocol::{
    ConflictLog, ConflictRecord, ConflictResolver, FailOutcome, Item, ItemId, ItemSnapshot,
    Operation, Resolution, SyncQueue, SyncQueueEntry, Timestamp, Winner,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
///
/// ```text
/// Idle ──▶ Running ──▶ Completed ─┐
///            ▲    └──▶ Failed ────┤
///            └────────────────────┘
/// ```
///
/// `Completed` and `Failed` are resting states: both accept a new cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle has run yet.
    Idle,
    /// A cycle holds the single-flight lock.
    Running,
    /// The last cycle succeeded.
    Completed,
    /// The last cycle failed or was cancelled.
    Failed,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_running(&self) -> bool {
        matches!(self, SyncState::Running)
    }

    /// Returns true if the engine can start a new cycle.
    pub fn can_start_sync(&self) -> bool {
        !self.is_running()
    }
}

/// A per-item failure recorded during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Item that failed.
    pub item_id: ItemId,
    /// Queue entry involved, if the failure was on the push side.
    pub entry_id: Option<u64>,
    /// Stable error code.
    pub error_code: String,
    /// Human-readable message.
    pub message: String,
}

impl ItemFailure {
    fn new(item_id: ItemId, entry_id: Option<u64>, error: &SyncError) -> Self {
        Self {
            item_id,
            entry_id,
            error_code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncCycleResult {
    /// Queue entries propagated to the remote store.
    pub uploaded_count: usize,
    /// Remote changes applied without conflict.
    pub downloaded_count: usize,
    /// Conflicts resolved during the cycle.
    pub conflicts: Vec<ConflictRecord>,
    /// Duration of the cycle.
    pub duration: Duration,
    /// Items that failed this cycle.
    pub failed: Vec<ItemFailure>,
    /// Entries that crossed the retry ceiling this cycle.
    pub dead_letters: Vec<ItemFailure>,
}

impl SyncCycleResult {
    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct RemoteChange {
    listed_at: Timestamp,
    snapshot: ItemSnapshot,
}

/// The sync engine reconciles the local repository with a remote store.
///
/// # Invariants
///
/// - At most one cycle runs at a time
/// - A remote change is resolved against any unsynced local change before
///   the local change is uploaded, so newer remote state is never blindly
///   overwritten
/// - The watermark only moves past fully applied remote changes
/// - No queue entry is left InFlight when a cycle returns
pub struct SyncEngine<R: RemoteObjectStore, L: LocalItemRepository> {
    config: SyncConfig,
    remote: Arc<R>,
    repository: Arc<L>,
    blobs: Arc<ContentBlobStore>,
    queue: Arc<SyncQueue>,
    vault: Arc<dyn CredentialVault>,
    watermark: Arc<dyn WatermarkStore>,
    events: Arc<dyn SyncEventSink>,
    resolver: ConflictResolver,
    conflicts: ConflictLog,
    cycle_lock: Mutex<()>,
    state: RwLock<SyncState>,
    last_sync: RwLock<Option<Timestamp>>,
    consecutive_failures: AtomicU32,
    /// Blobs known to exist remotely.
    remote_blobs: RwLock<HashSet<BlobHash>>,
}

impl<R: RemoteObjectStore, L: LocalItemRepository> SyncEngine<R, L> {
    /// Creates a new sync engine.
    ///
    /// The engine starts unconfigured, with an in-memory watermark and no
    /// event sink; see the `with_*` methods.
    pub fn new(
        config: SyncConfig,
        remote: Arc<R>,
        repository: Arc<L>,
        blobs: Arc<ContentBlobStore>,
        queue: Arc<SyncQueue>,
    ) -> Self {
        Self {
            config,
            remote,
            repository,
            blobs,
            queue,
            vault: Arc::new(StaticCredentialVault::empty()),
            watermark: Arc::new(MemoryWatermarkStore::new()),
            events: Arc::new(NoopEventSink),
            resolver: ConflictResolver::new(),
            conflicts: ConflictLog::new(),
            cycle_lock: Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
            last_sync: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            remote_blobs: RwLock::new(HashSet::new()),
        }
    }

    /// Sets the credential source.
    pub fn with_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = vault;
        self
    }

    /// Sets the watermark store.
    pub fn with_watermark_store(mut self, watermark: Arc<dyn WatermarkStore>) -> Self {
        self.watermark = watermark;
        self
    }

    /// Sets the event sink.
    pub fn with_event_sink(mut self, events: Arc<dyn SyncEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the sync queue.
    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Gets the blob store.
    pub fn blob_store(&self) -> &Arc<ContentBlobStore> {
        &self.blobs
    }

    /// Gets the local repository.
    pub fn repository(&self) -> &Arc<L> {
        &self.repository
    }

    /// Gets the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Gets the conflict audit log.
    pub fn conflict_log(&self) -> &ConflictLog {
        &self.conflicts
    }

    /// Runs one cycle, waiting for any running cycle to finish first.
    pub fn sync(&self, ctx: &SyncContext) -> SyncResult<SyncCycleResult> {
        let _guard = self.cycle_lock.lock();
        self.run_locked(ctx)
    }

    /// Runs one cycle, or fails with `AlreadyRunning` if one is in progress.
    pub fn try_sync(&self, ctx: &SyncContext) -> SyncResult<SyncCycleResult> {
        let Some(_guard) = self.cycle_lock.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };
        self.run_locked(ctx)
    }

    /// Runs one cycle on behalf of the API layer.
    pub fn trigger(&self, ctx: &SyncContext) -> SyncResult<TriggerResponse> {
        self.try_sync(ctx).map(|result| TriggerResponse::from(&result))
    }

    /// Reports the engine status.
    pub fn status(&self) -> SyncStatusReport {
        let queue_stats = self.queue.stats();
        let status = match self.state() {
            SyncState::Running => SyncStatus::Syncing,
            SyncState::Failed => SyncStatus::Failed,
            SyncState::Idle | SyncState::Completed => SyncStatus::Idle,
        };
        SyncStatusReport {
            status,
            last_sync: *self.last_sync.read(),
            pending_changes: queue_stats.pending + queue_stats.in_flight + queue_stats.failed,
            queue_stats,
            configured: self.vault.credentials().is_some(),
        }
    }

    /// Overrides the latest automatic resolution for an item.
    ///
    /// Choosing `Local` re-stamps the local item so it wins on every device
    /// and queues it for upload. Choosing `Remote` applies the current remote
    /// snapshot and drops any pending local change.
    pub fn resolve_manually(&self, item_id: &ItemId, choice: Winner) -> SyncResult<ConflictRecord> {
        let _guard = self.cycle_lock.lock();

        let previous = self
            .conflicts
            .latest_for(item_id)
            .ok_or_else(|| SyncError::NotFound(format!("no conflict recorded for {item_id}")))?;
        let local = self
            .repository
            .get(item_id)?
            .ok_or_else(|| RepositoryError::NotFound(item_id.clone()))?;

        let record = match choice {
            Winner::Local => {
                let stamp = Timestamp::now()
                    .max(previous.remote_updated_at.saturating_add(Duration::from_millis(1)));
                let promoted = Item {
                    version: local.version + 1,
                    updated_at: stamp,
                    ..local.clone()
                };
                self.repository.update(promoted, Some(local.version))?;
                self.queue.enqueue(item_id.clone(), Operation::Update)?;
                ConflictRecord::manual(
                    item_id.clone(),
                    local.updated_at,
                    previous.remote_updated_at,
                    Winner::Local,
                )
            }
            Winner::Remote => {
                self.connect()?;
                let snapshot = self
                    .fetch_snapshot(&item_key(item_id))?
                    .ok_or_else(|| SyncError::NotFound(item_key(item_id)))?;
                if !snapshot.same_state_as(&local) {
                    self.write_local(Some(&local), &snapshot)?;
                }
                self.queue.supersede(item_id)?;
                ConflictRecord::manual(
                    item_id.clone(),
                    local.updated_at,
                    snapshot.updated_at,
                    Winner::Remote,
                )
            }
        };

        info!(item_id = %item_id, winner = ?choice, "conflict resolved manually");
        self.conflicts.append(record.clone());
        self.events.on_event(&SyncEvent::ConflictDetected {
            conflicts: vec![record.clone()],
            resolution_policy: Resolution::Manual.as_str().to_string(),
        });
        Ok(record)
    }

    /// Deletes local blobs no live item references.
    pub fn collect_garbage(&self) -> SyncResult<CleanupReport> {
        let _guard = self.cycle_lock.lock();

        let reachable: HashSet<BlobHash> = self
            .repository
            .list()?
            .into_iter()
            .filter(|item| !item.is_deleted)
            .filter_map(|item| item.content_hash)
            .collect();

        let report = self.blobs.cleanup(&reachable)?;
        info!(
            reachable = reachable.len(),
            removed = report.removed_count,
            freed_bytes = report.freed_bytes,
            "blob garbage collection finished"
        );
        Ok(report)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn connect(&self) -> SyncResult<()> {
        let credentials = self.vault.credentials().ok_or(SyncError::NotConfigured)?;
        self.remote.connect(&credentials)?;
        Ok(())
    }

    /// Runs a cycle with the single-flight lock held.
    fn run_locked(&self, ctx: &SyncContext) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.set_state(SyncState::Running);
        self.events.on_event(&SyncEvent::Started);
        info!(device = %self.config.device_id, "sync cycle started");

        let mut result = SyncCycleResult::default();
        let outcome = self.run_cycle(ctx, &mut result);
        result.duration = start.elapsed();

        if let Err(e) = self.queue.compact() {
            warn!(error = %e, "queue compaction failed");
        }

        if !result.conflicts.is_empty() {
            self.events.on_event(&SyncEvent::ConflictDetected {
                conflicts: result.conflicts.clone(),
                resolution_policy: Resolution::LastWriteWins.as_str().to_string(),
            });
        }

        match outcome {
            Ok(()) => {
                self.set_state(SyncState::Completed);
                *self.last_sync.write() = Some(Timestamp::now());
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.events.on_event(&SyncEvent::Completed {
                    uploaded: result.uploaded_count,
                    downloaded: result.downloaded_count,
                    duration: result.duration,
                });
                info!(
                    uploaded = result.uploaded_count,
                    downloaded = result.downloaded_count,
                    conflicts = result.conflicts.len(),
                    failed = result.failed.len(),
                    duration_ms = result.duration.as_millis() as u64,
                    "sync cycle completed"
                );
                Ok(result)
            }
            Err(err) => {
                match self.queue.release_all() {
                    Ok(0) => {}
                    Ok(released) => debug!(released, "returned in-flight entries to pending"),
                    Err(e) => warn!(error = %e, "failed to release in-flight entries"),
                }

                let (err, retry_after) = match err {
                    SyncError::Cancelled { .. } => (
                        SyncError::Cancelled {
                            partial: Box::new(result),
                        },
                        Some(Duration::ZERO),
                    ),
                    other => {
                        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        let retry_after = other.is_retryable().then(|| {
                            other
                                .retry_after()
                                .unwrap_or(Duration::ZERO)
                                .max(self.config.retry.delay_for_attempt(failures))
                        });
                        (other, retry_after)
                    }
                };

                self.set_state(SyncState::Failed);
                self.events.on_event(&SyncEvent::Failed {
                    error_code: err.error_code().to_string(),
                    retryable: err.is_retryable(),
                    retry_after_seconds: retry_after.map(ceil_secs),
                });
                warn!(error = %err, code = err.error_code(), "sync cycle failed");
                Err(err)
            }
        }
    }

    fn run_cycle(&self, ctx: &SyncContext, result: &mut SyncCycleResult) -> SyncResult<()> {
        self.connect()?;

        let watermark = self.watermark.load()?;
        let claimed = self.queue.claim(self.config.batch_size)?;
        debug!(claimed = claimed.len(), %watermark, "claimed queue entries");

        let mut ledger = Vec::new();
        let mut unreadable = HashSet::new();
        let changes = self.fetch_remote_changes(watermark, &mut ledger, &mut unreadable, result)?;

        // local changes to items whose remote state is unknown wait for a later cycle
        let (blocked, claimed): (Vec<_>, Vec<_>) = claimed
            .into_iter()
            .partition(|entry| unreadable.contains(&entry.item_id));
        if !blocked.is_empty() {
            let ids: Vec<u64> = blocked.iter().map(|entry| entry.entry_id).collect();
            self.queue.release(&ids)?;
        }

        let remote_items: HashSet<&ItemId> = changes.iter().map(|c| &c.snapshot.id).collect();
        let (overlapping, uploads): (Vec<_>, Vec<_>) = claimed
            .into_iter()
            .partition(|entry| remote_items.contains(&entry.item_id));

        let progress = ProgressTracker::new(
            self.events.as_ref(),
            uploads.len() + changes.len(),
            self.config.progress_step,
        );

        let mut abort = self.push_entries(ctx, &uploads, &progress, result).err();

        let mut overlapping: HashMap<ItemId, SyncQueueEntry> = overlapping
            .into_iter()
            .map(|entry| (entry.item_id.clone(), entry))
            .collect();

        for change in changes {
            if abort.is_none() && ctx.is_cancelled() {
                abort = Some(SyncError::cancelled());
            }
            if abort.is_some() {
                ledger.push((change.listed_at, false));
                continue;
            }

            let item_id = change.snapshot.id.clone();
            let claimed = overlapping.remove(&item_id);
            match self.apply_remote_change(&change.snapshot, claimed.as_ref(), result) {
                Ok(()) => ledger.push((change.listed_at, true)),
                Err(e) => {
                    // a blob that is gone remotely will not come back; move past it
                    let consumed = matches!(
                        e,
                        SyncError::NotFound(_) | SyncError::Blob(BlobError::NotFound(_))
                    );
                    ledger.push((change.listed_at, consumed));
                    if let Some(entry) = &claimed {
                        self.queue.release(&[entry.entry_id])?;
                    }
                    if e.is_cycle_fatal() {
                        abort = Some(e);
                    } else {
                        warn!(item_id = %item_id, error = %e, "failed to apply remote change");
                        result
                            .failed
                            .push(ItemFailure::new(item_id.clone(), None, &e));
                    }
                }
            }
            progress.advance(Some(&item_id));
        }

        let next = watermark::advance(watermark, &ledger);
        if next > watermark {
            self.watermark.save(next)?;
            debug!(from = %watermark, to = %next, "watermark advanced");
        }

        match abort {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Lists and decodes remote item changes since `since`, oldest first.
    ///
    /// Objects that need no local application go straight into `ledger` as
    /// applied: non-item keys, items that vanished after listing, malformed
    /// items, and items this device wrote itself.
    ///
    /// Items that cannot be read are reported, held below the watermark and
    /// collected in `unreadable`. Only network and cycle-fatal errors abort.
    fn fetch_remote_changes(
        &self,
        since: Timestamp,
        ledger: &mut Vec<(Timestamp, bool)>,
        unreadable: &mut HashSet<ItemId>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<Vec<RemoteChange>> {
        let listing = self.remote.list(since)?;
        let mut changes = Vec::new();

        for object in listing {
            let Some(item_id) = parse_item_key(&object.key) else {
                ledger.push((object.updated_at, true));
                continue;
            };

            match self.fetch_snapshot(&object.key) {
                Ok(Some(snapshot)) if snapshot.origin.as_deref() == Some(&self.config.device_id) => {
                    // our own upload; nothing newer has replaced it
                    ledger.push((object.updated_at, true));
                }
                Ok(Some(snapshot)) if snapshot.id == item_id => changes.push(RemoteChange {
                    listed_at: object.updated_at,
                    snapshot,
                }),
                Ok(None) => ledger.push((object.updated_at, true)),
                Ok(Some(_)) | Err(SyncError::Codec(_)) => {
                    warn!(key = %object.key, "skipping malformed remote item");
                    let err = SyncError::Remote(format!("malformed object at {}", object.key));
                    result.failed.push(ItemFailure::new(item_id, None, &err));
                    ledger.push((object.updated_at, true));
                }
                Err(e) if e.is_cycle_fatal() || matches!(e, SyncError::Network { .. }) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e, "failed to fetch remote item");
                    result.failed.push(ItemFailure::new(item_id.clone(), None, &e));
                    unreadable.insert(item_id);
                    ledger.push((object.updated_at, false));
                }
            }
        }

        changes.sort_by_key(|change| change.listed_at);
        Ok(changes)
    }

    fn fetch_snapshot(&self, key: &str) -> SyncResult<Option<ItemSnapshot>> {
        match self.remote.get(key) {
            Ok(bytes) => Ok(Some(ItemSnapshot::decode(&bytes)?)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Uploads claimed entries on a bounded pool of scoped worker threads.
    fn push_entries(
        &self,
        ctx: &SyncContext,
        entries: &[SyncQueueEntry],
        progress: &ProgressTracker<'_>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let outcomes = Mutex::new(Vec::with_capacity(entries.len()));
        let workers = self.config.upload_workers.min(entries.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if stop.load(Ordering::SeqCst) || ctx.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(entry) = entries.get(index) else {
                        break;
                    };
                    let outcome = self.push_item(entry);
                    if matches!(&outcome, Err(e) if e.is_cycle_fatal()) {
                        stop.store(true, Ordering::SeqCst);
                    }
                    progress.advance(Some(&entry.item_id));
                    outcomes.lock().push((index, outcome));
                });
            }
        });

        let mut outcomes = outcomes.into_inner();
        outcomes.sort_by_key(|(index, _)| *index);
        let processed = outcomes.len();
        let mut fatal = None;

        for (index, outcome) in outcomes {
            let Some(entry) = entries.get(index) else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    self.queue.complete(entry.entry_id)?;
                    result.uploaded_count += 1;
                }
                Err(e) if e.is_cycle_fatal() => {
                    fatal.get_or_insert(e);
                }
                Err(e) => self.record_push_failure(entry, &e, result)?,
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if processed < entries.len() {
            return Err(SyncError::cancelled());
        }
        Ok(())
    }

    /// Uploads an item's blob (if needed) and its snapshot.
    fn push_item(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        let item = match self.repository.get(&entry.item_id)? {
            Some(item) => item,
            None if entry.operation.is_delete() => Item {
                id: entry.item_id.clone(),
                version: 0,
                updated_at: entry.enqueued_at,
                content_hash: None,
                is_deleted: true,
            },
            None => return Err(RepositoryError::NotFound(entry.item_id.clone()).into()),
        };

        if !item.is_deleted {
            if let Some(hash) = &item.content_hash {
                self.upload_blob(hash)?;
            }
        }

        let snapshot = item.snapshot().with_origin(self.config.device_id.clone());
        self.remote.put(&item_key(&item.id), &snapshot.encode()?)?;
        debug!(item_id = %item.id, version = item.version, deleted = item.is_deleted, "pushed item");
        Ok(())
    }

    fn upload_blob(&self, hash: &BlobHash) -> SyncResult<()> {
        if self.remote_blobs.read().contains(hash) {
            return Ok(());
        }
        let bytes = self.blobs.read(hash)?;
        self.remote.put(&blob_key(hash), &bytes)?;
        self.remote_blobs.write().insert(hash.clone());
        debug!(hash = %hash, size = bytes.len(), "uploaded blob");
        Ok(())
    }

    fn record_push_failure(
        &self,
        entry: &SyncQueueEntry,
        error: &SyncError,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let failure = ItemFailure::new(entry.item_id.clone(), Some(entry.entry_id), error);
        match self.queue.fail(entry.entry_id, error.to_string())? {
            FailOutcome::Retrying { attempts, .. } => {
                warn!(item_id = %entry.item_id, attempts, error = %error, "upload failed, will retry");
            }
            FailOutcome::Dead { attempts } => {
                warn!(item_id = %entry.item_id, attempts, error = %error, "upload failed permanently");
                result.dead_letters.push(failure.clone());
            }
        }
        result.failed.push(failure);
        Ok(())
    }

    /// Applies one remote change, resolving it against any local change.
    fn apply_remote_change(
        &self,
        snapshot: &ItemSnapshot,
        claimed: Option<&SyncQueueEntry>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let item_id = &snapshot.id;
        let local = self.repository.get(item_id)?;

        if local.as_ref().is_some_and(|l| snapshot.same_state_as(l)) {
            debug!(item_id = %item_id, "remote state already present locally");
            if let Some(entry) = claimed {
                self.queue.complete(entry.entry_id)?;
            }
            return Ok(());
        }

        let has_local_change = claimed.is_some() || self.queue.has_unsynced(item_id);

        let local = match local {
            Some(local) if has_local_change => local,
            other => {
                self.write_local(other.as_ref(), snapshot)?;
                if has_local_change {
                    self.retire_local_change(item_id, claimed)?;
                }
                result.downloaded_count += 1;
                return Ok(());
            }
        };

        let (winner, record) = self.resolver.resolve(&local, snapshot);
        match winner {
            Winner::Remote => {
                self.write_local(Some(&local), snapshot)?;
                self.retire_local_change(item_id, claimed)?;
            }
            Winner::Local => {
                if let Some(entry) = claimed {
                    match self.push_item(entry) {
                        Ok(()) => {
                            self.queue.complete(entry.entry_id)?;
                            result.uploaded_count += 1;
                        }
                        Err(e) if e.is_cycle_fatal() => return Err(e),
                        Err(e) => self.record_push_failure(entry, &e, result)?,
                    }
                }
            }
        }

        info!(
            item_id = %item_id,
            winner = ?winner,
            local_updated_at = %record.local_updated_at,
            remote_updated_at = %record.remote_updated_at,
            "conflict resolved"
        );
        self.conflicts.append(record.clone());
        result.conflicts.push(record);
        Ok(())
    }

    fn retire_local_change(&self, item_id: &ItemId, claimed: Option<&SyncQueueEntry>) -> SyncResult<()> {
        match claimed {
            Some(entry) => self.queue.complete(entry.entry_id)?,
            None => {
                self.queue.supersede(item_id)?;
            }
        }
        Ok(())
    }

    /// Makes the local item reflect a remote snapshot.
    fn write_local(&self, local: Option<&Item>, snapshot: &ItemSnapshot) -> SyncResult<Item> {
        if let Some(local) = local.filter(|l| snapshot.is_deleted && !l.is_deleted) {
            return Ok(self
                .repository
                .mark_deleted(&local.id, snapshot.updated_at, local.version)?);
        }

        if !snapshot.is_deleted {
            if let Some(hash) = &snapshot.content_hash {
                self.fetch_blob(hash)?;
            }
        }

        let item = Item {
            id: snapshot.id.clone(),
            version: local.map_or(snapshot.version, |l| l.version + 1),
            updated_at: snapshot.updated_at,
            content_hash: snapshot.content_hash.clone(),
            is_deleted: snapshot.is_deleted,
        };
        Ok(self.repository.update(item, local.map(|l| l.version))?)
    }

    /// Ensures a blob referenced by a remote snapshot is present locally.
    fn fetch_blob(&self, hash: &BlobHash) -> SyncResult<()> {
        if self.blobs.exists(hash) {
            return Ok(());
        }

        let bytes = self.remote.get(&blob_key(hash))?;
        let stored = self.blobs.store(&bytes)?;
        if &stored.hash != hash {
            if !stored.deduplicated {
                self.blobs.delete(&stored.hash)?;
            }
            return Err(BlobError::IntegrityMismatch {
                expected: hash.clone(),
                actual: stored.hash,
            }
            .into());
        }

        self.remote_blobs.write().insert(hash.clone());
        debug!(hash = %hash, size = stored.size, "downloaded blob");
        Ok(())
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
