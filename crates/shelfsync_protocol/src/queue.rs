//! Durable queue of local mutations awaiting propagation.

use crate::error::{QueueError, QueueResult};
use crate::item::{ItemId, Timestamp};
use crate::journal::QueueJournal;
use crate::operation::Operation;
use crate::retry::RetryConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Lifecycle state of a queue entry.
///
/// ```text
/// Pending ──claim──▶ InFlight ──complete──▶ Done
///    ▲                  │
///    │ release          │ fail
///    └──────────────────┤
///          backoff      ▼
///    Failed ◀───────────┴──(ceiling)──▶ Dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a running cycle.
    InFlight,
    /// Failed at least once; claimable again after its backoff.
    Failed,
    /// Propagated, or replaced by a remote winner.
    Done,
    /// Exceeded the retry ceiling; needs operator attention.
    Dead,
}

impl EntryStatus {
    /// Returns true for states that count as the item's live entry.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            EntryStatus::Pending | EntryStatus::InFlight | EntryStatus::Failed
        )
    }

    /// Returns true for states no cycle will pick up again.
    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Queue-assigned identifier.
    pub entry_id: u64,
    /// Item the mutation applies to.
    pub item_id: ItemId,
    /// Effective (coalesced) mutation.
    pub operation: Operation,
    /// Time of the most recent coalesced mutation.
    pub enqueued_at: Timestamp,
    /// Failed propagation attempts so far.
    pub attempts: u32,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Lifecycle state.
    pub status: EntryStatus,
    /// Earliest time a failed entry may be claimed again.
    pub not_before: Option<Timestamp>,
    /// Mutation that arrived while the entry was in flight.
    #[serde(default)]
    pub pending_operation: Option<Operation>,
}

impl SyncQueueEntry {
    fn new(entry_id: u64, item_id: ItemId, operation: Operation, now: Timestamp) -> Self {
        Self {
            entry_id,
            item_id,
            operation,
            enqueued_at: now,
            attempts: 0,
            last_error: None,
            status: EntryStatus::Pending,
            not_before: None,
            pending_operation: None,
        }
    }

    /// Returns true if a claim at `now` would pick this entry.
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        match self.status {
            EntryStatus::Pending => true,
            EntryStatus::Failed => self.not_before.map_or(true, |t| now >= t),
            _ => false,
        }
    }

    /// Returns true if a newer mutation arrived while in flight.
    pub fn is_dirty(&self) -> bool {
        self.pending_operation.is_some()
    }

    /// Puts an in-flight entry back without counting an attempt.
    fn revert_to_pending(&mut self) {
        if let Some(next) = self.pending_operation.take() {
            self.operation = self.operation.coalesce(next);
        }
        self.status = EntryStatus::Pending;
    }
}

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries waiting to be claimed.
    pub pending: usize,
    /// Entries claimed by a running cycle.
    pub in_flight: usize,
    /// Entries waiting out a backoff.
    pub failed: usize,
    /// Entries past the retry ceiling.
    pub dead: usize,
}

impl QueueStats {
    /// Number of entries not yet propagated, dead ones included.
    pub fn unsynced(&self) -> usize {
        self.pending + self.in_flight + self.failed + self.dead
    }
}

/// What `fail` did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The entry will be retried.
    Retrying {
        /// Failed attempts so far.
        attempts: u32,
        /// Earliest time of the next claim.
        not_before: Timestamp,
    },
    /// The entry crossed the retry ceiling.
    Dead {
        /// Failed attempts so far.
        attempts: u32,
    },
}

struct QueueInner {
    entries: BTreeMap<u64, SyncQueueEntry>,
    /// item id -> entry id of its live entry
    live: HashMap<ItemId, u64>,
    next_entry_id: u64,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            live: HashMap::new(),
            next_entry_id: 1,
        }
    }

    fn entry_mut(&mut self, entry_id: u64) -> QueueResult<&mut SyncQueueEntry> {
        self.entries
            .get_mut(&entry_id)
            .ok_or(QueueError::UnknownEntry(entry_id))
    }

    fn in_flight_mut(&mut self, entry_id: u64, to: EntryStatus) -> QueueResult<&mut SyncQueueEntry> {
        let entry = self.entry_mut(entry_id)?;
        if entry.status != EntryStatus::InFlight {
            return Err(QueueError::invalid_transition(entry_id, entry.status, to));
        }
        Ok(entry)
    }

    fn dead_ids_for(&self, item_id: &ItemId) -> Vec<u64> {
        self.entries
            .values()
            .filter(|e| e.status == EntryStatus::Dead && &e.item_id == item_id)
            .map(|e| e.entry_id)
            .collect()
    }
}

/// Ordered record of local mutations awaiting propagation.
///
/// # Invariants
///
/// - At most one live (Pending, InFlight or Failed) entry per item; new
///   mutations coalesce into it
/// - An entry is handed to at most one claimer
/// - Claims are ordered by `enqueued_at`, then entry id
/// - A durable queue is rewritten to disk before any mutator returns
pub struct SyncQueue {
    inner: Mutex<QueueInner>,
    retry: RetryConfig,
    journal: Option<QueueJournal>,
}

impl SyncQueue {
    /// Creates a queue that lives only in memory.
    pub fn in_memory(retry: RetryConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            retry,
            journal: None,
        }
    }

    /// Opens or creates a durable queue in `dir`.
    ///
    /// Entries left InFlight by a crashed process are returned to Pending.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process owns the directory, or a codec
    /// error if the journal is unreadable.
    pub fn open(dir: impl AsRef<Path>, retry: RetryConfig) -> QueueResult<Self> {
        let journal = QueueJournal::open(dir.as_ref())?;
        let mut inner = QueueInner::new();
        let mut recovered = 0usize;

        if let Some(state) = journal.load()? {
            inner.next_entry_id = state.next_entry_id.max(1);
            for mut entry in state.entries {
                if entry.status == EntryStatus::InFlight {
                    entry.revert_to_pending();
                    recovered += 1;
                }
                if entry.status.is_live() {
                    inner.live.insert(entry.item_id.clone(), entry.entry_id);
                }
                inner.next_entry_id = inner.next_entry_id.max(entry.entry_id + 1);
                inner.entries.insert(entry.entry_id, entry);
            }
        }

        let queue = Self {
            inner: Mutex::new(inner),
            retry,
            journal: Some(journal),
        };
        if recovered > 0 {
            warn!(recovered, "returned interrupted queue entries to pending");
            queue.persist(&queue.inner.lock())?;
        }
        info!(entries = queue.len(), "sync queue opened");
        Ok(queue)
    }

    /// Returns the retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Records a local mutation.
    ///
    /// Returns the id of the entry now carrying the mutation.
    pub fn enqueue(&self, item_id: impl Into<ItemId>, operation: Operation) -> QueueResult<u64> {
        self.enqueue_at(item_id, operation, Timestamp::now())
    }

    /// Records a local mutation observed at `now`.
    pub fn enqueue_at(
        &self,
        item_id: impl Into<ItemId>,
        operation: Operation,
        now: Timestamp,
    ) -> QueueResult<u64> {
        let item_id = item_id.into();
        let mut inner = self.inner.lock();

        let entry_id = if let Some(&entry_id) = inner.live.get(&item_id) {
            let entry = inner.entry_mut(entry_id)?;
            if entry.status == EntryStatus::InFlight {
                entry.pending_operation = Some(
                    entry
                        .pending_operation
                        .map_or(operation, |prior| prior.coalesce(operation)),
                );
            } else {
                entry.operation = entry.operation.coalesce(operation);
                entry.enqueued_at = now;
            }
            debug!(item_id = %item_id, entry_id, op = ?operation, "coalesced mutation");
            entry_id
        } else {
            let entry_id = inner.next_entry_id;
            inner.next_entry_id += 1;
            inner.live.insert(item_id.clone(), entry_id);
            inner
                .entries
                .insert(entry_id, SyncQueueEntry::new(entry_id, item_id, operation, now));
            entry_id
        };

        self.persist(&inner)?;
        Ok(entry_id)
    }

    /// Claims up to `max_batch` entries for propagation.
    pub fn claim(&self, max_batch: usize) -> QueueResult<Vec<SyncQueueEntry>> {
        self.claim_at(max_batch, Timestamp::now())
    }

    /// Claims up to `max_batch` entries claimable at `now`.
    pub fn claim_at(&self, max_batch: usize, now: Timestamp) -> QueueResult<Vec<SyncQueueEntry>> {
        let mut inner = self.inner.lock();

        let mut ready: Vec<(Timestamp, u64)> = inner
            .entries
            .values()
            .filter(|e| e.is_claimable(now))
            .map(|e| (e.enqueued_at, e.entry_id))
            .collect();
        ready.sort_unstable();
        ready.truncate(max_batch);

        let mut claimed = Vec::with_capacity(ready.len());
        for (_, entry_id) in ready {
            let entry = inner.entry_mut(entry_id)?;
            entry.status = EntryStatus::InFlight;
            claimed.push(entry.clone());
        }

        if !claimed.is_empty() {
            self.persist(&inner)?;
        }
        Ok(claimed)
    }

    /// Marks an in-flight entry as propagated.
    ///
    /// A dirty entry goes back to Pending carrying the newer mutation.
    pub fn complete(&self, entry_id: u64) -> QueueResult<()> {
        let now = Timestamp::now();
        let mut inner = self.inner.lock();
        let entry = inner.in_flight_mut(entry_id, EntryStatus::Done)?;

        if let Some(next) = entry.pending_operation.take() {
            entry.operation = next;
            entry.status = EntryStatus::Pending;
            entry.attempts = 0;
            entry.last_error = None;
            entry.not_before = None;
            entry.enqueued_at = now;
            debug!(entry_id, "entry changed while in flight, requeued");
        } else {
            entry.status = EntryStatus::Done;
            let item_id = entry.item_id.clone();
            inner.live.remove(&item_id);
        }

        self.persist(&inner)
    }

    /// Records a failed propagation attempt.
    pub fn fail(&self, entry_id: u64, error: impl Into<String>) -> QueueResult<FailOutcome> {
        self.fail_at(entry_id, error, Timestamp::now())
    }

    /// Records a failed propagation attempt observed at `now`.
    pub fn fail_at(
        &self,
        entry_id: u64,
        error: impl Into<String>,
        now: Timestamp,
    ) -> QueueResult<FailOutcome> {
        let mut inner = self.inner.lock();
        let entry = inner.in_flight_mut(entry_id, EntryStatus::Failed)?;

        if let Some(next) = entry.pending_operation.take() {
            entry.operation = entry.operation.coalesce(next);
        }
        entry.attempts += 1;
        entry.last_error = Some(error.into());
        let attempts = entry.attempts;

        let outcome = if self.retry.is_exhausted(attempts) {
            entry.status = EntryStatus::Dead;
            entry.not_before = None;
            let item_id = entry.item_id.clone();
            inner.live.remove(&item_id);
            warn!(item_id = %item_id, entry_id, attempts, "queue entry dead-lettered");
            FailOutcome::Dead { attempts }
        } else {
            let not_before = now.saturating_add(self.retry.delay_for_attempt(attempts));
            entry.status = EntryStatus::Failed;
            entry.not_before = Some(not_before);
            FailOutcome::Retrying {
                attempts,
                not_before,
            }
        };

        self.persist(&inner)?;
        Ok(outcome)
    }

    /// Returns in-flight entries to Pending without counting an attempt.
    ///
    /// Ids that are not in flight are ignored. Returns how many were released.
    pub fn release(&self, entry_ids: &[u64]) -> QueueResult<usize> {
        let mut inner = self.inner.lock();
        let mut released = 0;
        for entry_id in entry_ids {
            if let Some(entry) = inner.entries.get_mut(entry_id) {
                if entry.status == EntryStatus::InFlight {
                    entry.revert_to_pending();
                    released += 1;
                }
            }
        }
        if released > 0 {
            self.persist(&inner)?;
        }
        Ok(released)
    }

    /// Returns every in-flight entry to Pending.
    pub fn release_all(&self) -> QueueResult<usize> {
        let ids: Vec<u64> = {
            let inner = self.inner.lock();
            inner
                .entries
                .values()
                .filter(|e| e.status == EntryStatus::InFlight)
                .map(|e| e.entry_id)
                .collect()
        };
        self.release(&ids)
    }

    /// Retires the item's unclaimed local change because a remote winner
    /// replaced it.
    ///
    /// Covers the live entry and any dead entries. Returns how many entries
    /// were retired.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the live entry is in flight; the
    /// claiming cycle must `complete` it instead.
    pub fn supersede(&self, item_id: &ItemId) -> QueueResult<usize> {
        let mut inner = self.inner.lock();
        let mut ids = inner.dead_ids_for(item_id);

        if let Some(&live_id) = inner.live.get(item_id) {
            let entry = inner.entry_mut(live_id)?;
            if entry.status == EntryStatus::InFlight {
                return Err(QueueError::invalid_transition(
                    live_id,
                    entry.status,
                    EntryStatus::Done,
                ));
            }
            ids.push(live_id);
            inner.live.remove(item_id);
        }

        for entry_id in &ids {
            inner.entry_mut(*entry_id)?.status = EntryStatus::Done;
        }
        if !ids.is_empty() {
            debug!(item_id = %item_id, retired = ids.len(), "local change superseded by remote");
            self.persist(&inner)?;
        }
        Ok(ids.len())
    }

    /// Moves the item's dead entries back to Pending with attempts reset.
    ///
    /// If the item already has a live entry the dead mutations fold into it.
    /// Returns the id of the resulting live entry, or `None` if the item had
    /// no dead entries.
    pub fn requeue_dead(&self, item_id: &ItemId) -> QueueResult<Option<u64>> {
        let now = Timestamp::now();
        let mut inner = self.inner.lock();

        let dead_ids = inner.dead_ids_for(item_id);
        let Some((&first, rest)) = dead_ids.split_first() else {
            return Ok(None);
        };

        let mut combined = inner.entry_mut(first)?.operation;
        for entry_id in rest {
            combined = combined.coalesce(inner.entry_mut(*entry_id)?.operation);
        }

        let target = match inner.live.get(item_id).copied() {
            Some(live_id) => {
                let live = inner.entry_mut(live_id)?;
                if live.status == EntryStatus::InFlight {
                    return Err(QueueError::invalid_transition(
                        first,
                        EntryStatus::Dead,
                        EntryStatus::Pending,
                    ));
                }
                live.operation = combined.coalesce(live.operation);
                for entry_id in &dead_ids {
                    inner.entry_mut(*entry_id)?.status = EntryStatus::Done;
                }
                live_id
            }
            None => {
                for entry_id in rest {
                    inner.entry_mut(*entry_id)?.status = EntryStatus::Done;
                }
                let entry = inner.entry_mut(first)?;
                entry.operation = combined;
                entry.status = EntryStatus::Pending;
                entry.attempts = 0;
                entry.last_error = None;
                entry.not_before = None;
                entry.enqueued_at = now;
                inner.live.insert(item_id.clone(), first);
                first
            }
        };

        info!(item_id = %item_id, entry_id = target, "dead entries requeued");
        self.persist(&inner)?;
        Ok(Some(target))
    }

    /// Returns a copy of an entry.
    pub fn get(&self, entry_id: u64) -> Option<SyncQueueEntry> {
        self.inner.lock().entries.get(&entry_id).cloned()
    }

    /// Returns a copy of the item's live entry.
    pub fn live_entry(&self, item_id: &ItemId) -> Option<SyncQueueEntry> {
        let inner = self.inner.lock();
        inner
            .live
            .get(item_id)
            .and_then(|id| inner.entries.get(id))
            .cloned()
    }

    /// Returns true if the item has a live or dead entry.
    pub fn has_unsynced(&self, item_id: &ItemId) -> bool {
        let inner = self.inner.lock();
        inner.live.contains_key(item_id)
            || inner
                .entries
                .values()
                .any(|e| e.status == EntryStatus::Dead && &e.item_id == item_id)
    }

    /// Returns all dead entries in id order.
    pub fn dead_entries(&self) -> Vec<SyncQueueEntry> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::Dead)
            .cloned()
            .collect()
    }

    /// Returns entry counts by state.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for entry in inner.entries.values() {
            match entry.status {
                EntryStatus::Pending => stats.pending += 1,
                EntryStatus::InFlight => stats.in_flight += 1,
                EntryStatus::Failed => stats.failed += 1,
                EntryStatus::Dead => stats.dead += 1,
                EntryStatus::Done => {}
            }
        }
        stats
    }

    /// Drops Done entries. Returns how many were removed.
    pub fn compact(&self) -> QueueResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.status != EntryStatus::Done);
        let removed = before - inner.entries.len();
        if removed > 0 {
            self.persist(&inner)?;
        }
        Ok(removed)
    }

    /// Returns the number of retained entries, Done ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Returns true if this queue is backed by a journal.
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    fn persist(&self, inner: &QueueInner) -> QueueResult<()> {
        match &self.journal {
            Some(journal) => {
                journal.save(inner.next_entry_id, inner.entries.values().cloned().collect())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("stats", &self.stats())
            .field("durable", &self.is_durable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SyncQueue {
        SyncQueue::in_memory(RetryConfig::immediate(3))
    }

    fn at(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn enqueue_coalesces_per_item() {
        let queue = queue();

        let first = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        let second = queue.enqueue_at("a", Operation::Update, at(2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.stats().pending, 1);

        let entry = queue.get(first).unwrap();
        assert_eq!(entry.operation, Operation::Create);
        assert_eq!(entry.enqueued_at, at(2));
    }

    #[test]
    fn delete_wins_over_pending_create() {
        let queue = queue();
        let id = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        queue.enqueue_at("a", Operation::Delete, at(2)).unwrap();
        queue.enqueue_at("a", Operation::Update, at(3)).unwrap();

        assert_eq!(queue.get(id).unwrap().operation, Operation::Delete);
    }

    #[test]
    fn claim_orders_by_enqueue_time() {
        let queue = queue();
        queue.enqueue_at("late", Operation::Update, at(30)).unwrap();
        queue.enqueue_at("early", Operation::Update, at(10)).unwrap();
        queue.enqueue_at("middle", Operation::Update, at(20)).unwrap();

        let batch = queue.claim_at(2, at(100)).unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, ["early", "middle"]);
        assert!(batch.iter().all(|e| e.status == EntryStatus::InFlight));

        let stats = queue.stats();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn claimed_entries_are_not_claimed_twice() {
        let queue = queue();
        queue.enqueue_at("a", Operation::Create, at(1)).unwrap();

        assert_eq!(queue.claim_at(10, at(5)).unwrap().len(), 1);
        assert!(queue.claim_at(10, at(5)).unwrap().is_empty());
    }

    #[test]
    fn complete_retires_entry() {
        let queue = queue();
        let id = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        queue.claim_at(1, at(2)).unwrap();

        queue.complete(id).unwrap();

        assert_eq!(queue.get(id).unwrap().status, EntryStatus::Done);
        assert!(queue.live_entry(&ItemId::from("a")).is_none());
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn complete_requires_in_flight() {
        let queue = queue();
        let id = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();

        assert!(matches!(
            queue.complete(id),
            Err(QueueError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.complete(999),
            Err(QueueError::UnknownEntry(999))
        ));
    }

    #[test]
    fn mutation_during_flight_marks_dirty() {
        let queue = queue();
        let id = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        queue.claim_at(1, at(2)).unwrap();

        let same = queue.enqueue_at("a", Operation::Update, at(3)).unwrap();
        assert_eq!(same, id);
        assert!(queue.get(id).unwrap().is_dirty());

        queue.complete(id).unwrap();

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.operation, Operation::Update);
        assert!(!entry.is_dirty());
    }

    #[test]
    fn fail_backs_off_then_dead_letters() {
        let queue = SyncQueue::in_memory(
            RetryConfig::new(2)
                .with_initial_delay(std::time::Duration::from_millis(100))
                .with_jitter(false),
        );
        let id = queue.enqueue_at("a", Operation::Update, at(0)).unwrap();

        queue.claim_at(1, at(0)).unwrap();
        let outcome = queue.fail_at(id, "timeout", at(1_000)).unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                attempts: 1,
                not_before: at(1_100)
            }
        );
        assert_eq!(queue.stats().failed, 1);

        assert!(queue.claim_at(1, at(1_050)).unwrap().is_empty());
        assert_eq!(queue.claim_at(1, at(1_100)).unwrap().len(), 1);

        let outcome = queue.fail_at(id, "timeout again", at(2_000)).unwrap();
        assert_eq!(outcome, FailOutcome::Dead { attempts: 2 });

        let stats = queue.stats();
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.failed, 0);
        assert!(queue.has_unsynced(&ItemId::from("a")));
        assert_eq!(
            queue.dead_entries()[0].last_error.as_deref(),
            Some("timeout again")
        );
    }

    #[test]
    fn enqueue_after_dead_starts_new_entry() {
        let queue = SyncQueue::in_memory(RetryConfig::no_retry());
        let dead = queue.enqueue_at("a", Operation::Create, at(0)).unwrap();
        queue.claim_at(1, at(0)).unwrap();
        queue.fail_at(dead, "boom", at(1)).unwrap();

        let fresh = queue.enqueue_at("a", Operation::Update, at(2)).unwrap();
        assert_ne!(dead, fresh);

        let stats = queue.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dead, 1);
    }

    #[test]
    fn release_does_not_count_attempt() {
        let queue = queue();
        let id = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        queue.claim_at(1, at(2)).unwrap();
        queue.enqueue_at("a", Operation::Delete, at(3)).unwrap();

        assert_eq!(queue.release(&[id, 12345]).unwrap(), 1);

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.operation, Operation::Delete);
    }

    #[test]
    fn release_all_empties_flight() {
        let queue = queue();
        queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        queue.enqueue_at("b", Operation::Create, at(1)).unwrap();
        queue.claim_at(10, at(2)).unwrap();

        assert_eq!(queue.release_all().unwrap(), 2);
        assert_eq!(queue.stats().in_flight, 0);
        assert_eq!(queue.stats().pending, 2);
    }

    #[test]
    fn supersede_retires_live_and_dead() {
        let queue = SyncQueue::in_memory(RetryConfig::no_retry());
        let item = ItemId::from("a");
        let dead = queue.enqueue_at("a", Operation::Create, at(0)).unwrap();
        queue.claim_at(1, at(0)).unwrap();
        queue.fail_at(dead, "boom", at(1)).unwrap();
        queue.enqueue_at("a", Operation::Update, at(2)).unwrap();

        assert_eq!(queue.supersede(&item).unwrap(), 2);
        assert!(!queue.has_unsynced(&item));
        assert_eq!(queue.supersede(&item).unwrap(), 0);
    }

    #[test]
    fn supersede_rejects_in_flight() {
        let queue = queue();
        queue.enqueue_at("a", Operation::Update, at(0)).unwrap();
        queue.claim_at(1, at(0)).unwrap();

        assert!(queue.supersede(&ItemId::from("a")).is_err());
    }

    #[test]
    fn requeue_dead_resets_attempts() {
        let queue = SyncQueue::in_memory(RetryConfig::no_retry());
        let item = ItemId::from("a");
        let id = queue.enqueue_at("a", Operation::Update, at(0)).unwrap();
        queue.claim_at(1, at(0)).unwrap();
        queue.fail_at(id, "boom", at(1)).unwrap();

        assert_eq!(queue.requeue_dead(&item).unwrap(), Some(id));

        let entry = queue.live_entry(&item).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
        assert_eq!(queue.requeue_dead(&item).unwrap(), None);
    }

    #[test]
    fn requeue_dead_folds_into_live() {
        let queue = SyncQueue::in_memory(RetryConfig::no_retry());
        let item = ItemId::from("a");
        let dead = queue.enqueue_at("a", Operation::Create, at(0)).unwrap();
        queue.claim_at(1, at(0)).unwrap();
        queue.fail_at(dead, "boom", at(1)).unwrap();
        let live = queue.enqueue_at("a", Operation::Update, at(2)).unwrap();

        assert_eq!(queue.requeue_dead(&item).unwrap(), Some(live));
        assert_eq!(queue.get(live).unwrap().operation, Operation::Create);
        assert_eq!(queue.get(dead).unwrap().status, EntryStatus::Done);
        assert_eq!(queue.stats().dead, 0);
    }

    #[test]
    fn compact_drops_done() {
        let queue = queue();
        let a = queue.enqueue_at("a", Operation::Create, at(1)).unwrap();
        queue.enqueue_at("b", Operation::Create, at(1)).unwrap();
        queue.claim_at(1, at(2)).unwrap();
        queue.complete(a).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.compact().unwrap(), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.get(a).is_none());
    }
}
