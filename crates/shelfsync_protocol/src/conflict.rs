//! Conflict detection and resolution.

use crate::item::{Item, ItemId, ItemSnapshot, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// How a conflict was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Decided automatically by comparing timestamps.
    LastWriteWins,
    /// Decided by an operator, superseding an earlier automatic record.
    Manual,
}

impl Resolution {
    /// Returns the policy name reported to event sinks.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::LastWriteWins => "last_write_wins",
            Resolution::Manual => "manual",
        }
    }
}

/// Which side's state survives a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Winner {
    /// The local item overwrites the remote snapshot.
    Local,
    /// The remote snapshot overwrites the local item.
    Remote,
}

/// Immutable audit entry for one resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Conflicting item.
    pub item_id: ItemId,
    /// Local modification time at resolution.
    pub local_updated_at: Timestamp,
    /// Remote modification time at resolution.
    pub remote_updated_at: Timestamp,
    /// How the conflict was decided.
    pub resolution: Resolution,
    /// Surviving side.
    pub winner: Winner,
    /// When the decision was made.
    pub resolved_at: Timestamp,
}

impl ConflictRecord {
    /// Creates a record for an operator's decision.
    pub fn manual(
        item_id: ItemId,
        local_updated_at: Timestamp,
        remote_updated_at: Timestamp,
        winner: Winner,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            local_updated_at,
            remote_updated_at,
            resolution: Resolution::Manual,
            winner,
            resolved_at: Timestamp::now(),
        }
    }
}

/// Decides the winner between a local item and a remote snapshot.
///
/// The later `updated_at` wins outright. Equal timestamps fall back to a
/// total order over the rest of the state (version, content hash, tombstone
/// flag) so that two devices looking at the same pair from opposite sides
/// pick the same survivor. Identical states resolve to the remote side.
///
/// The resolver is pure: it never touches storage and always emits a
/// record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves a conflict.
    pub fn resolve(&self, local: &Item, remote: &ItemSnapshot) -> (Winner, ConflictRecord) {
        self.resolve_at(local, remote, Timestamp::now())
    }

    /// Resolves a conflict, stamping the record with `now`.
    pub fn resolve_at(
        &self,
        local: &Item,
        remote: &ItemSnapshot,
        now: Timestamp,
    ) -> (Winner, ConflictRecord) {
        let winner = match local.updated_at.cmp(&remote.updated_at) {
            Ordering::Greater => Winner::Local,
            Ordering::Less => Winner::Remote,
            Ordering::Equal => tie_break(local, remote),
        };

        let record = ConflictRecord {
            id: Uuid::new_v4(),
            item_id: local.id.clone(),
            local_updated_at: local.updated_at,
            remote_updated_at: remote.updated_at,
            resolution: Resolution::LastWriteWins,
            winner,
            resolved_at: now,
        };
        (winner, record)
    }
}

fn tie_break(local: &Item, remote: &ItemSnapshot) -> Winner {
    let hash_of = |h: &Option<shelfsync_blobstore::BlobHash>| {
        h.as_ref().map(|h| h.as_str().to_owned()).unwrap_or_default()
    };
    let local_key = (local.version, hash_of(&local.content_hash), local.is_deleted);
    let remote_key = (remote.version, hash_of(&remote.content_hash), remote.is_deleted);

    if local_key > remote_key {
        Winner::Local
    } else {
        Winner::Remote
    }
}

/// Append-only, thread-safe log of conflict records.
#[derive(Debug, Default)]
pub struct ConflictLog {
    records: RwLock<Vec<ConflictRecord>>,
}

impl ConflictLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn append(&self, record: ConflictRecord) {
        self.records.write().push(record);
    }

    /// Appends several records.
    pub fn extend(&self, records: impl IntoIterator<Item = ConflictRecord>) {
        self.records.write().extend(records);
    }

    /// Returns every record for an item, oldest first.
    pub fn records_for(&self, item_id: &ItemId) -> Vec<ConflictRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.item_id == item_id)
            .cloned()
            .collect()
    }

    /// Returns the most recent record for an item.
    pub fn latest_for(&self, item_id: &ItemId) -> Option<ConflictRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|r| &r.item_id == item_id)
            .cloned()
    }

    /// Returns a copy of all records.
    pub fn all(&self) -> Vec<ConflictRecord> {
        self.records.read().clone()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync_blobstore::BlobHash;

    fn local(updated_at: i64) -> Item {
        Item::new(
            "A",
            Timestamp::from_millis(updated_at),
            Some(BlobHash::of(b"local content, version one")),
        )
    }

    fn remote(updated_at: i64) -> ItemSnapshot {
        ItemSnapshot {
            id: ItemId::from("A"),
            version: 1,
            updated_at: Timestamp::from_millis(updated_at),
            content_hash: Some(BlobHash::of(b"remote content, version one")),
            is_deleted: false,
            origin: Some("phone".into()),
        }
    }

    #[test]
    fn later_remote_wins() {
        let (winner, record) = ConflictResolver::new().resolve(&local(100), &remote(200));

        assert_eq!(winner, Winner::Remote);
        assert_eq!(record.resolution, Resolution::LastWriteWins);
        assert_eq!(record.item_id.as_str(), "A");
        assert_eq!(record.local_updated_at, Timestamp::from_millis(100));
        assert_eq!(record.remote_updated_at, Timestamp::from_millis(200));
    }

    #[test]
    fn later_local_wins() {
        let (winner, record) = ConflictResolver::new().resolve(&local(300), &remote(200));
        assert_eq!(winner, Winner::Local);
        assert_eq!(record.winner, Winner::Local);
    }

    #[test]
    fn tie_is_symmetric_across_devices() {
        let resolver = ConflictResolver::new();
        let a = local(100);
        let b = remote(100);

        let (from_a, _) = resolver.resolve(&a, &b);

        let b_as_local = Item {
            id: b.id.clone(),
            version: b.version,
            updated_at: b.updated_at,
            content_hash: b.content_hash.clone(),
            is_deleted: b.is_deleted,
        };
        let (from_b, _) = resolver.resolve(&b_as_local, &a.snapshot());

        // Each device names the other side differently, but both keep the
        // same content.
        assert_ne!(from_a, from_b);
    }

    #[test]
    fn tie_prefers_higher_version() {
        let mut newer = local(100);
        newer.version = 5;
        let (winner, _) = ConflictResolver::new().resolve(&newer, &remote(100));
        assert_eq!(winner, Winner::Local);
    }

    #[test]
    fn identical_state_goes_remote() {
        let item = local(100);
        let (winner, _) = ConflictResolver::new().resolve(&item, &item.snapshot());
        assert_eq!(winner, Winner::Remote);
    }

    #[test]
    fn every_resolution_gets_fresh_id() {
        let resolver = ConflictResolver::new();
        let (_, first) = resolver.resolve(&local(1), &remote(2));
        let (_, second) = resolver.resolve(&local(1), &remote(2));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn manual_record() {
        let record = ConflictRecord::manual(
            ItemId::from("A"),
            Timestamp::from_millis(1),
            Timestamp::from_millis(2),
            Winner::Local,
        );
        assert_eq!(record.resolution, Resolution::Manual);
        assert_eq!(record.resolution.as_str(), "manual");
    }

    #[test]
    fn log_tracks_latest_per_item() {
        let log = ConflictLog::new();
        let resolver = ConflictResolver::new();
        let (_, auto) = resolver.resolve(&local(100), &remote(200));
        log.append(auto.clone());

        let manual = ConflictRecord::manual(
            ItemId::from("A"),
            auto.local_updated_at,
            auto.remote_updated_at,
            Winner::Local,
        );
        log.append(manual.clone());

        assert_eq!(log.len(), 2);
        assert_eq!(log.records_for(&ItemId::from("A")).len(), 2);
        assert_eq!(log.latest_for(&ItemId::from("A")), Some(manual));
        assert!(log.latest_for(&ItemId::from("B")).is_none());
    }
}
