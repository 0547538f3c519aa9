//! Fuzz testing harnesses for ShelfSync.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks.

use crate::generators::QueueAction;
use shelfsync_blobstore::BlobHash;
use shelfsync_engine::{parse_blob_key, parse_item_key};
use shelfsync_protocol::{EntryStatus, ItemId, ItemSnapshot, Operation, RetryConfig, SyncQueue};
use std::collections::HashSet;

/// Fuzz target for snapshot decoding.
///
/// Arbitrary bytes either decode to a snapshot that re-encodes losslessly,
/// or fail with an error. Never a panic.
pub fn fuzz_snapshot_decode(data: &[u8]) {
    if let Ok(snapshot) = ItemSnapshot::decode(data) {
        let encoded = snapshot.encode().expect("Decoded snapshot must encode");
        let decoded = ItemSnapshot::decode(&encoded).expect("Re-encoded snapshot must decode");
        assert_eq!(snapshot, decoded, "Roundtrip mismatch");
    }
}

/// Fuzz target for blob hash parsing.
pub fn fuzz_blob_hash(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(hash) = BlobHash::parse(text) {
        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(BlobHash::parse(hash.as_str()).ok(), Some(hash));
    }
}

/// Fuzz target for remote key parsing.
pub fn fuzz_remote_keys(data: &[u8]) {
    let Ok(key) = std::str::from_utf8(data) else {
        return;
    };
    if let Some(id) = parse_item_key(key) {
        assert!(!id.as_str().is_empty());
    }
    if let Some(hash) = parse_blob_key(key) {
        let _ = format!("{hash}");
    }
}

/// Fuzz target for queue workloads.
///
/// Drives an in-memory queue with actions decoded from `data` and checks the
/// queue's invariants after every step.
pub fn fuzz_queue_operations(data: &[u8]) {
    run_queue_workload(&parse_queue_actions(data));
}

/// Decodes queue actions from fuzzer input, two bytes per action.
pub fn parse_queue_actions(data: &[u8]) -> Vec<QueueAction> {
    data.chunks_exact(2)
        .map(|pair| {
            let (kind, arg) = (pair[0], pair[1]);
            let item_id = ItemId::new(format!("item-{}", arg % 8));
            match kind % 6 {
                0 => QueueAction::Enqueue {
                    item_id,
                    operation: match arg % 3 {
                        0 => Operation::Create,
                        1 => Operation::Update,
                        _ => Operation::Delete,
                    },
                },
                1 => QueueAction::Claim {
                    max: usize::from(arg % 5) + 1,
                },
                2 => QueueAction::Complete(usize::from(arg)),
                3 => QueueAction::Fail(usize::from(arg)),
                4 => QueueAction::ReleaseAll,
                _ => QueueAction::Supersede(item_id),
            }
        })
        .collect()
}

/// Applies a workload to a fresh in-memory queue, asserting invariants.
///
/// Rejected transitions are expected and ignored; panics mean a broken
/// invariant.
pub fn run_queue_workload(actions: &[QueueAction]) {
    let queue = SyncQueue::in_memory(RetryConfig::immediate(2));
    let mut claimed: Vec<u64> = Vec::new();

    for action in actions {
        match action {
            QueueAction::Enqueue { item_id, operation } => {
                let _ = queue.enqueue(item_id.clone(), *operation);
            }
            QueueAction::Claim { max } => {
                if let Ok(batch) = queue.claim(*max) {
                    assert!(batch.len() <= *max);
                    claimed.extend(batch.iter().map(|e| e.entry_id));
                }
            }
            QueueAction::Complete(n) if !claimed.is_empty() => {
                let id = claimed.remove(n % claimed.len());
                let _ = queue.complete(id);
            }
            QueueAction::Fail(n) if !claimed.is_empty() => {
                let id = claimed.remove(n % claimed.len());
                let _ = queue.fail(id, "fuzz");
            }
            QueueAction::ReleaseAll => {
                let _ = queue.release_all();
                claimed.clear();
            }
            QueueAction::Supersede(item_id) => {
                let _ = queue.supersede(item_id);
            }
            QueueAction::Complete(_) | QueueAction::Fail(_) => {}
        }
        check_queue_invariants(&queue);
    }
}

/// Asserts that no item has more than one live entry.
pub fn check_queue_invariants(queue: &SyncQueue) {
    let mut live_items = HashSet::new();
    let mut id = 0;
    let mut seen = 0;
    while seen < queue.len() {
        if let Some(entry) = queue.get(id) {
            seen += 1;
            if entry.status.is_live() {
                assert!(
                    live_items.insert(entry.item_id.clone()),
                    "item {} has two live entries",
                    entry.item_id
                );
                assert_eq!(
                    queue.live_entry(&entry.item_id).map(|e| e.entry_id),
                    Some(entry.entry_id)
                );
            }
            if entry.status == EntryStatus::Dead {
                assert!(queue.has_unsynced(&entry.item_id));
            }
        }
        id += 1;
    }
}
