//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random items, snapshots and queue
//! workloads.

use proptest::prelude::*;
use shelfsync_blobstore::BlobHash;
use shelfsync_protocol::{ItemId, ItemSnapshot, Operation, Timestamp};

/// Strategy for item ids drawn from a small pool, so collisions are common.
pub fn item_id_strategy() -> impl Strategy<Value = ItemId> {
    (0u8..8).prop_map(|n| ItemId::new(format!("item-{n}")))
}

/// Strategy for arbitrary item ids.
pub fn any_item_id_strategy() -> impl Strategy<Value = ItemId> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,40}")
        .expect("Invalid regex")
        .prop_map(ItemId::new)
}

/// Strategy for blob content.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// Strategy for millisecond timestamps in a narrow window, so ties happen.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (1i64..64).prop_map(Timestamp::from_millis)
}

/// Strategy for queue operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        2 => Just(Operation::Create),
        3 => Just(Operation::Update),
        1 => Just(Operation::Delete),
    ]
}

/// Strategy for remote snapshots.
pub fn snapshot_strategy() -> impl Strategy<Value = ItemSnapshot> {
    (
        item_id_strategy(),
        1u64..16,
        timestamp_strategy(),
        prop::option::of(content_strategy()),
        any::<bool>(),
        prop::option::of(prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")),
    )
        .prop_map(|(id, version, updated_at, content, is_deleted, origin)| ItemSnapshot {
            id,
            version,
            updated_at,
            content_hash: content.map(|c| BlobHash::of(&c)),
            is_deleted,
            origin,
        })
}

/// One step of a queue workload.
#[derive(Debug, Clone)]
pub enum QueueAction {
    /// Record a local change.
    Enqueue {
        /// Item changed.
        item_id: ItemId,
        /// Kind of change.
        operation: Operation,
    },
    /// Claim up to `max` entries.
    Claim {
        /// Batch size.
        max: usize,
    },
    /// Complete the n-th currently claimed entry.
    Complete(usize),
    /// Fail the n-th currently claimed entry.
    Fail(usize),
    /// Return every claimed entry to pending.
    ReleaseAll,
    /// Drop an item's queued work.
    Supersede(ItemId),
}

/// Strategy for a single queue action.
pub fn queue_action_strategy() -> impl Strategy<Value = QueueAction> {
    prop_oneof![
        5 => (item_id_strategy(), operation_strategy())
            .prop_map(|(item_id, operation)| QueueAction::Enqueue { item_id, operation }),
        2 => (1usize..6).prop_map(|max| QueueAction::Claim { max }),
        2 => any::<usize>().prop_map(QueueAction::Complete),
        1 => any::<usize>().prop_map(QueueAction::Fail),
        1 => Just(QueueAction::ReleaseAll),
        1 => item_id_strategy().prop_map(QueueAction::Supersede),
    ]
}

/// Strategy for a queue workload.
pub fn queue_workload_strategy(
    min_actions: usize,
    max_actions: usize,
) -> impl Strategy<Value = Vec<QueueAction>> {
    prop::collection::vec(queue_action_strategy(), min_actions..max_actions)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
