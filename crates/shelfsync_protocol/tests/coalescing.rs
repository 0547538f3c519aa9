//! Property tests for queue coalescing and claiming.

use proptest::prelude::*;
use shelfsync_protocol::{ItemId, Operation, RetryConfig, SyncQueue, Timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Create),
        Just(Operation::Update),
        Just(Operation::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn at_most_one_live_entry_per_item(
        mutations in prop::collection::vec((0u8..6, operation()), 1..64)
    ) {
        let queue = SyncQueue::in_memory(RetryConfig::immediate(3));
        let mut items = HashSet::new();

        for (i, (item, op)) in mutations.iter().enumerate() {
            let item_id = format!("item-{item}");
            queue.enqueue_at(item_id.as_str(), *op, Timestamp::from_millis(i as i64)).unwrap();
            items.insert(item_id);
        }

        prop_assert_eq!(queue.stats().pending, items.len());
        prop_assert_eq!(queue.len(), items.len());
    }

    #[test]
    fn coalesced_delete_is_sticky(
        before in prop::collection::vec(operation(), 0..8),
        after in prop::collection::vec(operation(), 0..8),
    ) {
        let queue = SyncQueue::in_memory(RetryConfig::immediate(3));
        let item = ItemId::from("x");
        let mut t = 0;
        for op in before.iter().copied().chain([Operation::Delete]) {
            t += 1;
            queue.enqueue_at(item.clone(), op, Timestamp::from_millis(t)).unwrap();
        }
        let mut saw_create = false;
        for op in after.iter().copied() {
            t += 1;
            saw_create |= op == Operation::Create;
            queue.enqueue_at(item.clone(), op, Timestamp::from_millis(t)).unwrap();
            if op == Operation::Delete {
                saw_create = false;
            }
        }

        let entry = queue.live_entry(&item).unwrap();
        if saw_create {
            prop_assert_ne!(entry.operation, Operation::Delete);
        } else {
            prop_assert_eq!(entry.operation, Operation::Delete);
        }
    }
}

#[test]
fn concurrent_claimers_never_share_entries() {
    let queue = Arc::new(SyncQueue::in_memory(RetryConfig::immediate(3)));
    for i in 0..500 {
        queue
            .enqueue_at(format!("item-{i}"), Operation::Create, Timestamp::from_millis(i))
            .unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut mine = Vec::new();
                loop {
                    let batch = queue.claim(7).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|e| e.entry_id));
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "entry {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 500);
    assert_eq!(queue.stats().in_flight, 500);
}
