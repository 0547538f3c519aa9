//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use shelfsync_protocol::ItemId;

/// Generate random blob content of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a batch of fresh item ids.
pub fn generate_ids(count: usize) -> Vec<ItemId> {
    (0..count).map(|_| ItemId::generate()).collect()
}

/// Generate items with random payloads of the specified size.
pub fn generate_items(count: usize, payload_size: usize) -> Vec<(ItemId, Vec<u8>)> {
    generate_ids(count)
        .into_iter()
        .map(|id| (id, random_data(payload_size)))
        .collect()
}
