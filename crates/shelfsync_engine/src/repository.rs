//! Local item repository collaborator.

use parking_lot::RwLock;
use shelfsync_blobstore::BlobHash;
use shelfsync_protocol::{Item, ItemId, Timestamp};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors reported by a local item repository.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No item with this id exists.
    #[error("item not found: {0}")]
    NotFound(ItemId),

    /// The item changed since it was read.
    #[error("version mismatch for {item_id}: expected {expected:?}, found {actual:?}")]
    VersionMismatch {
        /// Item id.
        item_id: ItemId,
        /// Version the caller read, `None` if it expected no item.
        expected: Option<u64>,
        /// Version currently stored, `None` if there is no item.
        actual: Option<u64>,
    },

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// The local item store, owned by the host application.
///
/// Writes are optimistic: the caller passes the version it read and the
/// write is rejected if the stored version has moved on.
pub trait LocalItemRepository: Send + Sync {
    /// Reads an item, tombstones included.
    fn get(&self, id: &ItemId) -> RepositoryResult<Option<Item>>;

    /// Reads every item, tombstones included.
    fn list(&self) -> RepositoryResult<Vec<Item>>;

    /// Writes an item.
    ///
    /// `expected_version` is the version the caller read, or `None` if it
    /// expects the item to be absent.
    fn update(&self, item: Item, expected_version: Option<u64>) -> RepositoryResult<Item>;

    /// Tombstones an item, bumping its version.
    fn mark_deleted(
        &self,
        id: &ItemId,
        updated_at: Timestamp,
        expected_version: u64,
    ) -> RepositoryResult<Item>;
}

/// An in-memory repository for testing and embedding.
#[derive(Debug, Default)]
pub struct MemoryItemRepository {
    items: RwLock<BTreeMap<ItemId, Item>>,
}

impl MemoryItemRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a live item at version 1, as a local edit would.
    pub fn create(
        &self,
        id: impl Into<ItemId>,
        updated_at: Timestamp,
        content_hash: Option<BlobHash>,
    ) -> RepositoryResult<Item> {
        self.update(Item::new(id, updated_at, content_hash), None)
    }

    /// Replaces an item's content, bumping its version.
    pub fn edit(
        &self,
        id: &ItemId,
        updated_at: Timestamp,
        content_hash: Option<BlobHash>,
    ) -> RepositoryResult<Item> {
        let current = self
            .get(id)?
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        let next = Item {
            version: current.version + 1,
            updated_at,
            content_hash,
            is_deleted: false,
            ..current.clone()
        };
        self.update(next, Some(current.version))
    }

    /// Returns the number of items, tombstones included.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if the repository holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl LocalItemRepository for MemoryItemRepository {
    fn get(&self, id: &ItemId) -> RepositoryResult<Option<Item>> {
        Ok(self.items.read().get(id).cloned())
    }

    fn list(&self) -> RepositoryResult<Vec<Item>> {
        Ok(self.items.read().values().cloned().collect())
    }

    fn update(&self, item: Item, expected_version: Option<u64>) -> RepositoryResult<Item> {
        let mut items = self.items.write();
        let actual = items.get(&item.id).map(|i| i.version);
        if actual != expected_version {
            return Err(RepositoryError::VersionMismatch {
                item_id: item.id.clone(),
                expected: expected_version,
                actual,
            });
        }
        items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    fn mark_deleted(
        &self,
        id: &ItemId,
        updated_at: Timestamp,
        expected_version: u64,
    ) -> RepositoryResult<Item> {
        let mut items = self.items.write();
        let item = items
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        if item.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                item_id: id.clone(),
                expected: Some(expected_version),
                actual: Some(item.version),
            });
        }
        item.version += 1;
        item.updated_at = updated_at;
        item.is_deleted = true;
        Ok(item.clone())
    }
}
