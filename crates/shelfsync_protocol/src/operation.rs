//! Local mutation kinds and how they coalesce.

use serde::{Deserialize, Serialize};

/// Kind of local mutation awaiting propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Item was created locally.
    Create,
    /// Item was modified locally.
    Update,
    /// Item was tombstoned locally.
    Delete,
}

impl Operation {
    /// Merges a newer mutation into an existing pending one.
    ///
    /// | existing | newer  | result |
    /// |----------|--------|--------|
    /// | any      | Delete | Delete |
    /// | Create   | Create/Update | Create |
    /// | Update   | Create/Update | Update |
    /// | Delete   | Update | Delete |
    /// | Delete   | Create | Update |
    ///
    /// A create after a delete resurrects the item under its old id, which
    /// the remote side sees as an update of the tombstone.
    #[must_use]
    pub fn coalesce(self, newer: Operation) -> Operation {
        match (self, newer) {
            (_, Operation::Delete) => Operation::Delete,
            (Operation::Create, _) => Operation::Create,
            (Operation::Update, _) => Operation::Update,
            (Operation::Delete, Operation::Update) => Operation::Delete,
            (Operation::Delete, Operation::Create) => Operation::Update,
        }
    }

    /// Returns true for deletions.
    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete)
    }

    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Update => 2,
            Operation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Create),
            2 => Some(Operation::Update),
            3 => Some(Operation::Delete),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_always_wins() {
        for existing in [Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(existing.coalesce(Operation::Delete), Operation::Delete);
        }
        assert_eq!(
            Operation::Delete.coalesce(Operation::Update),
            Operation::Delete
        );
    }

    #[test]
    fn updates_fold_into_prior_mutation() {
        assert_eq!(
            Operation::Create.coalesce(Operation::Update),
            Operation::Create
        );
        assert_eq!(
            Operation::Update.coalesce(Operation::Update),
            Operation::Update
        );
    }

    #[test]
    fn create_after_delete_is_update() {
        assert_eq!(
            Operation::Delete.coalesce(Operation::Create),
            Operation::Update
        );
    }

    #[test]
    fn codes() {
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(Operation::from_code(op.to_code()), Some(op));
        }
        assert_eq!(Operation::from_code(0), None);
    }
}
