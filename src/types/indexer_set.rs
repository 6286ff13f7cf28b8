/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The set of writers empowered to checkpoint and sign views.

use std::slice;

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::LogKey;

/// Stores the keys of the indexers of a base.
///
/// ## Ordering of indexers
///
/// `IndexerSet` internally maintains the list of indexers in ascending order of their `LogKey`s. The
/// position of an indexer in this order is also its position in the signer list of every view
/// manifest derived for the set, so partial signatures can be matched to signers by position.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct IndexerSet {
    indexers: Vec<LogKey>,
}

impl IndexerSet {
    /// Create an empty indexer set.
    pub fn new() -> IndexerSet {
        Self {
            indexers: Vec::new(),
        }
    }

    /// Put `indexer` into the indexer set, placing it in a position that preserves the
    /// [ordering of indexers](Self#ordering-of-indexers). Returns false if it was already present.
    pub fn put(&mut self, indexer: &LogKey) -> bool {
        match self.indexers.binary_search(indexer) {
            Ok(_) => false,
            Err(insert_pos) => {
                self.indexers.insert(insert_pos, *indexer);
                true
            }
        }
    }

    /// Remove `indexer` from the indexer set, if it actually is in the indexer set.
    pub fn remove(&mut self, indexer: &LogKey) -> bool {
        if let Ok(pos) = self.indexers.binary_search(indexer) {
            self.indexers.remove(pos);
            true
        } else {
            false
        }
    }

    /// Check whether the indexer set contains `indexer`.
    pub fn contains(&self, indexer: &LogKey) -> bool {
        self.indexers.binary_search(indexer).is_ok()
    }

    /// Get an iterator through the indexers' keys which walks through them in ascending order.
    pub fn iter(&self) -> slice::Iter<'_, LogKey> {
        self.indexers.iter()
    }

    /// Get the number of indexers currently in the indexer set.
    pub fn len(&self) -> usize {
        self.indexers.len()
    }

    /// Check whether the indexer set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the index of the given `indexer` in the sorted order of keys in the set.
    pub fn position(&self, indexer: &LogKey) -> Option<usize> {
        self.indexers.binary_search(indexer).ok()
    }

    /// The number of indexers that must agree before a length becomes final: `floor(n/2) + 1`,
    /// capped at `n`.
    pub fn quorum(&self) -> usize {
        quorum(self.len())
    }
}

impl FromIterator<LogKey> for IndexerSet {
    fn from_iter<I: IntoIterator<Item = LogKey>>(iter: I) -> Self {
        let mut set = IndexerSet::new();
        for key in iter {
            set.put(&key);
        }
        set
    }
}

/// `min(n, floor(n/2) + 1)`.
pub fn quorum(n: usize) -> usize {
    (n / 2 + 1).min(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexers_are_kept_sorted() {
        let mut set = IndexerSet::new();
        assert!(set.put(&LogKey::new([3; 32])));
        assert!(set.put(&LogKey::new([1; 32])));
        assert!(!set.put(&LogKey::new([3; 32])));
        assert!(set.put(&LogKey::new([2; 32])));

        let keys: Vec<u8> = set.iter().map(|k| k.bytes()[0]).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(set.position(&LogKey::new([2; 32])), Some(1));
        assert_eq!(set.quorum(), 2);
    }

    #[test]
    fn quorum_is_majority() {
        assert_eq!(quorum(0), 0);
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(2), 2);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
    }
}
