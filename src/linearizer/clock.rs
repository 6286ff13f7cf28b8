/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Vector clocks over writer logs.

use std::collections::{btree_map, BTreeMap};

use crate::types::data_types::{Head, LogKey};

/// For every writer, the length of the longest prefix of its log contained in a causal past.
///
/// Since a writer's own nodes are totally ordered, a causal past always contains a prefix of each
/// writer's log, so one length per writer describes it exactly.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub(crate) struct Clock(BTreeMap<LogKey, u64>);

impl Clock {
    pub(crate) fn new() -> Clock {
        Clock(BTreeMap::new())
    }

    pub(crate) fn get(&self, writer: &LogKey) -> u64 {
        self.0.get(writer).copied().unwrap_or(0)
    }

    pub(crate) fn set(&mut self, writer: &LogKey, length: u64) {
        self.0.insert(*writer, length);
    }

    /// Whether `head` is in the causal past this clock describes.
    pub(crate) fn includes(&self, head: &Head) -> bool {
        head.length > 0 && self.get(&head.key) >= head.length
    }

    /// Merge `other` into this clock, keeping the longer prefix of every writer.
    pub(crate) fn merge(&mut self, other: &Clock) {
        for (writer, length) in &other.0 {
            let entry = self.0.entry(*writer).or_insert(0);
            if *length > *entry {
                *entry = *length;
            }
        }
    }

    pub(crate) fn iter(&self) -> btree_map::Iter<'_, LogKey, u64> {
        self.0.iter()
    }
}
