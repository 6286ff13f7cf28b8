/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable application logic that turns linearized writer nodes into view content.
//!
//! ## Applying
//!
//! A base calls [`Applier::apply`] once per atomic group of linearized nodes that carry a value,
//! in linearized order. `apply` must be a deterministic function of the batch, the current view
//! content, and the System state visible through [`ApplyCalls`]: every peer of a base runs it over
//! the same order and must produce identical views.
//!
//! `apply` may be called again for nodes it has already seen. When new nodes reorder the
//! unconfirmed suffix, the base truncates the views (and the System) back to before the first
//! reordered node and applies the new order, so `apply` must not have side effects outside of
//! the views and the System.
//!
//! ## Membership
//!
//! Writers are added to and removed from a base by `apply` itself, through [`ApplyCalls`]. Like
//! view content, membership changes are part of the linearized history: they are undone with the
//! nodes that caused them.

use std::collections::BTreeSet;

use crate::{
    append_log::{AppendLog, AppendLogError},
    local_state::pluggables::KVStore,
    system::{types::SystemInfo, SystemError, SystemView},
    types::{
        data_types::{Head, LogKey},
        indexer_set::IndexerSet,
    },
    view::Views,
};

pub trait Applier: Send + 'static {
    /// Names of the views the applier writes to. Must not change over the lifetime of a base.
    fn views(&self) -> Vec<String>;

    fn apply<K: KVStore, L: AppendLog>(
        &mut self,
        batch: &[ApplyNode],
        views: &mut Views<L>,
        base: &mut ApplyCalls<K, L>,
    ) -> Result<(), ApplyError>;
}

/// One linearized node, as handed to [`Applier::apply`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApplyNode {
    /// Whether the node's position in the order is final.
    pub indexed: bool,
    pub from: LogKey,
    /// 1-based position of the node in its writer's log.
    pub length: u64,
    pub value: Vec<u8>,
    pub heads: Vec<Head>,
    pub optimistic: bool,
}

/// Effects of host calls that the apply state acts on after `apply` returns.
#[derive(Default)]
pub(crate) struct ApplyEffects {
    pub(crate) acked: BTreeSet<LogKey>,
    pub(crate) added: Vec<(LogKey, bool)>,
    pub(crate) removed: Vec<LogKey>,
    pub(crate) interrupt: Option<String>,
}

/// Calls into the base that are available inside [`Applier::apply`].
pub struct ApplyCalls<'a, K: KVStore, L: AppendLog> {
    system: &'a mut SystemView<K, L>,
    effects: &'a mut ApplyEffects,
    indexed_system_length: u64,
}

impl<'a, K: KVStore, L: AppendLog> ApplyCalls<'a, K, L> {
    pub(crate) fn new(
        system: &'a mut SystemView<K, L>,
        effects: &'a mut ApplyEffects,
        indexed_system_length: u64,
    ) -> Self {
        Self {
            system,
            effects,
            indexed_system_length,
        }
    }

    /// Add `key` as a writer, or change whether it is an indexer.
    pub fn add_writer(&mut self, key: &LogKey, indexer: bool) -> Result<(), ApplyError> {
        if self.system.add_writer(key, indexer)? {
            self.effects.added.push((*key, indexer));
        }
        self.effects.acked.insert(*key);
        Ok(())
    }

    /// Whether `key` can be removed: it is a member, and it is not the last indexer.
    pub fn removeable(&self, key: &LogKey) -> Result<bool, ApplyError> {
        match self.system.get(key)? {
            Some(info) if !info.is_removed => {
                let indexers = self.system.staged_indexers();
                Ok(!(indexers.len() == 1 && indexers.contains(key)))
            }
            _ => Ok(false),
        }
    }

    /// Remove `key` from the writers. Removing a writer that is not a member does nothing.
    pub fn remove_writer(&mut self, key: &LogKey) -> Result<(), ApplyError> {
        let indexers = self.system.staged_indexers();
        if indexers.len() == 1 && indexers.contains(key) {
            return Err(ApplyError::NotRemovable { writer: *key });
        }
        if self.system.remove_writer(key)? {
            self.effects.removed.push(*key);
        }
        self.effects.acked.remove(key);
        Ok(())
    }

    /// Accept the optimistic node being applied without changing its writer's membership.
    pub fn ack_writer(&mut self, key: &LogKey) {
        self.effects.acked.insert(*key);
    }

    /// Halt the base after this batch. The base is closed with its views as the batch left them,
    /// and the batch is not recorded in the System. Reopening the base truncates the views back to
    /// the indexed length.
    pub fn interrupt(&mut self, reason: impl Into<String>) {
        self.effects.interrupt = Some(reason.into());
    }

    /// Replace the whole indexer set with `indexers`, as agreed at the indexed System length
    /// `length`. Every view then migrates to the new set like after any other indexer change.
    pub fn fork(&mut self, indexers: Vec<LogKey>, length: u64) -> Result<(), ApplyError> {
        if indexers.is_empty() {
            return Err(ApplyError::InvalidFork {
                reason: "empty indexer set".to_string(),
            });
        }
        if length > self.indexed_system_length {
            return Err(ApplyError::InvalidFork {
                reason: format!(
                    "length {} is beyond the indexed System length {}",
                    length, self.indexed_system_length
                ),
            });
        }
        let indexers: IndexerSet = indexers.into_iter().collect();
        self.system.set_indexers(&indexers)?;
        for key in indexers.iter() {
            self.effects.added.push((*key, true));
            self.effects.acked.insert(*key);
        }
        Ok(())
    }

    /// Length of the System that can no longer be reordered. The latest length a fork can name.
    pub fn indexed_system_length(&self) -> u64 {
        self.indexed_system_length
    }

    /// The System state as of the last completed batch.
    pub fn system_info(&self) -> &SystemInfo {
        self.system.info()
    }

    /// Whether `key` is an indexer, including changes made earlier in this batch.
    pub fn is_indexer(&self, key: &LogKey) -> bool {
        self.system.staged_indexers().contains(key)
    }
}

#[derive(Debug)]
pub enum ApplyError {
    /// Removing the writer would leave the base without indexers.
    NotRemovable { writer: LogKey },
    InvalidFork { reason: String },
    ViewNotFound { name: String },
    System(SystemError),
    AppendLog(AppendLogError),
    /// An error raised by the applier itself.
    User(String),
}

impl From<SystemError> for ApplyError {
    fn from(value: SystemError) -> Self {
        ApplyError::System(value)
    }
}
