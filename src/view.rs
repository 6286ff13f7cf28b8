/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User views: the named derived logs that [`Applier::apply`](crate::applier::Applier::apply)
//! writes into.
//!
//! During an update, views are handed to `apply` as a [`Views`], which only allows appending.
//! Outside of updates, [`Base::view`](crate::base::Base::view) gives out [`ViewSnapshot`]s.
//!
//! A snapshot reads the view's log directly for as long as the view only grows. Before the view is
//! truncated below a snapshot's length, the blocks the snapshot covers are copied into it, so a
//! snapshot never observes a reorg.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::{
    append_log::{AppendLog, AppendLogError},
    applier::ApplyError,
    types::data_types::LogKey,
};

/// A view as tracked by the apply state.
pub(crate) struct ViewState<L: AppendLog> {
    pub(crate) name: String,
    pub(crate) log: L,
    /// Key the System records for this view. Differs from `log.key()` between an indexer-set
    /// change and the migration that follows once the change is indexed.
    pub(crate) key: LogKey,
    /// Length of the view as of the indexed System length.
    pub(crate) indexed_length: u64,
    /// Snapshots of `log` that may still be read, with the length each one covers.
    snapshots: Mutex<Vec<(u64, Weak<Detached>)>>,
}

impl<L: AppendLog> ViewState<L> {
    pub(crate) fn new(name: String, log: L) -> ViewState<L> {
        let key = log.key();
        let indexed_length = log.length();
        ViewState {
            name,
            log,
            key,
            indexed_length,
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn snapshot(&self) -> ViewSnapshot<L> {
        let length = self.log.length();
        let detached = Arc::new(Detached::default());
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.retain(|(_, snapshot)| snapshot.strong_count() > 0);
        snapshots.push((length, Arc::downgrade(&detached)));

        ViewSnapshot {
            name: self.name.clone(),
            log: self.log.clone(),
            length,
            indexed_length: self.indexed_length,
            detached,
        }
    }

    /// Truncate the log to `length`, detaching every snapshot that covers more than that.
    pub(crate) fn truncate(&mut self, length: u64) -> Result<(), AppendLogError> {
        if self.log.length() <= length {
            return Ok(());
        }
        let log = &self.log;
        let snapshots = self
            .snapshots
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        snapshots.retain(|(covered, snapshot)| {
            if *covered <= length {
                return true;
            }
            if let Some(snapshot) = snapshot.upgrade() {
                let blocks = (0..*covered).map(|index| log.get(index)).collect();
                *snapshot
                    .blocks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(blocks);
            }
            false
        });
        self.log.truncate(length)
    }

    /// Move the view onto `log`. Snapshots of a different previous log keep reading it, since it
    /// is not written to anymore.
    pub(crate) fn replace_log(&mut self, log: L) {
        if log.key() != self.log.key() {
            self.snapshots
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        self.key = log.key();
        self.log = log;
    }
}

/// The blocks a snapshot covers, copied out of the view before it was truncated.
#[derive(Default)]
struct Detached {
    blocks: Mutex<Option<Vec<Option<Vec<u8>>>>>,
}

/// The views of a base, as seen by `apply`.
pub struct Views<'a, L: AppendLog> {
    views: &'a mut [ViewState<L>],
}

impl<'a, L: AppendLog> Views<'a, L> {
    pub(crate) fn new(views: &'a mut [ViewState<L>]) -> Self {
        Self { views }
    }

    fn find(&self, name: &str) -> Result<&ViewState<L>, ApplyError> {
        self.views
            .iter()
            .find(|view| view.name == name)
            .ok_or_else(|| ApplyError::ViewNotFound {
                name: name.to_string(),
            })
    }

    /// Append `block` to the view `name`, returning the view's new length.
    pub fn append(&mut self, name: &str, block: Vec<u8>) -> Result<u64, ApplyError> {
        let view = self
            .views
            .iter_mut()
            .find(|view| view.name == name)
            .ok_or_else(|| ApplyError::ViewNotFound {
                name: name.to_string(),
            })?;
        Ok(view.log.append(vec![block])?)
    }

    pub fn length(&self, name: &str) -> Result<u64, ApplyError> {
        Ok(self.find(name)?.log.length())
    }

    pub fn get(&self, name: &str, index: u64) -> Result<Option<Vec<u8>>, ApplyError> {
        Ok(self.find(name)?.log.get(index))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.views.iter().map(|view| view.name.as_str())
    }
}

/// A read-only snapshot of a view. Its content does not change when the view is reordered.
pub struct ViewSnapshot<L: AppendLog> {
    name: String,
    log: L,
    length: u64,
    indexed_length: u64,
    detached: Arc<Detached>,
}

impl<L: AppendLog> ViewSnapshot<L> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the log backing the view when the snapshot was taken.
    pub fn key(&self) -> LogKey {
        self.log.key()
    }

    /// Length of the view when the snapshot was taken, including unconfirmed content.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Length of the part of the view that can no longer be reordered.
    pub fn indexed_length(&self) -> u64 {
        self.indexed_length
    }

    /// Length of the part of the view committed by a quorum of indexers.
    pub fn signed_length(&self) -> u64 {
        self.log.signed_length().min(self.length)
    }

    /// Get the block at `index`, if it is part of the snapshot and available.
    pub fn get(&self, index: u64) -> Option<Vec<u8>> {
        if index >= self.length {
            return None;
        }
        let detached = self
            .detached
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match detached.as_ref() {
            Some(blocks) => blocks.get(index as usize).cloned().flatten(),
            None => self.log.get(index),
        }
    }

    /// Whether the view was truncated below this snapshot's length since it was taken.
    pub fn is_detached(&self) -> bool {
        self.detached
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl From<AppendLogError> for ApplyError {
    fn from(value: AppendLogError) -> Self {
        ApplyError::AppendLog(value)
    }
}
