/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Moving views onto the logs of a new indexer epoch.
//!
//! When an indexer-set change becomes indexed, every view (and the System, last) is re-created
//! under a manifest signed by the new indexers. The new log's prologue commits to the old log's
//! content at the length the System recorded for the view, so the new log provably extends the old
//! one. After copying the prologue, the local-only suffix beyond it is replayed into the new log.

use crate::{
    append_log::{AppendLog, AppendLogError, LogStore},
    types::{data_types::LogKey, indexer_set::IndexerSet, manifest::Prologue},
    view_store::{ViewStore, ViewStoreError},
};

pub(crate) struct Migration<'a, S: LogStore> {
    view_store: &'a mut ViewStore<S>,
    indexers: IndexerSet,
}

impl<'a, S: LogStore> Migration<'a, S> {
    pub(crate) fn new(view_store: &'a mut ViewStore<S>, indexers: IndexerSet) -> Self {
        Self {
            view_store,
            indexers,
        }
    }

    /// Move view `name` from `old` onto a log whose prologue covers the first `length` blocks of
    /// `old`. If `expected` is given, the derived key must match it.
    pub(crate) fn migrate(
        &mut self,
        name: &str,
        old: &S::Log,
        length: u64,
        expected: Option<&LogKey>,
    ) -> Result<S::Log, MigrationError> {
        let prologue = if length == 0 {
            None
        } else {
            let hash = old.tree_hash(length).ok_or(MigrationError::ContentNotAvailable {
                key: old.key(),
                length,
            })?;
            Some(Prologue { hash, length })
        };

        let manifest = self
            .view_store
            .view_manifest(&self.indexers, name, prologue)?;
        let key = manifest.key();
        if let Some(expected) = expected {
            if *expected != key {
                return Err(MigrationError::KeyMismatch {
                    name: name.to_string(),
                    expected: *expected,
                    derived: key,
                });
            }
        }
        if key == old.key() {
            return Ok(old.clone());
        }

        let mut next = self.view_store.create(&manifest);
        if next.length() > length {
            next.truncate(length)?;
        }
        if next.length() < length {
            next.copy_prologue(old)?;
        }
        if next.length() == length {
            let mut suffix = Vec::new();
            for index in length..old.length() {
                suffix.push(
                    old.get(index)
                        .ok_or(AppendLogError::BlockNotAvailable {
                            key: old.key(),
                            index,
                        })?,
                );
            }
            if !suffix.is_empty() {
                next.append(suffix)?;
            }
        }

        log::debug!(
            "Migrated view {} from {} to {} at length {}",
            name,
            old.key(),
            key,
            length
        );
        Ok(next)
    }
}

#[derive(Debug)]
pub enum MigrationError {
    ViewStoreError(ViewStoreError),
    AppendLogError(AppendLogError),
    /// The old log does not hold the content the new log's prologue must commit to.
    ContentNotAvailable { key: LogKey, length: u64 },
    /// The key derived for a view differs from the key the System recorded for it.
    KeyMismatch {
        name: String,
        expected: LogKey,
        derived: LogKey,
    },
}

impl From<ViewStoreError> for MigrationError {
    fn from(value: ViewStoreError) -> Self {
        MigrationError::ViewStoreError(value)
    }
}

impl From<AppendLogError> for MigrationError {
    fn from(value: AppendLogError) -> Self {
        MigrationError::AppendLogError(value)
    }
}
