/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The System: a derived log recording writer membership, the indexer set, and view lengths.
//!
//! The System is produced by the same apply-and-index pipeline as user views, one block per
//! applied boundary, so it is linearized, checkpointed, and signed exactly like them. Every block
//! is a [`SystemBlock`](types::SystemBlock): the full [`SystemInfo`](types::SystemInfo) as of the
//! block, plus the writer entries it changed together with their previous values, which is what
//! makes truncating the System (on a reorg) possible without replaying it from the start.
//!
//! ## Staging
//!
//! Changes made while applying a boundary ([`add_writer`](SystemView::add_writer),
//! [`remove_writer`](SystemView::remove_writer), [`add_head`](SystemView::add_head)) are staged in
//! memory and only written when the boundary is [`flush`](SystemView::flush)-ed. Reads through
//! [`get`](SystemView::get) see staged changes.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    append_log::{AppendLog, AppendLogError},
    local_state::{
        pluggables::{KVGetError, KVSetError, KVStore},
        write_batch::LocalStateWriteBatch,
    },
    types::{
        data_types::{CryptoHash, Head, LogKey},
        encode,
        indexer_set::IndexerSet,
        messages::PROTOCOL_VERSION,
    },
};

use self::{
    reader::SystemReader,
    types::{SystemBlock, SystemInfo, ViewEntry, WriterChange, WriterInfo},
};

pub(crate) mod reader;

pub mod types;

pub(crate) struct SystemView<K: KVStore, L: AppendLog> {
    log: L,
    kv_store: K,
    encryption: Option<CryptoHash>,
    info: SystemInfo,
    staged: Staged,
}

/// Changes made since the last flush. Cloned to checkpoint the System before an optimistic apply.
#[derive(Clone)]
pub(crate) struct Staged {
    writers: BTreeMap<LogKey, WriterInfo>,
    indexers: IndexerSet,
    heads: Vec<Head>,
    members: BTreeSet<LogKey>,
}

impl Staged {
    fn from_info(info: &SystemInfo) -> Staged {
        Staged {
            writers: BTreeMap::new(),
            indexers: info.indexer_set(),
            heads: info.heads.clone(),
            members: info.writers.iter().copied().collect(),
        }
    }
}

impl<K: KVStore, L: AppendLog> SystemView<K, L> {
    /// Open the System stored in `log`, rebuilding the materialized writer table in `kv_store` if it
    /// does not reflect `log` or if `interrupted` says a fast-forward may have left it half adopted.
    pub(crate) fn open(
        log: L,
        kv_store: K,
        encryption: Option<CryptoHash>,
        interrupted: bool,
    ) -> Result<Self, SystemError> {
        let info = SystemReader::new(log.length(), |index| log.get(index)).info()?;
        let staged = Staged::from_info(&info);
        let mut system = SystemView {
            log,
            kv_store,
            encryption,
            info,
            staged,
        };

        if interrupted
            || system.kv_store.system_key()? != Some(system.log.key())
            || system.kv_store.system_length()? != system.log.length()
        {
            system.rebuild()?;
        }

        Ok(system)
    }

    /// Clear the materialized writer table and replay every block of the System log into it.
    fn rebuild(&mut self) -> Result<(), SystemError> {
        log::debug!(
            "Rebuilding writer table of System {} from {} blocks",
            self.log.key(),
            self.log.length()
        );
        self.kv_store.clear();
        let mut wb = LocalStateWriteBatch::new();
        for index in 0..self.log.length() {
            let block = self.block(index)?;
            for change in &block.changes {
                wb.set_writer(&change.key, &change.next)?;
            }
        }
        wb.set_system_key(&self.log.key())?;
        wb.set_system_length(self.log.length())?;
        self.kv_store.write(wb.0);
        Ok(())
    }

    fn block(&self, index: u64) -> Result<SystemBlock, SystemError> {
        let bytes = self
            .log
            .get(index)
            .ok_or(SystemError::BlockNotAvailable { index })?;
        SystemBlock::decode(index, &bytes)
    }

    /* ↓↓↓ Getters ↓↓↓ */

    pub(crate) fn log(&self) -> &L {
        &self.log
    }

    pub(crate) fn key(&self) -> LogKey {
        self.log.key()
    }

    pub(crate) fn length(&self) -> u64 {
        self.log.length()
    }

    /// The System info as of the last flush.
    pub(crate) fn info(&self) -> &SystemInfo {
        &self.info
    }

    /// The indexer set including staged changes.
    pub(crate) fn staged_indexers(&self) -> &IndexerSet {
        &self.staged.indexers
    }

    /// Whether no writer has been made an indexer yet, not even by staged changes.
    pub(crate) fn bootstrapping(&self) -> bool {
        self.info.indexers.is_empty() && self.staged.indexers.is_empty()
    }

    /// Whether the staged changes modify the indexer set.
    pub(crate) fn indexer_update(&self) -> bool {
        self.staged.indexers != self.info.indexer_set()
    }

    /// Get the entry of `writer`, including staged changes.
    pub(crate) fn get(&self, writer: &LogKey) -> Result<Option<WriterInfo>, SystemError> {
        if let Some(info) = self.staged.writers.get(writer) {
            return Ok(Some(*info));
        }
        Ok(self.kv_store.writer(writer)?)
    }

    /// Read the System as it was at `length`.
    pub(crate) fn checkout(
        &self,
        length: u64,
    ) -> SystemReader<impl FnMut(u64) -> Option<Vec<u8>> + '_> {
        SystemReader::new(length.min(self.log.length()), |index| self.log.get(index))
    }

    /// The System info as of `length`, which is usually the indexed length.
    pub(crate) fn get_indexed_info(&self, length: u64) -> Result<SystemInfo, SystemError> {
        if length == self.log.length() {
            return Ok(self.info.clone());
        }
        self.checkout(length).info()
    }

    /* ↓↓↓ Staging ↓↓↓ */

    /// Add `writer` (or change whether it is an indexer). Returns false if nothing changed.
    pub(crate) fn add_writer(
        &mut self,
        writer: &LogKey,
        is_indexer: bool,
    ) -> Result<bool, SystemError> {
        let existing = self.get(writer)?;
        let next = WriterInfo {
            length: existing.map(|info| info.length).unwrap_or(0),
            is_indexer,
            is_removed: false,
        };
        if existing == Some(next) {
            return Ok(false);
        }
        self.staged.members.insert(*writer);
        if is_indexer {
            self.staged.indexers.put(writer);
        } else {
            self.staged.indexers.remove(writer);
        }
        self.staged.writers.insert(*writer, next);
        Ok(true)
    }

    /// Remove `writer`. Returns false if it was not a member.
    pub(crate) fn remove_writer(&mut self, writer: &LogKey) -> Result<bool, SystemError> {
        let existing = match self.get(writer)? {
            Some(info) if !info.is_removed => info,
            _ => return Ok(false),
        };
        self.staged.members.remove(writer);
        self.staged.indexers.remove(writer);
        self.staged.writers.insert(
            *writer,
            WriterInfo {
                length: existing.length,
                is_indexer: false,
                is_removed: true,
            },
        );
        Ok(true)
    }

    /// Replace the indexer set with `indexers`. Previous indexers that are not in `indexers` stay
    /// members.
    pub(crate) fn set_indexers(&mut self, indexers: &IndexerSet) -> Result<(), SystemError> {
        let current: Vec<LogKey> = self.staged.indexers.iter().copied().collect();
        for writer in current {
            if !indexers.contains(&writer) {
                self.add_writer(&writer, false)?;
            }
        }
        for writer in indexers.iter() {
            self.add_writer(writer, true)?;
        }
        Ok(())
    }

    /// Record that the node `writer`/`length`, which causally depends on `heads`, was consumed.
    pub(crate) fn add_head(
        &mut self,
        writer: &LogKey,
        length: u64,
        heads: &[Head],
    ) -> Result<(), SystemError> {
        let mut info = self.get(writer)?.unwrap_or(WriterInfo::unknown());
        info.length = length;
        self.staged.writers.insert(*writer, info);

        self.staged
            .heads
            .retain(|head| head.key != *writer && !heads.contains(head));
        self.staged.heads.push(Head::new(*writer, length));
        self.staged.heads.sort();
        Ok(())
    }

    /// Snapshot of the staged changes, to be restored with [`restore`](Self::restore).
    pub(crate) fn staged(&self) -> Staged {
        self.staged.clone()
    }

    pub(crate) fn restore(&mut self, staged: Staged) {
        self.staged = staged;
    }

    /// Drop every change made since the last flush.
    pub(crate) fn discard_staged(&mut self) {
        self.staged = Staged::from_info(&self.info);
    }

    /* ↓↓↓ Writing ↓↓↓ */

    /// Write the staged changes and `views` as one new block. Returns the new System length.
    pub(crate) fn flush(&mut self, views: Vec<ViewEntry>) -> Result<u64, SystemError> {
        let mut changes = Vec::with_capacity(self.staged.writers.len());
        for (key, next) in &self.staged.writers {
            let previous = self.kv_store.writer(key)?;
            if previous == Some(*next) {
                continue;
            }
            changes.push(WriterChange {
                key: *key,
                previous,
                next: *next,
            });
        }

        let mut indexers = Vec::with_capacity(self.staged.indexers.len());
        for key in self.staged.indexers.iter() {
            let length = self.get(key)?.map(|info| info.length).unwrap_or(0);
            indexers.push(Head::new(*key, length));
        }

        let info = SystemInfo {
            version: PROTOCOL_VERSION,
            members: self.staged.members.len() as u32,
            writers: self.staged.members.iter().copied().collect(),
            indexers,
            views,
            heads: self.staged.heads.clone(),
            encryption: self.encryption,
        };
        let block = SystemBlock {
            info: info.clone(),
            changes,
        };
        let length = self.log.append(vec![encode(&block)])?;

        let mut wb = LocalStateWriteBatch::new();
        for change in &block.changes {
            wb.set_writer(&change.key, &change.next)?;
        }
        wb.set_system_length(length)?;
        self.kv_store.write(wb.0);

        self.info = info;
        self.staged = Staged::from_info(&self.info);
        Ok(length)
    }

    /// Undo every block at positions `>= length`, discarding staged changes. Returns whether the
    /// indexer set changed.
    pub(crate) fn truncate(&mut self, length: u64) -> Result<bool, SystemError> {
        let previous_indexers = self.info.indexer_set();
        let mut wb = LocalStateWriteBatch::new();
        let mut restored: BTreeMap<LogKey, Option<WriterInfo>> = BTreeMap::new();
        for index in (length..self.log.length()).rev() {
            for change in self.block(index)?.changes {
                restored.insert(change.key, change.previous);
            }
        }
        for (key, previous) in &restored {
            match previous {
                Some(info) => wb.set_writer(key, info)?,
                None => wb.delete_writer(key),
            }
        }

        self.log.truncate(length)?;
        wb.set_system_length(self.log.length())?;
        self.kv_store.write(wb.0);

        self.info = SystemReader::new(self.log.length(), |index| self.log.get(index)).info()?;
        self.staged = Staged::from_info(&self.info);
        Ok(previous_indexers != self.info.indexer_set())
    }

    /// Move the System onto `next`, a log with identical content after a migration. The writer table
    /// is rebuilt if the content differs.
    pub(crate) fn migrate(&mut self, next: L) -> Result<(), SystemError> {
        let same_content = next.length() == self.log.length()
            && next.tree_hash(next.length()) == self.log.tree_hash(self.log.length());
        self.log = next;
        self.info = SystemReader::new(self.log.length(), |index| self.log.get(index)).info()?;
        self.staged = Staged::from_info(&self.info);

        if same_content {
            let mut wb = LocalStateWriteBatch::new();
            wb.set_system_key(&self.log.key())?;
            self.kv_store.write(wb.0);
            Ok(())
        } else {
            self.rebuild()
        }
    }

    /// Move the System onto `next`, a System that a fast-forward verified at `length`, and replace
    /// the writer table with `writers`, its entries as of `length`. Blocks before `length - 1` are
    /// not read, so they need not be available.
    pub(crate) fn adopt(
        &mut self,
        mut next: L,
        length: u64,
        writers: &BTreeMap<LogKey, WriterInfo>,
    ) -> Result<(), SystemError> {
        if next.length() > length {
            next.truncate(length)?;
        }
        self.info = SystemReader::new(next.length(), |index| next.get(index)).info()?;
        self.log = next;
        self.staged = Staged::from_info(&self.info);

        self.kv_store.clear();
        let mut wb = LocalStateWriteBatch::new();
        for (key, info) in writers {
            wb.set_writer(key, info)?;
        }
        wb.set_system_key(&self.log.key())?;
        wb.set_system_length(self.log.length())?;
        self.kv_store.write(wb.0);
        log::debug!(
            "Adopted System {} at {} with {} writer entries",
            self.log.key(),
            length,
            writers.len()
        );
        Ok(())
    }

    pub(crate) fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }
}

#[derive(Debug)]
pub enum SystemError {
    KVGetError(KVGetError),
    KVSetError(KVSetError),
    AppendLogError(AppendLogError),
    DeserializeBlockError {
        index: u64,
        source: std::io::Error,
    },
    BlockNotAvailable {
        index: u64,
    },
    /// A System block was written by a newer version of this crate.
    UpgradeRequired {
        version: u32,
    },
}

impl From<KVGetError> for SystemError {
    fn from(value: KVGetError) -> Self {
        SystemError::KVGetError(value)
    }
}

impl From<KVSetError> for SystemError {
    fn from(value: KVSetError) -> Self {
        SystemError::KVSetError(value)
    }
}

impl From<AppendLogError> for SystemError {
    fn from(value: AppendLogError) -> Self {
        SystemError::AppendLogError(value)
    }
}
