/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks of the System log and the entries they record.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{CryptoHash, Head, LogKey},
    indexer_set::IndexerSet,
    messages::MAX_SUPPORTED_VERSION,
};

use super::SystemError;

/// Membership entry of one writer.
///
/// `length` is the number of the writer's nodes that the System has consumed. Writers that were
/// never added (but whose nodes were linearized, e.g., because they were removed) have an entry
/// with `is_removed == true`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct WriterInfo {
    pub length: u64,
    pub is_indexer: bool,
    pub is_removed: bool,
}

impl WriterInfo {
    /// The entry of a writer that has never been added.
    pub const fn unknown() -> WriterInfo {
        WriterInfo {
            length: 0,
            is_indexer: false,
            is_removed: true,
        }
    }
}

/// A named view and the key and length it had when a System block was written.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ViewEntry {
    pub name: String,
    pub key: LogKey,
    pub length: u64,
}

/// Summary of the state of a base, recorded in full in every System block.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct SystemInfo {
    pub version: u32,
    /// Number of writers that are currently added and not removed.
    pub members: u32,
    /// Keys of those writers, in ascending order.
    pub writers: Vec<LogKey>,
    /// Indexers in ascending key order, each with the number of its nodes consumed so far.
    pub indexers: Vec<Head>,
    pub views: Vec<ViewEntry>,
    /// Frontier of the causal DAG consumed so far.
    pub heads: Vec<Head>,
    pub encryption: Option<CryptoHash>,
}

impl SystemInfo {
    /// The state recorded by an empty System log.
    pub fn genesis() -> SystemInfo {
        SystemInfo::default()
    }

    pub fn indexer_set(&self) -> IndexerSet {
        self.indexers.iter().map(|head| head.key).collect()
    }

    pub fn view(&self, name: &str) -> Option<&ViewEntry> {
        self.views.iter().find(|view| view.name == name)
    }
}

/// One change to a writer's membership entry, with the value it replaced so it can be undone.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct WriterChange {
    pub key: LogKey,
    pub previous: Option<WriterInfo>,
    pub next: WriterInfo,
}

/// A block of the System log.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SystemBlock {
    pub info: SystemInfo,
    /// Changes in ascending key order.
    pub changes: Vec<WriterChange>,
}

impl SystemBlock {
    pub(crate) fn decode(index: u64, bytes: &[u8]) -> Result<SystemBlock, SystemError> {
        let block = SystemBlock::try_from_slice(bytes).map_err(|err: io::Error| {
            SystemError::DeserializeBlockError { index, source: err }
        })?;
        if block.info.version > MAX_SUPPORTED_VERSION {
            return Err(SystemError::UpgradeRequired {
                version: block.info.version,
            });
        }
        Ok(block)
    }
}
