/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the pluggable append-log storage that writers, views, and the System are built on.
//!
//! A base never touches storage directly. Instead, library users provide an implementation of
//! [`LogStore`], a factory for [`AppendLog`] sessions, which is in turn responsible for persistence,
//! hashing, and replication between peers.
//!
//! ## Block availability
//!
//! [`AppendLog::get`] only returns blocks that are available *locally*. Callers that need a block
//! that is not yet available register a channel with [`AppendLog::on_append`] and wait to be
//! notified, re-checking their own state (e.g., a closed flag) after every wake-up.
//!
//! ## Signed length
//!
//! A log's signed length is the length up to which its content has been committed with a valid
//! [`Multisig`] (or, for a writer's log, by the writer itself). Implementations must verify every
//! multisig passed to [`AppendLog::commit`] against the log's manifest, e.g., using
//! [`Multisig::verify`], and must refuse to truncate below the signed length.

use std::sync::mpsc::Sender;

use crate::types::{
    data_types::{CryptoHash, LogKey},
    manifest::Manifest,
    multisig::Multisig,
};

pub trait AppendLog: Clone + Send + 'static {
    /// Key identifying this log.
    fn key(&self) -> LogKey;

    /// Manifest describing this log. `None` if the manifest has not been replicated yet.
    fn manifest(&self) -> Option<Manifest>;

    /// Number of blocks in the log, including blocks that are not available locally.
    fn length(&self) -> u64;

    /// Length up to which the content of the log is committed.
    fn signed_length(&self) -> u64;

    /// Get the block at `index`, if it is available locally.
    fn get(&self, index: u64) -> Option<Vec<u8>>;

    /// Append `blocks` to the end of the log, returning the new length.
    fn append(&mut self, blocks: Vec<Vec<u8>>) -> Result<u64, AppendLogError>;

    /// Remove all blocks at positions `>= length`.
    fn truncate(&mut self, length: u64) -> Result<(), AppendLogError>;

    /// Hash of the tree formed by the first `length` blocks, if they are all available locally.
    fn tree_hash(&self, length: u64) -> Option<CryptoHash>;

    /// Commit the log up to `signature.length`.
    fn commit(&mut self, signature: Multisig) -> Result<(), AppendLogError>;

    /// Copy the first `prologue.length` blocks of `source` into this (empty) log, where `prologue`
    /// is the prologue of this log's manifest. Fails if the tree hash of `source` does not match.
    fn copy_prologue(&mut self, source: &Self) -> Result<(), AppendLogError>;

    /// Get the user data stored under `key`.
    fn user_data(&self, key: &str) -> Option<Vec<u8>>;

    /// Set (or, with `None`, delete) the user data stored under `key`.
    fn set_user_data(&mut self, key: &str, value: Option<Vec<u8>>) -> Result<(), AppendLogError>;

    /// Register a channel that receives this log's key every time a block becomes available.
    fn on_append(&self, notify: Sender<LogKey>);
}

pub trait LogStore: Clone + Send + 'static {
    type Log: AppendLog;

    /// Open the log identified by `key`. If nothing is known about the log locally, this returns
    /// an empty session that fills up as the log is replicated.
    fn open(&mut self, key: &LogKey) -> Self::Log;

    /// Open the log described by `manifest`, creating it if it does not exist.
    fn create(&mut self, manifest: &Manifest) -> Self::Log;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendLogError {
    NotWritable { key: LogKey },
    TruncateBelowSigned { key: LogKey, length: u64, signed_length: u64 },
    InvalidSignature { key: LogKey, length: u64 },
    PrologueMismatch { key: LogKey },
    BlockNotAvailable { key: LogKey, index: u64 },
}
