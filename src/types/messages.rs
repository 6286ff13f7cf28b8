/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks written to writer logs ("oplog messages") and the local boot record.

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{Head, LogKey, SignatureBytes};

/// Version of the oplog and System block formats produced by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Highest oplog/System version this crate can interpret.
pub const MAX_SUPPORTED_VERSION: u32 = 1;

/// The DAG part of an oplog block.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct NodeRecord {
    /// Causal predecessors in other writers' logs. The writer's own previous block is an implicit
    /// predecessor and is not listed.
    pub heads: Vec<Head>,
    /// Number of blocks left in this atomic group, including this one. `1` ends the group.
    pub batch: u32,
    /// User payload, or `None` for an acknowledgement/control node.
    pub value: Option<Vec<u8>>,
}

/// An indexer's signature over one view (or the System) at `length`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Checkpoint {
    pub length: u64,
    pub signature: SignatureBytes,
}

/// Digest-compressed checkpoint: either the checkpoint itself (`checkpointer == 0`) or the number
/// of blocks back at which it was last written.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct CheckpointEntry {
    pub checkpointer: u64,
    pub checkpoint: Option<Checkpoint>,
}

/// Digest-compressed System key: either the key (`pointer == 0`) or the number of blocks back at
/// which it was last written.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct DigestEntry {
    pub pointer: u64,
    pub key: Option<LogKey>,
}

/// A block of a writer's log.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct OplogMessage {
    pub version: u32,
    pub max_supported_version: u32,
    /// One entry per signed log, System first. Only present in indexers' blocks.
    pub checkpoint: Option<Vec<CheckpointEntry>>,
    pub digest: Option<DigestEntry>,
    /// Set on blocks appended by writers that are not (yet) members.
    pub optimistic: bool,
    pub node: NodeRecord,
}

/// Crash-recovery pointer stored in the local log's user data.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BootRecord {
    pub version: u32,
    /// Key of the System log.
    pub key: LogKey,
    pub indexed_length: u64,
    pub indexers_updated: bool,
    pub fast_forwarding: bool,
}

/// User-data key under which the [`BootRecord`] is stored.
pub const BOOT_RECORD: &str = "causal_base/boot";

/// User-data key under which a writer's local log records the bootstrap key it belongs to.
pub const REFERRER: &str = "referrer";
