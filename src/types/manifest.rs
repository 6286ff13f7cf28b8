/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Manifests: the signer sets and prologues that determine the identity of an append log.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{hash_parts, VerifyingKey},
    data_types::{CryptoHash, LogKey},
    encode,
};

/// Version of the manifest format.
pub const MANIFEST_VERSION: u32 = 1;

/// Namespace every writer signs its own oplog blocks under.
pub const WRITER_NAMESPACE: &[u8] = b"causal_base/writer";

/// One party whose signatures count towards the quorum of a log.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ManifestSigner {
    pub public_key: [u8; 32],
    pub namespace: CryptoHash,
}

/// A commitment to the first `length` blocks of a log, chaining a migrated log to the content of
/// the log it replaces.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Prologue {
    pub hash: CryptoHash,
    pub length: u64,
}

/// Describes who may sign a log, how many of them must, and which content it extends.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Manifest {
    pub version: u32,
    pub quorum: u32,
    pub signers: Vec<ManifestSigner>,
    pub prologue: Option<Prologue>,
    /// Logs that must be available alongside this one (e.g., the previous core of a fork chain).
    pub linked: Vec<LogKey>,
}

impl Manifest {
    /// The key of a log is the hash of its manifest.
    pub fn key(&self) -> LogKey {
        LogKey::new(hash_parts(&[b"manifest", &encode(self)]).bytes())
    }

    /// The manifest of a writer's local log: a single signer, quorum of one.
    pub fn writer(public_key: &VerifyingKey) -> Manifest {
        Manifest {
            version: MANIFEST_VERSION,
            quorum: 1,
            signers: vec![ManifestSigner {
                public_key: public_key.to_bytes(),
                namespace: hash_parts(&[WRITER_NAMESPACE]),
            }],
            prologue: None,
            linked: Vec::new(),
        }
    }

    /// Position of `public_key` in the signer list.
    pub fn signer_position(&self, public_key: &[u8; 32]) -> Option<usize> {
        self.signers
            .iter()
            .position(|signer| &signer.public_key == public_key)
    }

    /// Length of the content this log inherits through its prologue.
    pub fn prologue_length(&self) -> u64 {
        self.prologue.map(|p| p.length).unwrap_or(0)
    }
}
