/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Partial signatures and their assembly into a quorum signature ("multisig").
//!
//! Every indexer signs the views it computed at the lengths it considers indexed. A signature by
//! the signer at position `i` of a log's [manifest](super::manifest::Manifest) covers the
//! [`signable`] of the log at some length `l`. A multisig for a log at length `L` is valid when at
//! least `quorum` distinct signers produced valid signatures at lengths `l >= L`: a log that
//! holds the data up to `l` can check that the signed tree extends the committed prefix.

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{hash_parts, verify_signature},
    data_types::{CryptoHash, LogKey, SignatureBytes},
    manifest::Manifest,
};

/// The message an indexer signs to attest to the content of log `key` up to `length`.
pub fn signable(
    namespace: &CryptoHash,
    key: &LogKey,
    length: u64,
    tree_hash: &CryptoHash,
) -> CryptoHash {
    hash_parts(&[
        b"signable",
        &namespace.bytes(),
        &key.bytes(),
        &length.to_le_bytes(),
        &tree_hash.bytes(),
    ])
}

/// One signer's signature over a log at `length`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PartialSignature {
    /// Position of the signer in the manifest.
    pub signer: u32,
    pub length: u64,
    pub signature: SignatureBytes,
}

impl PartialSignature {
    /// Check this partial signature against `manifest` for the log `key`, using `tree_hash` to look
    /// up the tree hash of the log at the signed length.
    pub fn verify(
        &self,
        manifest: &Manifest,
        key: &LogKey,
        tree_hash: &impl Fn(u64) -> Option<CryptoHash>,
    ) -> bool {
        let signer = match manifest.signers.get(self.signer as usize) {
            Some(signer) => signer,
            None => return false,
        };
        let hash = match tree_hash(self.length) {
            Some(hash) => hash,
            None => return false,
        };
        let message = signable(&signer.namespace, key, self.length, &hash);
        verify_signature(&signer.public_key, &message.bytes(), &self.signature)
    }
}

/// Partial signatures from a quorum of a log's signers, committing the log at `length`.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Multisig {
    pub length: u64,
    pub partials: Vec<PartialSignature>,
}

impl Multisig {
    /// Assemble `partials` into a multisig at `length`.
    pub fn assemble(length: u64, partials: Vec<PartialSignature>) -> Multisig {
        Multisig { length, partials }
    }

    /// Check whether this multisig commits the log `key` described by `manifest` at `self.length`.
    ///
    /// Lengths covered by the manifest's prologue need no signatures.
    pub fn verify(
        &self,
        manifest: &Manifest,
        key: &LogKey,
        tree_hash: impl Fn(u64) -> Option<CryptoHash>,
    ) -> bool {
        if self.length <= manifest.prologue_length() {
            return true;
        }
        if manifest.quorum == 0 {
            return false;
        }

        let mut signers = BTreeSet::new();
        for partial in &self.partials {
            if partial.length < self.length || signers.contains(&partial.signer) {
                continue;
            }
            if partial.verify(manifest, key, &tree_hash) {
                signers.insert(partial.signer);
            }
        }
        signers.len() >= manifest.quorum as usize
    }
}
