/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Assembling quorum signatures for one signed log (the System, or a view) from the checkpoints
//! indexers embed in their logs.
//!
//! Indexers do not all checkpoint at the same lengths, and a checkpoint at length `l` can only be
//! verified once the log holds `l` blocks. The signer therefore keeps every indexer's checkpoints,
//! and for a target length looks for the *best* checkpoint of each indexer: the longest one that
//! verifies locally, falling back to shorter ones when a longer one does not.

use std::collections::HashMap;

use crate::{
    append_log::AppendLog,
    types::{
        data_types::LogKey,
        indexer_set::quorum,
        manifest::Manifest,
        messages::Checkpoint,
        multisig::{Multisig, PartialSignature},
    },
};

#[derive(Default)]
pub(crate) struct Signer {
    /// Checkpoints received from every indexer, in ascending length order.
    checkpoints: HashMap<LogKey, Vec<Checkpoint>>,
}

impl Signer {
    pub(crate) fn new() -> Signer {
        Signer::default()
    }

    pub(crate) fn add_checkpoint(&mut self, indexer: &LogKey, checkpoint: Checkpoint) {
        let checkpoints = self.checkpoints.entry(*indexer).or_default();
        match checkpoints.binary_search_by(|cp| cp.length.cmp(&checkpoint.length)) {
            Ok(pos) => checkpoints[pos] = checkpoint,
            Err(pos) => checkpoints.insert(pos, checkpoint),
        }
    }

    /// Forget every checkpoint below `length`, which is already committed.
    pub(crate) fn gc(&mut self, length: u64) {
        for checkpoints in self.checkpoints.values_mut() {
            checkpoints.retain(|cp| cp.length >= length);
        }
    }

    /// The checkpoints of `indexer` with length `<= length`, longest first.
    fn candidates(&self, indexer: &LogKey, length: u64) -> impl Iterator<Item = Checkpoint> + '_ {
        let checkpoints = self
            .checkpoints
            .get(indexer)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let pos = checkpoints.partition_point(|cp| cp.length <= length);
        checkpoints[..pos].iter().rev().copied()
    }

    /// Pair the signers of `manifest` (in manifest order) with the indexers they belong to.
    ///
    /// `indexers` must be in the same order as the manifest's signers, which holds for every log
    /// created for an indexer set.
    fn verified<L: AppendLog>(
        &self,
        indexers: &[LogKey],
        manifest: &Manifest,
        log: &L,
        length: u64,
    ) -> Vec<PartialSignature> {
        let key = log.key();
        let tree_hash = |length: u64| {
            if length > log.length() {
                None
            } else {
                log.tree_hash(length)
            }
        };
        indexers
            .iter()
            .enumerate()
            .take(manifest.signers.len())
            .filter_map(|(position, indexer)| {
                self.candidates(indexer, length)
                    .map(|checkpoint| PartialSignature {
                        signer: position as u32,
                        length: checkpoint.length,
                        signature: checkpoint.signature,
                    })
                    .find(|partial| partial.verify(manifest, &key, &tree_hash))
            })
            .collect()
    }

    /// The longest length beyond the log's signed length that a quorum of indexers has
    /// checkpointed, considering only checkpoints at lengths `<= length`. `0` if there is none.
    pub(crate) fn get_signable_length<L: AppendLog>(
        &self,
        indexers: &[LogKey],
        manifest: &Manifest,
        log: &L,
        length: u64,
    ) -> u64 {
        let threshold = manifest.quorum as usize;
        if threshold == 0 {
            return 0;
        }
        let mut lengths: Vec<u64> = self
            .verified(indexers, manifest, log, length)
            .iter()
            .map(|partial| partial.length)
            .filter(|length| *length > log.signed_length())
            .collect();
        if lengths.len() < threshold {
            return 0;
        }
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths[threshold - 1]
    }

    /// Partial signatures from a quorum of indexers covering `target`, using checkpoints at lengths
    /// `<= length`.
    pub(crate) fn get_signatures<L: AppendLog>(
        &self,
        indexers: &[LogKey],
        manifest: &Manifest,
        log: &L,
        target: u64,
        length: u64,
    ) -> Option<Vec<PartialSignature>> {
        let threshold = quorum(manifest.signers.len()).min(manifest.quorum as usize);
        let partials: Vec<PartialSignature> = self
            .verified(indexers, manifest, log, length)
            .into_iter()
            .filter(|partial| partial.length >= target)
            .take(threshold)
            .collect();
        if threshold == 0 || partials.len() < threshold {
            None
        } else {
            Some(partials)
        }
    }

    /// Assemble a multisig committing the log at the best signable length. `None` if no length
    /// beyond the log's signed length can be signed yet.
    pub(crate) fn sign<L: AppendLog>(
        &self,
        indexers: &[LogKey],
        manifest: &Manifest,
        log: &L,
        length: u64,
    ) -> Option<Multisig> {
        let target = self.get_signable_length(indexers, manifest, log, length);
        if target == 0 {
            return None;
        }
        let partials = self.get_signatures(indexers, manifest, log, target, length)?;
        Some(Multisig::assemble(target, partials))
    }
}
