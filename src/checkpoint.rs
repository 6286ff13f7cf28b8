/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reading (and compressing) the checkpoints and System digests that indexers embed in their logs.
//!
//! Indexers attach to every block they write one [`CheckpointEntry`] per signed log (the System
//! first, then every view in System order) and one [`DigestEntry`] naming the System key. To keep
//! blocks small, an entry that is unchanged since the last time it was written is replaced by a
//! pointer: the number of blocks back at which the full entry can be found.

use crate::{
    append_log::AppendLog,
    types::{
        data_types::LogKey,
        messages::{Checkpoint, CheckpointEntry, DigestEntry},
    },
    writer::{OplogCodec, WriterError},
};

/// The latest checkpoints of one indexer, inflated from the latest block of its log.
pub(crate) struct CheckpointLog<L: AppendLog> {
    log: L,
    /// Log length at the last successful inflate.
    length: u64,
    /// For every signed log, the latest checkpoint and the index of the block that carries it in
    /// full.
    checkpoints: Vec<Option<(Checkpoint, u64)>>,
    digest: Option<(LogKey, u64)>,
}

impl<L: AppendLog> CheckpointLog<L> {
    pub(crate) fn new(log: L) -> CheckpointLog<L> {
        CheckpointLog {
            log,
            length: 0,
            checkpoints: Vec::new(),
            digest: None,
        }
    }

    pub(crate) fn writer(&self) -> LogKey {
        self.log.key()
    }

    /// Inflate the latest block of the log if the log grew. Returns whether anything changed.
    ///
    /// Blocks that are not available locally leave the current state untouched; the inflate is
    /// retried on the next call.
    pub(crate) fn update(&mut self, codec: &OplogCodec) -> Result<bool, WriterError> {
        let length = self.log.length();
        if length == self.length || length == 0 {
            return Ok(false);
        }
        let latest = length - 1;
        let message = match codec.read(&self.log, latest)? {
            Some(message) => message,
            None => return Ok(false),
        };

        let mut checkpoints = Vec::new();
        for (i, entry) in message.checkpoint.unwrap_or_default().iter().enumerate() {
            match self.inflate_checkpoint(codec, latest, i, entry)? {
                Some(inflated) => checkpoints.push(inflated),
                None => return Ok(false),
            }
        }

        let digest = match message.digest {
            Some(entry) => match self.inflate_digest(codec, latest, &entry)? {
                Some(inflated) => Some(inflated),
                None => return Ok(false),
            },
            None => None,
        };

        let changed = checkpoints != self.checkpoints || digest != self.digest;
        self.length = length;
        self.checkpoints = checkpoints;
        self.digest = digest;
        Ok(changed)
    }

    /// `None` means the block holding the full entry is not available.
    #[allow(clippy::type_complexity)]
    fn inflate_checkpoint(
        &self,
        codec: &OplogCodec,
        index: u64,
        position: usize,
        entry: &CheckpointEntry,
    ) -> Result<Option<Option<(Checkpoint, u64)>>, WriterError> {
        if entry.checkpointer == 0 {
            return Ok(Some(entry.checkpoint.map(|checkpoint| (checkpoint, index))));
        }
        let at = match index.checked_sub(entry.checkpointer) {
            Some(at) => at,
            None => return Ok(Some(None)),
        };
        let message = match codec.read(&self.log, at)? {
            Some(message) => message,
            None => return Ok(None),
        };
        let full = message
            .checkpoint
            .and_then(|entries| entries.get(position).copied())
            .filter(|entry| entry.checkpointer == 0)
            .and_then(|entry| entry.checkpoint);
        Ok(Some(full.map(|checkpoint| (checkpoint, at))))
    }

    fn inflate_digest(
        &self,
        codec: &OplogCodec,
        index: u64,
        entry: &DigestEntry,
    ) -> Result<Option<(LogKey, u64)>, WriterError> {
        if entry.pointer == 0 {
            return Ok(entry.key.map(|key| (key, index)));
        }
        let at = match index.checked_sub(entry.pointer) {
            Some(at) => at,
            None => return Ok(None),
        };
        let message = match codec.read(&self.log, at)? {
            Some(message) => message,
            None => return Ok(None),
        };
        Ok(message
            .digest
            .filter(|digest| digest.pointer == 0)
            .and_then(|digest| digest.key)
            .map(|key| (key, at)))
    }

    /// The latest checkpoint of the `i`-th signed log (`0` is the System).
    pub(crate) fn checkpoint(&self, i: usize) -> Option<Checkpoint> {
        self.checkpoints
            .get(i)
            .copied()
            .flatten()
            .map(|(checkpoint, _)| checkpoint)
    }

    pub(crate) fn checkpoints(&self) -> impl Iterator<Item = (usize, Checkpoint)> + '_ {
        self.checkpoints
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.map(|(checkpoint, _)| (i, checkpoint)))
    }

    /// Length of the System this indexer last signed.
    pub(crate) fn signed_length(&self) -> u64 {
        self.checkpoint(0).map(|cp| cp.length).unwrap_or(0)
    }

    /// Key of the System this indexer last wrote a digest for.
    pub(crate) fn digest_key(&self) -> Option<LogKey> {
        self.digest.map(|(key, _)| key)
    }

    /// The full entries of this log's latest block, the starting point for
    /// [`compress`].
    pub(crate) fn written(&self) -> (Vec<Option<(Checkpoint, u64)>>, Option<(LogKey, u64)>) {
        (self.checkpoints.clone(), self.digest)
    }
}

/// Compress `checkpoints` for the block at `index`, given that the full entries written so far
/// are those in `written` (as returned by [`CheckpointLog::written`]). `written` is updated to
/// include the new block. `None` marks a log the indexer cannot sign yet.
pub(crate) fn compress(
    written: &mut Vec<Option<(Checkpoint, u64)>>,
    index: u64,
    checkpoints: &[Option<Checkpoint>],
) -> Vec<CheckpointEntry> {
    written.resize(written.len().max(checkpoints.len()), None);
    checkpoints
        .iter()
        .enumerate()
        .map(|(i, checkpoint)| match (written[i], checkpoint) {
            (Some((previous, at)), Some(checkpoint)) if previous == *checkpoint => {
                CheckpointEntry {
                    checkpointer: index - at,
                    checkpoint: None,
                }
            }
            (_, checkpoint) => {
                written[i] = checkpoint.map(|checkpoint| (checkpoint, index));
                CheckpointEntry {
                    checkpointer: 0,
                    checkpoint: *checkpoint,
                }
            }
        })
        .collect()
}

/// Compress the digest naming `key` for the block at `index`.
pub(crate) fn compress_digest(
    written: &mut Option<(LogKey, u64)>,
    index: u64,
    key: LogKey,
) -> DigestEntry {
    match *written {
        Some((previous, at)) if previous == key => DigestEntry {
            pointer: index - at,
            key: None,
        },
        _ => {
            *written = Some((key, index));
            DigestEntry {
                pointer: 0,
                key: Some(key),
            }
        }
    }
}
