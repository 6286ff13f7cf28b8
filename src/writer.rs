/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Writers: the append logs of the peers of a base, read as sources of DAG nodes.

use std::{collections::VecDeque, io, sync::Arc};

use borsh::BorshDeserialize;

use crate::{
    append_log::AppendLog,
    encryption::{BlockEncryption, EncryptionError},
    linearizer::NodeData,
    types::{
        data_types::LogKey,
        encode,
        messages::{OplogMessage, MAX_SUPPORTED_VERSION},
    },
};

/// Encodes and decodes oplog blocks, encrypting them if the base is configured to.
#[derive(Clone)]
pub(crate) struct OplogCodec {
    encryption: Option<Arc<dyn BlockEncryption>>,
}

impl OplogCodec {
    pub(crate) fn new(encryption: Option<Arc<dyn BlockEncryption>>) -> OplogCodec {
        OplogCodec { encryption }
    }

    pub(crate) fn encode(&self, key: &LogKey, index: u64, message: &OplogMessage) -> Vec<u8> {
        let bytes = encode(message);
        match &self.encryption {
            Some(encryption) => encryption.encrypt(key, index, &bytes),
            None => bytes,
        }
    }

    pub(crate) fn decode(
        &self,
        key: &LogKey,
        index: u64,
        block: &[u8],
    ) -> Result<OplogMessage, WriterError> {
        let message = match &self.encryption {
            Some(encryption) => {
                let plaintext = encryption
                    .decrypt(key, index, block)
                    .map_err(WriterError::DecryptBlockError)?;
                OplogMessage::try_from_slice(&plaintext)
            }
            None => OplogMessage::try_from_slice(block),
        }
        .map_err(|err: io::Error| WriterError::DeserializeBlockError {
            key: *key,
            index,
            source: err,
        })?;

        if message.version > MAX_SUPPORTED_VERSION {
            return Err(WriterError::UpgradeRequired {
                key: *key,
                version: message.version,
            });
        }
        Ok(message)
    }

    /// Read and decode block `index` of `log`, if it is available.
    pub(crate) fn read<L: AppendLog>(
        &self,
        log: &L,
        index: u64,
    ) -> Result<Option<OplogMessage>, WriterError> {
        match log.get(index) {
            Some(block) => Ok(Some(self.decode(&log.key(), index, &block)?)),
            None => Ok(None),
        }
    }
}

/// One peer's log, tracked as a source of nodes for the linearizer.
///
/// A writer only hands out nodes in complete atomic groups: the first node of a group becomes
/// available once every node of the group is available locally.
pub(crate) struct Writer<L: AppendLog> {
    log: L,
    /// Number of nodes handed to the linearizer.
    length: u64,
    buffered: VecDeque<NodeData>,
}

impl<L: AppendLog> Writer<L> {
    pub(crate) fn new(log: L, length: u64) -> Writer<L> {
        Writer {
            log,
            length,
            buffered: VecDeque::new(),
        }
    }

    pub(crate) fn key(&self) -> LogKey {
        self.log.key()
    }

    /// Start handing out nodes from `length` again.
    pub(crate) fn reset(&mut self, length: u64) {
        self.length = length;
        self.buffered.clear();
    }

    /// Record that a node was handed to the linearizer without being read from the log (a local
    /// append that has not been flushed yet).
    pub(crate) fn advance_local(&mut self) {
        self.length += 1;
        self.buffered.clear();
    }

    /// The next node, if it and the rest of its atomic group are available locally.
    ///
    /// The batch counters of a group must count down by one to `1`.
    pub(crate) fn peek(&mut self, codec: &OplogCodec) -> Result<Option<&NodeData>, WriterError> {
        if self.buffered.is_empty() {
            let key = self.key();
            let mut index = self.length;
            let mut expected = None;
            loop {
                let message = match codec.read(&self.log, index)? {
                    Some(message) => message,
                    None => {
                        self.buffered.clear();
                        return Ok(None);
                    }
                };
                let batch = message.node.batch;
                if batch == 0 || expected.map_or(false, |expected| batch != expected) {
                    self.buffered.clear();
                    return Err(WriterError::Corruption {
                        key,
                        index,
                        batch,
                        expected: expected.unwrap_or(1),
                    });
                }
                expected = Some(batch - 1);
                self.buffered.push_back(NodeData {
                    writer: key,
                    length: index + 1,
                    heads: message.node.heads,
                    batch,
                    value: message.node.value,
                    optimistic: message.optimistic,
                });
                if batch == 1 {
                    break;
                }
                index += 1;
            }
        }
        Ok(self.buffered.front())
    }

    /// Hand out the node returned by the last [`peek`](Self::peek).
    pub(crate) fn advance(&mut self) -> Option<NodeData> {
        let node = self.buffered.pop_front()?;
        self.length += 1;
        Some(node)
    }
}

#[derive(Debug)]
pub enum WriterError {
    DeserializeBlockError {
        key: LogKey,
        index: u64,
        source: io::Error,
    },
    DecryptBlockError(EncryptionError),
    /// The block was written by a newer version of this crate.
    UpgradeRequired {
        key: LogKey,
        version: u32,
    },
    /// Block `index` breaks the countdown of its atomic group.
    Corruption {
        key: LogKey,
        index: u64,
        batch: u32,
        expected: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        append_log::test_log::FixedLog,
        types::messages::{NodeRecord, PROTOCOL_VERSION},
    };

    /// A writer over a log whose blocks carry the batch counters `batches`.
    fn writer_over(batches: &[u32]) -> (Writer<FixedLog>, OplogCodec) {
        let key = LogKey::new([3; 32]);
        let codec = OplogCodec::new(None);
        let blocks = batches
            .iter()
            .enumerate()
            .map(|(index, batch)| {
                let message = OplogMessage {
                    version: PROTOCOL_VERSION,
                    max_supported_version: MAX_SUPPORTED_VERSION,
                    checkpoint: None,
                    digest: None,
                    optimistic: false,
                    node: NodeRecord {
                        heads: Vec::new(),
                        batch: *batch,
                        value: Some(vec![index as u8]),
                    },
                };
                codec.encode(&key, index as u64, &message)
            })
            .collect();
        (Writer::new(FixedLog::new(key, None, blocks), 0), codec)
    }

    #[test]
    fn groups_are_handed_out_once_complete() {
        let (mut writer, codec) = writer_over(&[3, 2, 1, 2]);
        for length in 1..=3 {
            assert_eq!(writer.peek(&codec).unwrap().unwrap().length, length);
            assert!(writer.advance().is_some());
        }
        // The second group is missing its last node.
        assert!(writer.peek(&codec).unwrap().is_none());
    }

    #[test]
    fn broken_countdown_is_corruption() {
        let (mut writer, codec) = writer_over(&[3, 1]);
        assert!(matches!(
            writer.peek(&codec),
            Err(WriterError::Corruption {
                index: 1,
                batch: 1,
                expected: 2,
                ..
            })
        ));

        let (mut writer, codec) = writer_over(&[0]);
        assert!(matches!(
            writer.peek(&codec),
            Err(WriterError::Corruption { index: 0, .. })
        ));
    }
}
