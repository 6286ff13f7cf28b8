/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Point-in-time reads of a System log, without the materialized writer table.
//!
//! A `SystemReader` answers questions about the System as of some `length` by reading blocks
//! directly: the [`SystemInfo`] from the block at `length - 1`, and writer entries by scanning
//! backwards for the latest change to the writer. Blocks are obtained through a caller-provided
//! `fetch` function, so the same reader serves local checkouts (reading available blocks) and
//! fast-forward (waiting for blocks to be replicated).

use crate::types::data_types::LogKey;

use super::{
    types::{SystemBlock, SystemInfo, WriterInfo},
    SystemError,
};

pub(crate) struct SystemReader<F: FnMut(u64) -> Option<Vec<u8>>> {
    length: u64,
    fetch: F,
}

impl<F: FnMut(u64) -> Option<Vec<u8>>> SystemReader<F> {
    pub(crate) fn new(length: u64, fetch: F) -> Self {
        Self { length, fetch }
    }

    fn block(&mut self, index: u64) -> Result<SystemBlock, SystemError> {
        let bytes = (self.fetch)(index).ok_or(SystemError::BlockNotAvailable { index })?;
        SystemBlock::decode(index, &bytes)
    }

    /// The System info recorded by the last block, or the genesis info if `length == 0`.
    pub(crate) fn info(&mut self) -> Result<SystemInfo, SystemError> {
        if self.length == 0 {
            return Ok(SystemInfo::genesis());
        }
        Ok(self.block(self.length - 1)?.info)
    }

    /// The entry of `writer` as of `length`.
    pub(crate) fn get(&mut self, writer: &LogKey) -> Result<Option<WriterInfo>, SystemError> {
        for index in (0..self.length).rev() {
            let block = self.block(index)?;
            if let Ok(pos) = block
                .changes
                .binary_search_by(|change| change.key.cmp(writer))
            {
                return Ok(Some(block.changes[pos].next));
            }
        }
        Ok(None)
    }
}
