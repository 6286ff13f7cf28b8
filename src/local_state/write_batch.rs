/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed setters over a [`WriteBatch`].

use borsh::BorshSerialize;

use crate::{system::types::WriterInfo, types::data_types::LogKey};

use super::{
    pluggables::{KVSetError, Key, WriteBatch},
    variables::{self, concat},
};

pub(crate) struct LocalStateWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> LocalStateWriteBatch<W> {
    pub(crate) fn new() -> LocalStateWriteBatch<W> {
        LocalStateWriteBatch(W::new())
    }

    pub(crate) fn set_system_key(&mut self, key: &LogKey) -> Result<(), KVSetError> {
        self.0.set(
            &variables::SYSTEM_KEY,
            &key.try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::SystemKey,
                    source: err,
                })?,
        );
        Ok(())
    }

    pub(crate) fn set_system_length(&mut self, length: u64) -> Result<(), KVSetError> {
        self.0.set(
            &variables::SYSTEM_LENGTH,
            &length
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::SystemLength,
                    source: err,
                })?,
        );
        Ok(())
    }

    pub(crate) fn set_writer(
        &mut self,
        writer: &LogKey,
        info: &WriterInfo,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::WRITERS, &writer.bytes()),
            &info
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::Writer { writer: *writer },
                    source: err,
                })?,
        );
        Ok(())
    }

    pub(crate) fn delete_writer(&mut self, writer: &LogKey) {
        self.0.delete(&concat(&variables::WRITERS, &writer.bytes()))
    }
}
