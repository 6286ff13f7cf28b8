/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable local state persistence.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::{system::types::WriterInfo, types::data_types::LogKey};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ System cursor ↓↓↓ */

    fn system_key(&self) -> Result<Option<LogKey>, KVGetError> {
        if let Some(bytes) = self.get(&variables::SYSTEM_KEY) {
            Ok(Some(LogKey::deserialize(&mut bytes.as_slice()).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::SystemKey,
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    fn system_length(&self) -> Result<u64, KVGetError> {
        if let Some(bytes) = self.get(&variables::SYSTEM_LENGTH) {
            u64::deserialize(&mut bytes.as_slice()).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::SystemLength,
                    source: err,
                }
            })
        } else {
            Ok(0)
        }
    }

    /* ↓↓↓ Writers ↓↓↓ */

    fn writer(&self, writer: &LogKey) -> Result<Option<WriterInfo>, KVGetError> {
        if let Some(bytes) = self.get(&concat(&variables::WRITERS, &writer.bytes())) {
            Ok(Some(WriterInfo::deserialize(&mut bytes.as_slice()).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::Writer { writer: *writer },
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
}

#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    SystemKey,
    SystemLength,
    Writer { writer: LogKey },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::SystemKey => write!(f, "System Key"),
            &Key::SystemLength => write!(f, "System Length"),
            &Key::Writer { writer } => write!(f, "Writer entry for writer {}", writer),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
