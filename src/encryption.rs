/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable encryption-at-rest of writer blocks.
//!
//! When a base is configured with a [`BlockEncryption`], every oplog block is encrypted before it is
//! appended to the local log and decrypted after it is read from any writer's log. All peers of a
//! base must be configured with the same encryption.

use crate::types::data_types::{CryptoHash, LogKey};

pub trait BlockEncryption: Send + Sync {
    /// Identifies the key material. Mixed into view namespaces, so peers with different
    /// encryption produce different views.
    fn id(&self) -> CryptoHash;

    /// Encrypt the plaintext `block` that will be stored at `index` of log `key`.
    fn encrypt(&self, key: &LogKey, index: u64, block: &[u8]) -> Vec<u8>;

    /// Decrypt the ciphertext `block` stored at `index` of log `key`.
    fn decrypt(&self, key: &LogKey, index: u64, block: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionError {
    pub key: LogKey,
    pub index: u64,
}
