/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of a base.

use borsh::BorshSerialize;

pub mod crypto_primitives;

pub mod data_types;

pub mod indexer_set;

pub mod manifest;

pub mod messages;

pub mod multisig;

/// Borsh-serialize `value` into a fresh buffer.
pub(crate) fn encode<T: BorshSerialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writing into a `Vec` cannot fail.
    let _ = value.serialize(&mut bytes);
    bytes
}
