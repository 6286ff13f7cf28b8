/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each local state variable is stored in the user-provided
//! key-value store.
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |System Key|[`LogKey`](crate::types::data_types::LogKey)|Key of the System log the writer table was materialized from.|
//! |System Length|[`u64`]|Length of the System log the writer table reflects.|
//! |Writers|[`LogKey`](crate::types::data_types::LogKey) -> [`WriterInfo`](crate::system::types::WriterInfo)|Membership entry of every writer the System has seen.|
//!
//! Single values are stored at their one-byte constant key. Mappings are stored at the concatenation
//! of the variable's one-byte prefix and the bytes of the mapping's key.

pub const SYSTEM_KEY: [u8; 1] = [0];
pub const SYSTEM_LENGTH: [u8; 1] = [1];
pub const WRITERS: [u8; 1] = [2];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and then
/// the bytes of the second one.
pub(crate) fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
