/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Local, non-replicated state of a base, persisted in a user-provided key-value store.
//!
//! The System is itself an append log, which makes point lookups of writer entries a backwards scan.
//! To keep lookups on the hot path cheap, a base materializes the writer table of its System log into
//! the [`KVStore`](pluggables::KVStore) provided by the library user, along with a cursor recording
//! which System log (and up to which length) the table reflects. The table can always be rebuilt
//! from the System log, so it never needs to be replicated.

pub mod pluggables;

pub mod variables;

pub mod write_batch;
