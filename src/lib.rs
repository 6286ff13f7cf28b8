/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A multi-writer causal log database.
//!
//! Many peers each append to their own log (a *writer*). Every node a writer appends links the
//! heads of the other writers it had seen, so together the writers' logs form a causal DAG. A
//! [base](base::Base) linearizes this DAG deterministically, runs a user-provided
//! [`Applier`](applier::Applier) over the linearized order to produce *views*, and records
//! membership and view lengths in a metadata log called the *System*.
//!
//! A subset of the writers, the *indexers*, decide which prefix of the order is final: a node is
//! *indexed* once a majority of the indexers have built on it, and views are *signed* once a
//! majority of the indexers have published checkpoints over the same content. Changing the indexer
//! set moves every view onto a new log whose identity commits to the old content, and a lagging
//! peer can jump straight to a System that a quorum has signed instead of replaying history.
//!
//! ## Pluggable collaborators
//!
//! A base does not do storage, replication, or networking itself. The library user provides:
//! - An [append log store](append_log::LogStore), which persists and replicates writer, view and
//!   System logs.
//! - A [key-value store](local_state::pluggables::KVStore), which holds local, non-replicated state.
//! - A [network](networking::Network), through which peers wake each other up.
//! - Optionally, [block encryption](encryption::BlockEncryption).
//!
//! ## Getting started
//!
//! See [base] for how to build and start a base, and [applier] for how to write the logic that
//! produces views.

pub mod applier;

pub mod append_log;

pub(crate) mod apply_state;

pub mod base;

pub(crate) mod checkpoint;

pub mod config;

pub mod encryption;

pub(crate) mod event_bus;

pub mod events;

pub mod fast_forward;

pub mod linearizer;

pub mod local_state;

pub mod logging;

pub(crate) mod migration;

pub mod networking;

pub(crate) mod signer;

pub mod system;

pub mod types;

pub mod view;

pub(crate) mod view_store;

pub(crate) mod writer;

pub use apply_state::ApplyStateError;
pub use migration::MigrationError;
pub use view_store::{ViewStoreError, SYSTEM_VIEW_NAME};
pub use writer::WriterError;
