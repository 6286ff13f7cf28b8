/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable wakeup gossip between the peers of a base.
//!
//! Blocks themselves are replicated by the [append log](crate::append_log) collaborator. The only
//! thing peers tell each other directly is which heads they have just appended, so that a peer can
//! open writers it did not know about (when optimistic appends are enabled) and run an update
//! without waiting for its next scheduled one.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{Head, LogKey};

pub trait Network: Clone + Send {
    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: WakeupMessage);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: LogKey, message: WakeupMessage);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(LogKey, WakeupMessage)>;
}

/// Heads a peer has recently appended.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct WakeupMessage {
    pub heads: Vec<Head>,
}

/// A [`Network`] for bases that have no peers to gossip with.
#[derive(Clone, Copy, Default)]
pub struct LocalOnly;

impl Network for LocalOnly {
    fn broadcast(&mut self, _: WakeupMessage) {}

    fn send(&mut self, _: LogKey, _: WakeupMessage) {}

    fn recv(&mut self) -> Option<(LogKey, WakeupMessage)> {
        None
    }
}
