/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a base emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published
//! by the thread that drives the base (the caller of [`Base`](crate::base::Base) methods) and
//! handled on a separate event bus thread, so handlers never block updates.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::data_types::{Head, LogKey};

pub enum Event {
    // Events that change the linearized state.
    Append(AppendEvent),
    Apply(ApplyEvent),
    Truncate(TruncateEvent),
    Index(IndexEvent),
    Sign(SignEvent),
    // Membership events.
    AddWriter(AddWriterEvent),
    RemoveWriter(RemoveWriterEvent),
    UpdateIndexers(UpdateIndexersEvent),
    // Fast-forward events.
    StartFastForward(StartFastForwardEvent),
    EndFastForward(EndFastForwardEvent),
    // Events that halt the base.
    Interrupt(InterruptEvent),
    Error(ErrorEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away when the base is dropped.
            let _ = event_publisher.send(event);
        }
    }
}

/// The local writer appended `count` nodes, the last of which is `head`.
pub struct AppendEvent {
    pub timestamp: SystemTime,
    pub head: Head,
    pub count: usize,
}

/// `apply` was called with a batch of `count` nodes.
pub struct ApplyEvent {
    pub timestamp: SystemTime,
    pub count: usize,
    pub indexed: bool,
}

/// The unconfirmed suffix was undone down to System length `length`.
pub struct TruncateEvent {
    pub timestamp: SystemTime,
    pub length: u64,
    pub popped: usize,
}

/// The indexed System length advanced to `length`.
pub struct IndexEvent {
    pub timestamp: SystemTime,
    pub length: u64,
}

/// The log `key` was committed up to `length` with a quorum signature.
pub struct SignEvent {
    pub timestamp: SystemTime,
    pub key: LogKey,
    pub length: u64,
}

pub struct AddWriterEvent {
    pub timestamp: SystemTime,
    pub writer: LogKey,
    pub indexer: bool,
}

pub struct RemoveWriterEvent {
    pub timestamp: SystemTime,
    pub writer: LogKey,
}

/// Views migrated to the logs of a new indexer set.
pub struct UpdateIndexersEvent {
    pub timestamp: SystemTime,
    pub indexers: Vec<LogKey>,
    pub system_key: LogKey,
}

pub struct StartFastForwardEvent {
    pub timestamp: SystemTime,
    pub key: LogKey,
    pub length: u64,
}

/// A fast-forward ended. `length` is the adopted System length, or `None` if the target could not
/// be verified.
pub struct EndFastForwardEvent {
    pub timestamp: SystemTime,
    pub key: LogKey,
    pub length: Option<u64>,
}

pub struct InterruptEvent {
    pub timestamp: SystemTime,
    pub reason: String,
}

/// The base hit a fatal error and closed itself.
pub struct ErrorEvent {
    pub timestamp: SystemTime,
    pub error: String,
}
