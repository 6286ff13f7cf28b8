/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the base's
//! [config](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [Sign](crate::events::SignEvent) is printed:
//!
//! ```text
//! Sign, 1701329264, fNGCJyk, 12
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the key of the signed
//!   log.
//! - The fourth value is the length the log was signed at.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const APPEND: &str = "Append";
pub const APPLY: &str = "Apply";
pub const TRUNCATE: &str = "Truncate";
pub const INDEX: &str = "Index";
pub const SIGN: &str = "Sign";

pub const ADD_WRITER: &str = "AddWriter";
pub const REMOVE_WRITER: &str = "RemoveWriter";
pub const UPDATE_INDEXERS: &str = "UpdateIndexers";

pub const START_FAST_FORWARD: &str = "StartFastForward";
pub const END_FAST_FORWARD: &str = "EndFastForward";

pub const INTERRUPT: &str = "Interrupt";
pub const ERROR: &str = "Error";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AppendEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |append_event: &AppendEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                APPEND,
                secs_since_unix_epoch(append_event.timestamp),
                first_seven_base64_chars(&append_event.head.key.bytes()),
                append_event.head.length,
                append_event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_event: &ApplyEvent| {
            log::info!(
                "{}, {}, {}, {}",
                APPLY,
                secs_since_unix_epoch(apply_event.timestamp),
                apply_event.count,
                apply_event.indexed
            )
        };
        Box::new(logger)
    }
}

impl Logger for TruncateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |truncate_event: &TruncateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                TRUNCATE,
                secs_since_unix_epoch(truncate_event.timestamp),
                truncate_event.length,
                truncate_event.popped
            )
        };
        Box::new(logger)
    }
}

impl Logger for IndexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |index_event: &IndexEvent| {
            log::info!(
                "{}, {}, {}",
                INDEX,
                secs_since_unix_epoch(index_event.timestamp),
                index_event.length
            )
        };
        Box::new(logger)
    }
}

impl Logger for SignEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |sign_event: &SignEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SIGN,
                secs_since_unix_epoch(sign_event.timestamp),
                first_seven_base64_chars(&sign_event.key.bytes()),
                sign_event.length
            )
        };
        Box::new(logger)
    }
}

impl Logger for AddWriterEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |add_writer_event: &AddWriterEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADD_WRITER,
                secs_since_unix_epoch(add_writer_event.timestamp),
                first_seven_base64_chars(&add_writer_event.writer.bytes()),
                add_writer_event.indexer
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemoveWriterEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |remove_writer_event: &RemoveWriterEvent| {
            log::info!(
                "{}, {}, {}",
                REMOVE_WRITER,
                secs_since_unix_epoch(remove_writer_event.timestamp),
                first_seven_base64_chars(&remove_writer_event.writer.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateIndexersEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_indexers_event: &UpdateIndexersEvent| {
            let indexers = update_indexers_event
                .indexers
                .iter()
                .map(|indexer| first_seven_base64_chars(&indexer.bytes()))
                .collect::<Vec<_>>()
                .join(" ");
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_INDEXERS,
                secs_since_unix_epoch(update_indexers_event.timestamp),
                first_seven_base64_chars(&update_indexers_event.system_key.bytes()),
                indexers
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartFastForwardEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_fast_forward_event: &StartFastForwardEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_FAST_FORWARD,
                secs_since_unix_epoch(start_fast_forward_event.timestamp),
                first_seven_base64_chars(&start_fast_forward_event.key.bytes()),
                start_fast_forward_event.length
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndFastForwardEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_fast_forward_event: &EndFastForwardEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_FAST_FORWARD,
                secs_since_unix_epoch(end_fast_forward_event.timestamp),
                first_seven_base64_chars(&end_fast_forward_event.key.bytes()),
                match end_fast_forward_event.length {
                    Some(length) => length.to_string(),
                    None => String::from("aborted"),
                }
            )
        };
        Box::new(logger)
    }
}

impl Logger for InterruptEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |interrupt_event: &InterruptEvent| {
            log::warn!(
                "{}, {}, {}",
                INTERRUPT,
                secs_since_unix_epoch(interrupt_event.timestamp),
                interrupt_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ErrorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |error_event: &ErrorEvent| {
            log::error!(
                "{}, {}, {}",
                ERROR,
                secs_since_unix_epoch(error_event.timestamp),
                error_event.error
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
