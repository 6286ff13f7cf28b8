/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Parameters of a base, as chosen by the library user.
//!
//! The configuration can be defined using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(keypair)
//!     .bootstrap(Some(bootstrap_key))
//!     .optimistic(true)
//!     .log_events(true)
//!     .build()
//! ```

use std::time::Duration;

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::types::data_types::LogKey;

/// Stores the user-defined parameters required to start a base, that is:
/// 1. The base's [keypair](ed25519_dalek::SigningKey), which signs the local writer's log and, if the
///    local writer is an indexer, its checkpoints.
/// 2. The key of the bootstrap writer's log, which identifies the base. `None` makes the local
///    writer the bootstrap writer.
/// 3. Whether nodes of writers that are not members may be applied optimistically.
/// 4. Whether the base may fast-forward to a System that a quorum of indexers moved to.
/// 5. The minimum number of blocks a fast-forward target must be ahead of the local System.
/// 6. How long a fast-forward waits for a block before giving up.
/// 7. The ack threshold, `t`: [`tick`](crate::base::Base::tick) acks after a random number of ticks
///    between `t` and `2t`.
/// 8. The "Log Events" flag, if set to "true" then events are logged.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.log_events(...)`

    Optional:
    - `.bootstrap(...)`
    - `.optimistic(...)`
    - `.fast_forward(...)`
    - `.fast_forward_minimum(...)`
    - `.fast_forward_timeout(...)`
    - `.ack_threshold(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the keypair of the local writer. Required."))]
    pub me: SigningKey,
    #[builder(
        default,
        setter(doc = "Set the key of the bootstrap writer's log. Defaults to the local writer.")
    )]
    pub bootstrap: Option<LogKey>,
    #[builder(
        default = false,
        setter(doc = "Allow optimistic appends by writers that are not members. Defaults to false.")
    )]
    pub optimistic: bool,
    #[builder(
        default = false,
        setter(doc = "Fast-forward to a System that a quorum of indexers moved to. Defaults to false.")
    )]
    pub fast_forward: bool,
    #[builder(
        default = 16,
        setter(doc = "Set how many blocks a fast-forward target must be ahead by. Defaults to 16.")
    )]
    pub fast_forward_minimum: u64,
    #[builder(
        default = Duration::from_millis(5000),
        setter(doc = "Set how long a fast-forward waits for a block. Defaults to 5 seconds.")
    )]
    pub fast_forward_timeout: Duration,
    #[builder(
        default = 10,
        setter(doc = "Set the number of ticks between automatic acks. Defaults to 10.")
    )]
    pub ack_threshold: u64,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}
