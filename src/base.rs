/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, open, and drive a base.
//!
//! A base is one peer's handle on a multi-writer causal log: it appends to the local writer's log,
//! reads the logs of every other writer, linearizes the DAG they form, and runs the user's
//! [`Applier`] over the linearized order to produce views.
//!
//! They key components of this module are:
//! - The builder-pattern interface to construct a [specification of the base](BaseSpec) with:
//!   1. `BaseSpec::builder` to construct a `BaseSpecBuilder`,
//!   2. The setters of the `BaseSpecBuilder`, and
//!   3. The `BaseSpecBuilder::build` method to construct a [BaseSpec],
//! - The function to [start](BaseSpec::start) a [Base] given its specification,
//! - [The type](Base) through which the library user appends, updates, and reads views.
//!
//! ## Driving a base
//!
//! A base does not spawn threads of its own (besides the event bus). Every method that changes its
//! state runs to completion on the caller's thread:
//! - [`append`](Base::append) and friends add local nodes, and immediately run an update.
//! - [`update`](Base::update) pulls whatever writer blocks have been replicated since the last call
//!   into the linearizer, and applies the change in order.
//! - [`poll_network`](Base::poll_network) consumes wakeup messages from peers.
//! - [`tick`](Base::tick) should be called periodically. It acks every few ticks, which is what makes
//!   indexers converge on a confirmed prefix when nobody is writing.
//!
//! ## Starting a base
//!
//! ```ignore
//! let base =
//!     BaseSpec::builder()
//!     .store(log_store)
//!     .kv_store(kv_store)
//!     .applier(applier)
//!     .network(network)
//!     .configuration(configuration)
//!     .on_index(index_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.store(...)`
//! - `.kv_store(...)`
//! - `.applier(...)`
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! `.encryption(...)`, and the setters that register user-defined event handlers for events from
//! [crate::events]: `.on_append(...)`, `.on_apply(...)`, `.on_truncate(...)`, `.on_index(...)`,
//! `.on_sign(...)`, `.on_add_writer(...)`, `.on_remove_writer(...)`, `.on_update_indexers(...)`,
//! `.on_start_fast_forward(...)`, `.on_end_fast_forward(...)`, `.on_interrupt(...)`, and
//! `.on_error(...)`.

use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, SystemTime},
};

use rand::Rng;
use typed_builder::TypedBuilder;

use crate::{
    append_log::{AppendLog, AppendLogError, LogStore},
    applier::Applier,
    apply_state::{ApplyState, ApplyStateError},
    config::Configuration,
    encryption::BlockEncryption,
    event_bus::*,
    events::*,
    fast_forward::FastForward,
    linearizer::{node::NodeData, CorruptionError, Linearizer, LinearizerError},
    local_state::pluggables::KVStore,
    networking::{Network, WakeupMessage},
    system::{
        types::{SystemInfo, WriterInfo},
        SystemError,
    },
    types::{
        crypto_primitives::Keypair,
        data_types::{Head, LogKey},
        indexer_set::IndexerSet,
        manifest::Manifest,
        messages::REFERRER,
    },
    view::ViewSnapshot,
    view_store::{ViewStore, ViewStoreError},
    writer::{OplogCodec, Writer, WriterError},
};

/// Stores all necessary parameters and trait implementations required to run a [Base].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [BaseSpec]. On the builder call the following methods to construct a valid [BaseSpec].

    Required:
    - `.store(...)`
    - `.kv_store(...)`
    - `.applier(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.encryption(...)`
    - `.on_append(...)`
    - `.on_apply(...)`
    - `.on_truncate(...)`
    - `.on_index(...)`
    - `.on_sign(...)`
    - `.on_add_writer(...)`
    - `.on_remove_writer(...)`
    - `.on_update_indexers(...)`
    - `.on_start_fast_forward(...)`
    - `.on_end_fast_forward(...)`
    - `.on_interrupt(...)`
    - `.on_error(...)`
"))]
pub struct BaseSpec<K: KVStore, S: LogStore, A: Applier, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the store that opens the append logs of writers and views. Required."))]
    store: S,
    #[builder(setter(doc = "Set the key-value store that holds the base's local state. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the application logic that turns linearized nodes into views. Required."))]
    applier: A,
    #[builder(setter(doc = "Set the implementation of wakeup gossip. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the base. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |encryption: impl BlockEncryption + 'static| Some(Arc::new(encryption) as Arc<dyn BlockEncryption>),
    doc = "Encrypt every oplog block with `encryption`. Optional."))]
    encryption: Option<Arc<dyn BlockEncryption>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AppendEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AppendEvent>),
    doc = "Register a handler closure to be invoked after the local writer appends. Optional."))]
    on_append: Option<HandlerPtr<AppendEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyEvent>),
    doc = "Register a handler closure to be invoked after a batch of nodes is applied. Optional."))]
    on_apply: Option<HandlerPtr<ApplyEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TruncateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TruncateEvent>),
    doc = "Register a handler closure to be invoked after unconfirmed nodes are undone. Optional."))]
    on_truncate: Option<HandlerPtr<TruncateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&IndexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<IndexEvent>),
    doc = "Register a handler closure to be invoked after the indexed length advances. Optional."))]
    on_index: Option<HandlerPtr<IndexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SignEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SignEvent>),
    doc = "Register a handler closure to be invoked after a log is committed with a quorum signature. Optional."))]
    on_sign: Option<HandlerPtr<SignEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AddWriterEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AddWriterEvent>),
    doc = "Register a handler closure to be invoked after a writer is added. Optional."))]
    on_add_writer: Option<HandlerPtr<AddWriterEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RemoveWriterEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RemoveWriterEvent>),
    doc = "Register a handler closure to be invoked after a writer is removed. Optional."))]
    on_remove_writer: Option<HandlerPtr<RemoveWriterEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateIndexersEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateIndexersEvent>),
    doc = "Register a handler closure to be invoked after views migrate to a new indexer set. Optional."))]
    on_update_indexers: Option<HandlerPtr<UpdateIndexersEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartFastForwardEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartFastForwardEvent>),
    doc = "Register a handler closure to be invoked when a fast-forward starts. Optional."))]
    on_start_fast_forward: Option<HandlerPtr<StartFastForwardEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndFastForwardEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndFastForwardEvent>),
    doc = "Register a handler closure to be invoked when a fast-forward ends. Optional."))]
    on_end_fast_forward: Option<HandlerPtr<EndFastForwardEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InterruptEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InterruptEvent>),
    doc = "Register a handler closure to be invoked when the applier interrupts the base. Optional."))]
    on_interrupt: Option<HandlerPtr<InterruptEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ErrorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ErrorEvent>),
    doc = "Register a handler closure to be invoked when the base closes on a fatal error. Optional."))]
    on_error: Option<HandlerPtr<ErrorEvent>>,
}

impl<K: KVStore, S: LogStore, A: Applier, N: Network + 'static> BaseSpec<K, S, A, N> {
    /// Open the local writer's log and the state its boot record points to, start the event bus,
    /// and return the [Base].
    pub fn start(mut self) -> Result<Base<K, S, A, N>, BaseError> {
        let configuration = self.configuration;
        let keypair = Keypair::new(configuration.me);
        let mut local = self.store.create(&Manifest::writer(&keypair.public()));
        let local_key = local.key();
        let bootstrap = configuration.bootstrap.unwrap_or(local_key);
        local.set_user_data(REFERRER, Some(bootstrap.bytes().to_vec()))?;

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_append,
            self.on_apply,
            self.on_truncate,
            self.on_index,
            self.on_sign,
            self.on_add_writer,
            self.on_remove_writer,
            self.on_update_indexers,
            self.on_start_fast_forward,
            self.on_end_fast_forward,
            self.on_interrupt,
            self.on_error,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let event_bus = match (event_subscriber, event_bus_shutdown_receiver) {
            (Some(event_subscriber), Some(shutdown_receiver)) => Some(start_event_bus(
                event_handlers,
                event_subscriber,
                shutdown_receiver,
            )),
            _ => None,
        };

        let encryption_id = self.encryption.as_ref().map(|encryption| encryption.id());
        let codec = OplogCodec::new(self.encryption);
        let view_store = ViewStore::new(self.store.clone(), bootstrap, encryption_id);
        let state = ApplyState::open(
            view_store,
            self.kv_store,
            local,
            keypair,
            codec.clone(),
            encryption_id,
            bootstrap,
            configuration.optimistic,
            self.applier.views(),
            event_publisher.clone(),
        )?;

        let mut base = Base {
            store: self.store,
            state,
            applier: self.applier,
            network: self.network,
            codec,
            linearizer: Linearizer::new(IndexerSet::new(), Vec::new(), []),
            writers: BTreeMap::new(),
            local_key,
            bootstrap,
            local_nodes: Vec::new(),
            optimistic: configuration.optimistic,
            fast_forward: configuration.fast_forward,
            fast_forward_minimum: configuration.fast_forward_minimum,
            fast_forward_timeout: configuration.fast_forward_timeout,
            ack_threshold: configuration.ack_threshold,
            ack_ticks: 0,
            ack_at: random_ack_threshold(configuration.ack_threshold),
            closed: false,
            event_publisher,
            event_bus,
            event_bus_shutdown,
        };
        base.reboot()?;
        Ok(base)
    }
}

/// A handle to an open base. When this value is dropped, the event bus thread is gracefully shut
/// down.
pub struct Base<K: KVStore, S: LogStore, A: Applier, N: Network + 'static> {
    store: S,
    state: ApplyState<K, S>,
    applier: A,
    network: N,
    codec: OplogCodec,
    linearizer: Linearizer,
    writers: BTreeMap<LogKey, Writer<S::Log>>,
    local_key: LogKey,
    bootstrap: LogKey,
    /// Nodes appended locally that have not been flushed to the local log yet.
    local_nodes: Vec<Arc<NodeData>>,
    optimistic: bool,
    fast_forward: bool,
    fast_forward_minimum: u64,
    fast_forward_timeout: Duration,
    ack_threshold: u64,
    ack_ticks: u64,
    ack_at: u64,
    closed: bool,
    event_publisher: Option<Sender<Event>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, S: LogStore, A: Applier, N: Network + 'static> Base<K, S, A, N> {
    /* ↓↓↓ Getters ↓↓↓ */

    /// Key of the bootstrap writer's log, which identifies the base.
    pub fn key(&self) -> LogKey {
        self.bootstrap
    }

    /// Key of the local writer's log.
    pub fn local_key(&self) -> LogKey {
        self.local_key
    }

    /// Whether the local writer is a member of the base, i.e., whether its appends are applied.
    pub fn writable(&self) -> bool {
        let bootstrapping =
            self.local_key == self.bootstrap && self.state.system().bootstrapping();
        let member = matches!(
            self.state.system().get(&self.local_key),
            Ok(Some(info)) if !info.is_removed
        );
        bootstrapping || member
    }

    /// Whether the local writer is an indexer of the indexed System.
    pub fn is_indexer(&self) -> bool {
        self.state.is_local_indexer()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn system_key(&self) -> LogKey {
        self.state.system().key()
    }

    /// Length of the System log that can no longer be reordered.
    pub fn indexed_length(&self) -> u64 {
        self.state.indexed_length()
    }

    pub fn system_length(&self) -> u64 {
        self.state.system().length()
    }

    pub fn system_signed_length(&self) -> u64 {
        self.state.system().log().signed_length()
    }

    /// The System state after the last applied node, including unconfirmed changes.
    pub fn system_info(&self) -> SystemInfo {
        self.state.system().info().clone()
    }

    /// The membership entry of `writer`, including unconfirmed changes.
    pub fn writer_info(&self, writer: &LogKey) -> Result<Option<WriterInfo>, BaseError> {
        Ok(self.state.system().get(writer)?)
    }

    /// Indexers of the indexed System.
    pub fn indexers(&self) -> Vec<LogKey> {
        self.state.indexers().to_vec()
    }

    /// Frontier of the DAG as known locally.
    pub fn heads(&self) -> Vec<Head> {
        self.linearizer.heads().to_vec()
    }

    /// A read-only snapshot of the view called `name`.
    pub fn view(&self, name: &str) -> Option<ViewSnapshot<S::Log>> {
        self.state
            .views()
            .iter()
            .find(|view| view.name == name)
            .map(|view| view.snapshot())
    }

    /// Whether the local writer should append an ack: either to help confirm pending nodes, or to
    /// publish a checkpoint as an indexer.
    pub fn should_ack(&self) -> bool {
        self.can_ack()
            && (self.linearizer.should_ack(&self.local_key) || self.state.should_write())
    }

    /// Whether the local writer may append acks. An indexer whose removal is not indexed yet keeps
    /// acking, since the removal may need its vote to be confirmed.
    fn can_ack(&self) -> bool {
        self.writable() || self.is_indexer()
    }

    /* ↓↓↓ Appending ↓↓↓ */

    /// Append `value` as a node of the local writer. Returns the head of the new node.
    pub fn append(&mut self, value: Vec<u8>) -> Result<Head, BaseError> {
        self.append_batch(vec![value])
    }

    /// Append `values` as one atomic group: they are always applied together, and in order.
    pub fn append_batch(&mut self, values: Vec<Vec<u8>>) -> Result<Head, BaseError> {
        self.check_open()?;
        if !self.writable() {
            return Err(BaseError::NotWritable);
        }
        self.append_nodes(values.into_iter().map(Some).collect(), false)
    }

    /// Append `value` even if the local writer is not a member. The node is applied on its own,
    /// and kept only if `apply` acknowledges the local writer.
    pub fn append_optimistic(&mut self, value: Vec<u8>) -> Result<Head, BaseError> {
        self.check_open()?;
        if !self.optimistic {
            return Err(BaseError::OptimisticDisabled);
        }
        self.append_nodes(vec![Some(value)], true)
    }

    /// Append an empty node if [`should_ack`](Self::should_ack). Returns whether a node was
    /// appended.
    pub fn ack(&mut self) -> Result<bool, BaseError> {
        self.check_open()?;
        if !self.should_ack() {
            return Ok(false);
        }
        self.append_nodes(vec![None], false)?;
        Ok(true)
    }

    /// Append an empty node regardless of whether one is needed.
    pub fn force_ack(&mut self) -> Result<(), BaseError> {
        self.check_open()?;
        if !self.can_ack() {
            return Err(BaseError::NotWritable);
        }
        self.append_nodes(vec![None], false)?;
        Ok(())
    }

    /// Append an empty node that links the whole current frontier, and return its head. Any node
    /// that links the anchor is ordered after everything the local base knows of now.
    pub fn create_anchor(&mut self) -> Result<Head, BaseError> {
        self.check_open()?;
        if !self.writable() {
            return Err(BaseError::NotWritable);
        }
        self.append_nodes(vec![None], false)
    }

    /// Count a tick, and ack once a random number of ticks between `t` and `2t` have passed
    /// since the last time. Returns whether a node was appended.
    pub fn tick(&mut self) -> Result<bool, BaseError> {
        self.check_open()?;
        self.ack_ticks += 1;
        if self.ack_ticks < self.ack_at {
            return Ok(false);
        }
        self.ack_ticks = 0;
        self.ack_at = random_ack_threshold(self.ack_threshold);
        self.ack()
    }

    fn append_nodes(
        &mut self,
        values: Vec<Option<Vec<u8>>>,
        optimistic: bool,
    ) -> Result<Head, BaseError> {
        let result = self.try_append_nodes(values, optimistic);
        self.fail_on_error(result)
    }

    fn try_append_nodes(
        &mut self,
        values: Vec<Option<Vec<u8>>>,
        optimistic: bool,
    ) -> Result<Head, BaseError> {
        // Link the latest heads that are available.
        self.drain_writers()?;

        let count = values.len();
        let heads: Vec<Head> = self
            .linearizer
            .heads()
            .iter()
            .filter(|head| head.key != self.local_key)
            .copied()
            .collect();
        let mut head = Head::new(self.local_key, self.linearizer.latest(&self.local_key));
        for (i, value) in values.into_iter().enumerate() {
            let node = NodeData {
                writer: self.local_key,
                length: head.length + 1,
                heads: if i == 0 { heads.clone() } else { Vec::new() },
                batch: (count - i) as u32,
                value,
                optimistic,
            };
            head = self.linearizer.add_head(node.clone())?;
            if let Some(writer) = self.writers.get_mut(&self.local_key) {
                writer.advance_local();
            }
            self.local_nodes.push(Arc::new(node));
        }
        if count == 0 {
            return Ok(head);
        }

        Event::publish(
            &self.event_publisher,
            Event::Append(AppendEvent {
                timestamp: SystemTime::now(),
                head,
                count,
            }),
        );
        self.network.broadcast(WakeupMessage { heads: vec![head] });

        self.run_update()?;
        Ok(head)
    }

    /* ↓↓↓ Updating ↓↓↓ */

    /// Linearize every writer block that is available locally, and apply the change in order.
    pub fn update(&mut self) -> Result<(), BaseError> {
        self.check_open()?;
        let result = self.run_update();
        self.fail_on_error(result)
    }

    /// Consume the wakeup messages peers have sent, then update if there were any. Returns the
    /// number of messages consumed.
    pub fn poll_network(&mut self) -> Result<usize, BaseError> {
        self.check_open()?;
        let mut count = 0;
        while let Some((origin, message)) = self.network.recv() {
            count += 1;
            log::debug!("Wakeup from {} with {} heads", origin, message.heads.len());
            if !self.optimistic {
                continue;
            }
            for head in message.heads {
                if !self.writers.contains_key(&head.key) {
                    let result = self.open_writer(&head.key);
                    self.fail_on_error(result)?;
                }
            }
        }
        if count > 0 {
            self.update()?;
        }
        Ok(count)
    }

    /// Try to jump to the System log `key` at its signed length. Returns whether the base now
    /// follows that System; on `false`, nothing changed and the base keeps updating normally.
    pub fn fast_forward(&mut self, key: LogKey, force: bool) -> Result<bool, BaseError> {
        self.check_open()?;
        let result = self.run_fast_forward(key, force);
        self.fail_on_error(result)
    }

    /// Close the base. Every later call that would change it fails with [`BaseError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn run_update(&mut self) -> Result<(), BaseError> {
        loop {
            if let Some(key) = self.state.take_system_upgrade() {
                if self.fast_forward {
                    self.run_fast_forward(key, true)?;
                } else {
                    log::debug!("A quorum of indexers moved to System {}", key);
                }
            }
            if !self.update_once()? {
                return Ok(());
            }
        }
    }

    /// Run one round of the update loop. Returns whether another round may make progress.
    fn update_once(&mut self) -> Result<bool, BaseError> {
        self.drain_writers()?;
        let local = mem::take(&mut self.local_nodes);

        let update = match self.linearizer.update() {
            Some(update) => update,
            None => {
                if !local.is_empty() {
                    self.state.flush(&local)?;
                }
                return self.refresh_writers();
            }
        };

        match self.state.update(&update, &mut self.applier, &local) {
            Ok(false) => {}
            Ok(true) => {
                self.state.reset()?;
                self.reboot()?;
            }
            Err(ApplyStateError::ViewStoreError(ViewStoreError::MissingManifest { writer })) => {
                // Views cannot move to the new indexer set until its manifests are replicated.
                log::debug!("Waiting for the manifest of {} to derive views", writer);
                self.state.reset()?;
                self.state.flush(&local)?;
                self.reboot()?;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        self.refresh_writers()?;
        Ok(true)
    }

    /// Feed every node that is available in writers' logs to the linearizer, opening writers
    /// that nodes depend on.
    fn drain_writers(&mut self) -> Result<bool, BaseError> {
        let mut added = false;
        loop {
            let mut progress = false;
            let keys: Vec<LogKey> = self.writers.keys().copied().collect();
            for key in keys {
                loop {
                    let node = match self.writers.get_mut(&key) {
                        Some(writer) => match writer.peek(&self.codec)? {
                            Some(node) => node.clone(),
                            None => break,
                        },
                        None => break,
                    };

                    if self.linearizer.contains(&node.head()) {
                        if let Some(writer) = self.writers.get_mut(&key) {
                            writer.advance();
                        }
                        continue;
                    }

                    match self.linearizer.add_head(node) {
                        Ok(_) => {
                            if let Some(writer) = self.writers.get_mut(&key) {
                                writer.advance();
                            }
                            progress = true;
                            added = true;
                        }
                        Err(LinearizerError::MissingDependency { dependency, .. }) => {
                            if !self.writers.contains_key(&dependency.key) {
                                self.open_writer(&dependency.key)?;
                                progress = true;
                            }
                            break;
                        }
                        Err(LinearizerError::Corruption(err)) => {
                            return Err(BaseError::Corruption(err))
                        }
                    }
                }
            }
            if !progress {
                return Ok(added);
            }
        }
    }

    /// Open writers that became members. Returns whether any was opened.
    fn refresh_writers(&mut self) -> Result<bool, BaseError> {
        let members = self.state.system().info().writers.clone();
        let mut opened = false;
        for key in members {
            if !self.writers.contains_key(&key) {
                self.open_writer(&key)?;
                opened = true;
            }
        }
        Ok(opened)
    }

    fn open_writer(&mut self, key: &LogKey) -> Result<(), BaseError> {
        let consumed = self
            .state
            .system()
            .get(key)?
            .map(|info| info.length)
            .unwrap_or(0);
        self.linearizer.init_writer(key, consumed);
        let length = self.linearizer.latest(key);
        self.writers
            .insert(*key, Writer::new(self.store.open(key), length));
        Ok(())
    }

    /// Rebuild the linearizer and writers from the indexed System.
    fn reboot(&mut self) -> Result<(), BaseError> {
        let info = self.state.system().info().clone();
        let indexers: IndexerSet = if info.indexers.is_empty() {
            [self.bootstrap].into_iter().collect()
        } else {
            info.indexer_set()
        };

        let mut keys: BTreeSet<LogKey> = info.writers.iter().copied().collect();
        keys.insert(self.local_key);
        keys.insert(self.bootstrap);
        keys.extend(info.heads.iter().map(|head| head.key));
        keys.extend(info.indexers.iter().map(|head| head.key));
        keys.extend(self.writers.keys().copied());

        let mut previous = mem::take(&mut self.writers);
        let mut yielded = Vec::with_capacity(keys.len());
        for key in keys {
            let length = self
                .state
                .system()
                .get(&key)?
                .map(|info| info.length)
                .unwrap_or(0);
            let writer = match previous.remove(&key) {
                Some(mut writer) => {
                    writer.reset(length);
                    writer
                }
                None => Writer::new(self.store.open(&key), length),
            };
            self.writers.insert(key, writer);
            yielded.push((key, length));
        }

        self.linearizer = Linearizer::new(indexers, info.heads.clone(), yielded);
        Ok(())
    }

    fn run_fast_forward(&mut self, key: LogKey, force: bool) -> Result<bool, BaseError> {
        // Nodes appended locally must be in the local log before the linearizer is rebuilt.
        let local = mem::take(&mut self.local_nodes);
        if !local.is_empty() {
            self.state.flush(&local)?;
        }

        let local_length = self.state.indexed_length();
        Event::publish(
            &self.event_publisher,
            Event::StartFastForward(StartFastForwardEvent {
                timestamp: SystemTime::now(),
                key,
                length: local_length,
            }),
        );

        let mut fast_forward = FastForward::new(
            self.store.clone(),
            key,
            self.fast_forward_timeout,
            self.fast_forward_minimum,
        );
        let upgrade = fast_forward.upgrade(
            local_length,
            &self.state.system().key(),
            &self.local_key,
            force,
        );
        let length = match upgrade {
            Some(descriptor) => {
                log::info!(
                    "Fast-forwarding to {} at {}, local writer entry: {:?}",
                    descriptor.key,
                    descriptor.length,
                    descriptor.local
                );
                let system = self.store.open(&descriptor.key);
                self.state.adopt(system, &descriptor)?;
                self.reboot()?;
                Some(descriptor.length)
            }
            None => None,
        };

        Event::publish(
            &self.event_publisher,
            Event::EndFastForward(EndFastForwardEvent {
                timestamp: SystemTime::now(),
                key,
                length,
            }),
        );
        Ok(length.is_some())
    }

    fn check_open(&self) -> Result<(), BaseError> {
        if self.closed {
            Err(BaseError::Closed)
        } else {
            Ok(())
        }
    }

    /// Close the base if `result` is a fatal error, publishing it.
    fn fail_on_error<T>(&mut self, result: Result<T, BaseError>) -> Result<T, BaseError> {
        let event = match &result {
            Ok(_)
            | Err(BaseError::Closed)
            | Err(BaseError::NotWritable)
            | Err(BaseError::OptimisticDisabled) => return result,
            Err(BaseError::Interrupted { reason }) => Event::Interrupt(InterruptEvent {
                timestamp: SystemTime::now(),
                reason: reason.clone(),
            }),
            Err(err) => {
                log::warn!("Closing base {} on error: {:?}", self.bootstrap, err);
                Event::Error(ErrorEvent {
                    timestamp: SystemTime::now(),
                    error: format!("{:?}", err),
                })
            }
        };
        Event::publish(&self.event_publisher, event);
        self.closed = true;
        result
    }
}

impl<K: KVStore, S: LogStore, A: Applier, N: Network + 'static> Drop for Base<K, S, A, N> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

fn random_ack_threshold(threshold: u64) -> u64 {
    let threshold = threshold.max(1);
    rand::thread_rng().gen_range(threshold, 2 * threshold + 1)
}

#[derive(Debug)]
pub enum BaseError {
    /// The base was closed, either by the user or by a fatal error.
    Closed,
    /// The local writer is not a member of the base.
    NotWritable,
    /// Optimistic appends are not enabled in the configuration.
    OptimisticDisabled,
    /// A writer's block, the System, or the local state was written by a newer version of this
    /// crate.
    UpgradeRequired { version: u32 },
    /// A writer's log contradicts the DAG built from it so far.
    Corruption(CorruptionError),
    /// The applier interrupted the base.
    Interrupted { reason: String },
    LinearizerError(LinearizerError),
    ApplyStateError(ApplyStateError),
}

impl From<ApplyStateError> for BaseError {
    fn from(value: ApplyStateError) -> Self {
        match value {
            ApplyStateError::Interrupted { reason } => BaseError::Interrupted { reason },
            ApplyStateError::UpgradeRequired { version }
            | ApplyStateError::WriterError(WriterError::UpgradeRequired { version, .. })
            | ApplyStateError::SystemError(SystemError::UpgradeRequired { version }) => {
                BaseError::UpgradeRequired { version }
            }
            value => BaseError::ApplyStateError(value),
        }
    }
}

impl From<SystemError> for BaseError {
    fn from(value: SystemError) -> Self {
        BaseError::from(ApplyStateError::from(value))
    }
}

impl From<WriterError> for BaseError {
    fn from(value: WriterError) -> Self {
        BaseError::from(ApplyStateError::from(value))
    }
}

impl From<AppendLogError> for BaseError {
    fn from(value: AppendLogError) -> Self {
        BaseError::from(ApplyStateError::from(value))
    }
}

impl From<LinearizerError> for BaseError {
    fn from(value: LinearizerError) -> Self {
        match value {
            LinearizerError::Corruption(err) => BaseError::Corruption(err),
            value => BaseError::LinearizerError(value),
        }
    }
}
