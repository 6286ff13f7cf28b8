/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The apply-and-index loop: turning linearizer updates into view content, System blocks,
//! checkpoints, and signatures.
//!
//! ## Updates ledger
//!
//! Every boundary (the last node of an atomic group) applied since the indexed System length gets
//! an entry in an in-memory ledger, recording how many nodes it consumed, whether it changed the
//! indexer set, and the System length after it was flushed. The ledger is how a linearizer update
//! is mapped back onto the System:
//! - Undoing `n` nodes pops entries until `n` nodes are covered, and truncates the System and every
//!   view to the System length recorded by the entry before them.
//! - Indexing `n` nodes shifts entries off the front of the ledger, and the indexed System length
//!   becomes the System length recorded by the last entry shifted.
//!
//! Indexing never advances past the boundary that changed the indexer set. The caller is expected
//! to [`reset`](ApplyState::reset) the state (and rebuild its linearizer) when [`update`]
//! reports such a change, which migrates every view to the new indexer set.
//!
//! [`update`]: ApplyState::update

use std::{
    collections::BTreeMap,
    io,
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use borsh::BorshDeserialize;

use crate::{
    append_log::{AppendLog, AppendLogError, LogStore},
    applier::{ApplyCalls, ApplyEffects, ApplyError, ApplyNode, Applier},
    checkpoint::{compress, compress_digest, CheckpointLog},
    events::{
        AddWriterEvent, ApplyEvent, Event, IndexEvent, RemoveWriterEvent, SignEvent,
        TruncateEvent, UpdateIndexersEvent,
    },
    fast_forward::FastForwardDescriptor,
    linearizer::{LinearizerUpdate, NodeData},
    local_state::pluggables::KVStore,
    migration::{Migration, MigrationError},
    signer::Signer,
    system::{types::ViewEntry, SystemError, SystemView},
    types::{
        crypto_primitives::Keypair,
        data_types::{CryptoHash, LogKey},
        encode,
        indexer_set::quorum,
        manifest::Prologue,
        messages::{
            BootRecord, Checkpoint, NodeRecord, OplogMessage, BOOT_RECORD, MAX_SUPPORTED_VERSION,
            PROTOCOL_VERSION,
        },
        multisig::signable,
    },
    view::{ViewState, Views},
    view_store::{ViewStore, ViewStoreError, SYSTEM_VIEW_NAME},
    writer::{OplogCodec, WriterError},
};

/// An indexer publishes a checkpoint at the latest once the indexed length is this many blocks
/// (per indexer) past its last one.
pub const SHOULD_WRITE_THRESHOLD: u64 = 16;

/// One applied boundary.
#[derive(Clone, Copy, Debug)]
struct UpdateRecord {
    /// Number of nodes the boundary consumed.
    batch: usize,
    /// Whether the boundary changed the indexer set.
    indexers: bool,
    /// System length after the boundary was flushed.
    system_length: u64,
}

pub(crate) struct ApplyState<K: KVStore, S: LogStore> {
    view_store: ViewStore<S>,
    system: SystemView<K, S::Log>,
    views: Vec<ViewState<S::Log>>,
    local: S::Log,
    keypair: Keypair,
    codec: OplogCodec,
    bootstrap: LogKey,
    optimistic: bool,
    updates: Vec<UpdateRecord>,
    indexed_length: u64,
    /// Whether the indexed System contains an indexer-set change the views have not migrated to.
    indexers_updated: bool,
    /// Indexers of the indexed System, in manifest order.
    indexers: Vec<LogKey>,
    local_checkpoint: CheckpointLog<S::Log>,
    checkpoints: Vec<CheckpointLog<S::Log>>,
    /// One signer per signed log: the System first, then every view.
    signers: Vec<Signer>,
    system_upgrade: Option<LogKey>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, S: LogStore> ApplyState<K, S> {
    /// Open the state recorded by the boot record of `local`, or a fresh state if there is none.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        mut view_store: ViewStore<S>,
        kv_store: K,
        local: S::Log,
        keypair: Keypair,
        codec: OplogCodec,
        encryption: Option<CryptoHash>,
        bootstrap: LogKey,
        optimistic: bool,
        view_names: Vec<String>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, ApplyStateError> {
        let boot_record = match local.user_data(BOOT_RECORD) {
            Some(bytes) => Some(BootRecord::try_from_slice(&bytes).map_err(|err: io::Error| {
                ApplyStateError::DeserializeBootRecordError { source: err }
            })?),
            None => None,
        };
        if let Some(record) = &boot_record {
            if record.version > MAX_SUPPORTED_VERSION {
                return Err(ApplyStateError::UpgradeRequired {
                    version: record.version,
                });
            }
        }

        let system_log = view_store.open_view(boot_record.map(|r| r.key).as_ref(), SYSTEM_VIEW_NAME);
        let interrupted = boot_record.map(|r| r.fast_forwarding).unwrap_or(false);
        if interrupted {
            log::warn!("A fast-forward was interrupted, reopening the previous System");
        }
        let system = SystemView::open(system_log, kv_store, encryption, interrupted)?;
        let indexed_length = boot_record
            .map(|r| r.indexed_length)
            .unwrap_or(0)
            .min(system.length());
        let indexers_updated = boot_record.map(|r| r.indexers_updated).unwrap_or(false);

        let info = system.get_indexed_info(indexed_length)?;
        let mut views = Vec::with_capacity(view_names.len());
        for name in view_names {
            let log = match info.view(&name) {
                Some(entry) => view_store.open(&entry.key),
                None => {
                    let manifest = view_store.view_manifest(&info.indexer_set(), &name, None)?;
                    view_store.create(&manifest)
                }
            };
            views.push(ViewState::new(name, log));
        }

        let local_checkpoint = CheckpointLog::new(local.clone());
        let mut state = ApplyState {
            view_store,
            system,
            views,
            local,
            keypair,
            codec,
            bootstrap,
            optimistic,
            updates: Vec::new(),
            indexed_length,
            indexers_updated,
            indexers: Vec::new(),
            local_checkpoint,
            checkpoints: Vec::new(),
            signers: Vec::new(),
            system_upgrade: None,
            event_publisher,
        };
        state.reset()?;
        Ok(state)
    }

    /* ↓↓↓ Getters ↓↓↓ */

    pub(crate) fn system(&self) -> &SystemView<K, S::Log> {
        &self.system
    }

    pub(crate) fn views(&self) -> &[ViewState<S::Log>] {
        &self.views
    }

    pub(crate) fn indexed_length(&self) -> u64 {
        self.indexed_length
    }

    /// Indexers of the indexed System.
    pub(crate) fn indexers(&self) -> &[LogKey] {
        &self.indexers
    }

    pub(crate) fn is_local_indexer(&self) -> bool {
        self.indexers.contains(&self.local.key())
    }

    /// A System key that a quorum of indexers moved to, which this base has not.
    pub(crate) fn take_system_upgrade(&mut self) -> Option<LogKey> {
        self.system_upgrade.take()
    }

    /// Whether the local indexer is due to publish a checkpoint.
    pub(crate) fn should_write(&self) -> bool {
        if !self.is_local_indexer() || self.indexed_length == 0 {
            return false;
        }
        if self.local_checkpoint.digest_key() != Some(self.system.key()) {
            return true;
        }
        let signed = self.local_checkpoint.signed_length();
        self.indexed_length > signed
            && self.indexed_length - signed >= SHOULD_WRITE_THRESHOLD * self.indexers.len() as u64
    }

    /* ↓↓↓ Resetting ↓↓↓ */

    /// Discard everything beyond the indexed length, migrate the views if the indexed System changed
    /// the indexer set, and reload the indexers' checkpoint logs.
    pub(crate) fn reset(&mut self) -> Result<(), ApplyStateError> {
        self.updates.clear();
        self.truncate(self.indexed_length)?;
        if self.indexers_updated {
            self.migrate()?;
        }

        let info = self.system.info().clone();
        for view in self.views.iter_mut() {
            view.indexed_length = info.view(&view.name).map(|entry| entry.length).unwrap_or(0);
        }
        let indexers: Vec<LogKey> = info.indexer_set().iter().copied().collect();
        if indexers != self.indexers {
            self.checkpoints = indexers
                .iter()
                .map(|indexer| CheckpointLog::new(self.view_store.open(indexer)))
                .collect();
            self.signers = Vec::new();
            self.indexers = indexers;
        }
        self.signers.resize_with(self.views.len() + 1, Signer::new);
        self.write_boot_record(false)?;
        Ok(())
    }

    /// Move every view, and then the System, onto logs signed by the indexers of the indexed System.
    fn migrate(&mut self) -> Result<(), ApplyStateError> {
        let info = self.system.info().clone();
        let mut migration = Migration::new(&mut self.view_store, info.indexer_set());
        for view in self.views.iter_mut() {
            let (length, expected) = match info.view(&view.name) {
                Some(entry) => (entry.length, Some(entry.key)),
                None => (view.log.length(), None),
            };
            let log = migration.migrate(&view.name, &view.log, length, expected.as_ref())?;
            view.replace_log(log);
        }
        let next = migration.migrate(
            SYSTEM_VIEW_NAME,
            self.system.log(),
            self.indexed_length,
            None,
        )?;
        self.system.migrate(next)?;
        self.indexers_updated = false;

        Event::publish(
            &self.event_publisher,
            Event::UpdateIndexers(UpdateIndexersEvent {
                timestamp: SystemTime::now(),
                indexers: info.indexer_set().iter().copied().collect(),
                system_key: self.system.key(),
            }),
        );
        Ok(())
    }

    /// Adopt the System (and views) that a fast-forward verified. The boot record is marked as
    /// fast-forwarding until the adopted state is recorded, so a crash in between reopens the
    /// previous System with a rebuilt writer table.
    pub(crate) fn adopt(
        &mut self,
        system: S::Log,
        descriptor: &FastForwardDescriptor,
    ) -> Result<(), ApplyStateError> {
        self.write_boot_record(true)?;
        self.system
            .adopt(system, descriptor.length, &descriptor.writers)?;
        for view in self.views.iter_mut() {
            if let Some(entry) = descriptor
                .views
                .iter()
                .find(|entry| entry.name == view.name)
            {
                view.replace_log(self.view_store.open(&entry.key));
            }
        }
        self.indexed_length = descriptor.length;
        self.indexers_updated = false;
        self.indexers = Vec::new();
        self.reset()
    }

    /* ↓↓↓ Updating ↓↓↓ */

    /// Apply the change in order described by `u`, then append `local_nodes` to the local log.
    ///
    /// Returns whether an indexer-set change became indexed, in which case the caller must
    /// [`reset`](Self::reset) the state and rebuild its linearizer.
    pub(crate) fn update<A: Applier>(
        &mut self,
        u: &LinearizerUpdate,
        applier: &mut A,
        local_nodes: &[Arc<NodeData>],
    ) -> Result<bool, ApplyStateError> {
        let mut indexers_updated = 0;

        // Indexed nodes that were already applied as part of the previous tip.
        let mut j = 0;
        for i in 0..u.shared.min(u.indexed.len()) {
            if u.indexed[i].batch > 1 {
                continue;
            }
            let update = match self.updates.get(j) {
                Some(update) => *update,
                None => break,
            };
            j += 1;
            if update.indexers {
                indexers_updated = i + 1;
                break;
            }
        }

        if u.popped > 0 {
            self.undo(u.popped)?;
        }

        let mut batch = 0;
        let mut apply_batch = Vec::new();
        for i in u.shared..u.length {
            if indexers_updated > 0 {
                break;
            }
            let indexed = i < u.indexed.len();
            let node = u.node(i).clone();
            batch += 1;

            if self.system.bootstrapping() {
                self.system.add_writer(&self.bootstrap, true)?;
            }

            let removed = self
                .system
                .get(&node.writer)?
                .map(|info| info.is_removed)
                .unwrap_or(true);
            self.system.add_head(&node.writer, node.length, &node.heads)?;

            if removed {
                if self.optimistic && node.optimistic && batch == 1 && node.batch <= 1 {
                    self.optimistic_apply(applier, &node, indexed)?;
                }
            } else if let Some(value) = &node.value {
                apply_batch.push(ApplyNode {
                    indexed,
                    from: node.writer,
                    length: node.length,
                    value: value.clone(),
                    heads: node.heads.clone(),
                    optimistic: node.optimistic,
                });
            }

            if node.batch > 1 {
                continue;
            }

            if !apply_batch.is_empty() {
                let effects = self.apply(applier, &apply_batch)?;
                if let Some(reason) = effects.interrupt {
                    return Err(ApplyStateError::Interrupted { reason });
                }
                self.publish_membership(&effects);
                apply_batch.clear();
            }

            let indexer_update = self.system.indexer_update();
            if indexer_update {
                self.generate_next_views()?;
            }
            let system_length = self.system.flush(self.view_entries())?;
            self.updates.push(UpdateRecord {
                batch,
                indexers: indexer_update,
                system_length,
            });
            batch = 0;

            if indexed && indexer_update {
                indexers_updated = i + 1;
            }
        }

        if indexers_updated > 0 {
            self.index_updates(indexers_updated)?;
            self.indexers_updated = true;
        } else if !u.indexed.is_empty() {
            self.index_updates(u.indexed.len())?;
        }

        self.flush(local_nodes)?;
        Ok(indexers_updated > 0)
    }

    fn apply<A: Applier>(
        &mut self,
        applier: &mut A,
        batch: &[ApplyNode],
    ) -> Result<ApplyEffects, ApplyStateError> {
        let mut effects = ApplyEffects::default();
        {
            let mut views = Views::new(&mut self.views);
            let mut calls = ApplyCalls::new(&mut self.system, &mut effects, self.indexed_length);
            applier.apply(batch, &mut views, &mut calls)?;
        }
        Event::publish(
            &self.event_publisher,
            Event::Apply(ApplyEvent {
                timestamp: SystemTime::now(),
                count: batch.len(),
                indexed: batch.iter().all(|node| node.indexed),
            }),
        );
        Ok(effects)
    }

    /// Apply the node of a writer that is not a member in isolation. The node is kept only if
    /// `apply` succeeds and acknowledges its writer; otherwise its effects are rolled back.
    fn optimistic_apply<A: Applier>(
        &mut self,
        applier: &mut A,
        node: &NodeData,
        indexed: bool,
    ) -> Result<bool, ApplyStateError> {
        let value = match &node.value {
            Some(value) => value.clone(),
            None => return Ok(false),
        };
        let staged = self.system.staged();
        let batch = [ApplyNode {
            indexed,
            from: node.writer,
            length: node.length,
            value,
            heads: node.heads.clone(),
            optimistic: true,
        }];

        match self.apply(applier, &batch) {
            Ok(effects) if effects.acked.contains(&node.writer) && effects.interrupt.is_none() => {
                self.publish_membership(&effects);
                Ok(true)
            }
            Ok(_) | Err(ApplyStateError::Apply(_)) => {
                log::debug!(
                    "Dropping optimistic node {}/{}",
                    node.writer,
                    node.length
                );
                self.system.restore(staged);
                let info = self.system.info().clone();
                for view in self.views.iter_mut() {
                    let length = info.view(&view.name).map(|entry| entry.length).unwrap_or(0);
                    view.truncate(length)?;
                }
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn publish_membership(&self, effects: &ApplyEffects) {
        for (writer, indexer) in &effects.added {
            Event::publish(
                &self.event_publisher,
                Event::AddWriter(AddWriterEvent {
                    timestamp: SystemTime::now(),
                    writer: *writer,
                    indexer: *indexer,
                }),
            );
        }
        for writer in &effects.removed {
            Event::publish(
                &self.event_publisher,
                Event::RemoveWriter(RemoveWriterEvent {
                    timestamp: SystemTime::now(),
                    writer: *writer,
                }),
            );
        }
    }

    /// Point every view at the key of its log for the staged indexer set.
    fn generate_next_views(&mut self) -> Result<(), ApplyStateError> {
        let indexers = self.system.staged_indexers().clone();
        for view in self.views.iter_mut() {
            let length = view.log.length();
            let prologue = if length == 0 {
                None
            } else {
                let hash = view
                    .log
                    .tree_hash(length)
                    .ok_or(ApplyStateError::AppendLogError(
                        AppendLogError::BlockNotAvailable {
                            key: view.log.key(),
                            index: length - 1,
                        },
                    ))?;
                Some(Prologue { hash, length })
            };
            view.key = self
                .view_store
                .view_manifest(&indexers, &view.name, prologue)?
                .key();
        }
        Ok(())
    }

    fn view_entries(&self) -> Vec<ViewEntry> {
        self.views
            .iter()
            .map(|view| ViewEntry {
                name: view.name.clone(),
                key: view.key,
                length: view.log.length(),
            })
            .collect()
    }

    /// Undo the last `popped` nodes.
    fn undo(&mut self, popped: usize) -> Result<(), ApplyStateError> {
        let mut remaining = popped;
        while remaining > 0 {
            match self.updates.pop() {
                Some(update) => remaining = remaining.saturating_sub(update.batch),
                None => break,
            }
        }
        let length = self
            .updates
            .last()
            .map(|update| update.system_length)
            .unwrap_or(self.indexed_length);
        self.truncate(length)?;

        Event::publish(
            &self.event_publisher,
            Event::Truncate(TruncateEvent {
                timestamp: SystemTime::now(),
                length,
                popped,
            }),
        );
        Ok(())
    }

    /// Truncate the System to `length` and every view to the length the System records for it,
    /// pointing views back at the keys the System records.
    fn truncate(&mut self, length: u64) -> Result<(), ApplyStateError> {
        if self.system.length() > length {
            self.system.truncate(length)?;
        } else {
            self.system.discard_staged();
        }
        let info = self.system.info().clone();
        for view in self.views.iter_mut() {
            let (target, key) = match info.view(&view.name) {
                Some(entry) => (entry.length, entry.key),
                None => (0, view.log.key()),
            };
            view.truncate(target)?;
            view.key = key;
            view.indexed_length = view.indexed_length.min(view.log.length());
        }
        Ok(())
    }

    /// Mark the first `count` nodes of the ledger as indexed.
    fn index_updates(&mut self, count: usize) -> Result<(), ApplyStateError> {
        let mut remaining = count;
        let mut shifted = 0;
        while remaining > 0 && shifted < self.updates.len() {
            remaining = remaining.saturating_sub(self.updates[shifted].batch);
            shifted += 1;
        }
        if shifted == 0 {
            return Ok(());
        }
        self.indexed_length = self.updates[shifted - 1].system_length;
        self.updates.drain(..shifted);

        let info = self.system.get_indexed_info(self.indexed_length)?;
        for view in self.views.iter_mut() {
            if let Some(entry) = info.view(&view.name) {
                view.indexed_length = entry.length;
            }
        }

        Event::publish(
            &self.event_publisher,
            Event::Index(IndexEvent {
                timestamp: SystemTime::now(),
                length: self.indexed_length,
            }),
        );
        Ok(())
    }

    /* ↓↓↓ Flushing and signing ↓↓↓ */

    /// Append `local_nodes` to the local log, persist the boot record, and commit whatever a quorum
    /// of indexers has signed.
    pub(crate) fn flush(&mut self, local_nodes: &[Arc<NodeData>]) -> Result<(), ApplyStateError> {
        if !local_nodes.is_empty() {
            let checkpoints = if self.is_local_indexer() {
                Some(self.local_signatures()?)
            } else {
                None
            };
            let system_key = self.system.key();
            let key = self.local.key();
            let (mut written, mut digest_written) = self.local_checkpoint.written();
            let mut index = self.local.length();
            let mut blocks = Vec::with_capacity(local_nodes.len());
            for node in local_nodes {
                let checkpoint = checkpoints
                    .as_ref()
                    .map(|checkpoints| compress(&mut written, index, checkpoints));
                let digest = checkpoints
                    .as_ref()
                    .map(|_| compress_digest(&mut digest_written, index, system_key));
                let message = OplogMessage {
                    version: PROTOCOL_VERSION,
                    max_supported_version: MAX_SUPPORTED_VERSION,
                    checkpoint,
                    digest,
                    optimistic: node.optimistic,
                    node: NodeRecord {
                        heads: node.heads.clone(),
                        batch: node.batch,
                        value: node.value.clone(),
                    },
                };
                blocks.push(self.codec.encode(&key, index, &message));
                index += 1;
            }
            self.local.append(blocks)?;
            self.local_checkpoint.update(&self.codec)?;
        }

        self.write_boot_record(false)?;
        self.maybe_signed()
    }

    fn write_boot_record(&mut self, fast_forwarding: bool) -> Result<(), ApplyStateError> {
        let record = BootRecord {
            version: PROTOCOL_VERSION,
            key: self.system.key(),
            indexed_length: self.indexed_length,
            indexers_updated: self.indexers_updated,
            fast_forwarding,
        };
        self.local.set_user_data(BOOT_RECORD, Some(encode(&record)))?;
        Ok(())
    }

    /// Sign `log` at `length` as the local indexer.
    fn sign_log(&self, log: &S::Log, length: u64) -> Option<Checkpoint> {
        if length == 0 {
            return None;
        }
        let manifest = log.manifest()?;
        let position = manifest.signer_position(&self.keypair.public().to_bytes())?;
        let tree_hash = log.tree_hash(length)?;
        let message = signable(
            &manifest.signers[position].namespace,
            &log.key(),
            length,
            &tree_hash,
        );
        Some(Checkpoint {
            length,
            signature: self.keypair.sign(&message.bytes()),
        })
    }

    /// The local indexer's checkpoints of the System at the indexed length and of every view at
    /// the length the indexed System records for it.
    fn local_signatures(&self) -> Result<Vec<Option<Checkpoint>>, ApplyStateError> {
        let info = self.system.get_indexed_info(self.indexed_length)?;
        let mut checkpoints = Vec::with_capacity(self.views.len() + 1);
        checkpoints.push(self.sign_log(self.system.log(), self.indexed_length));
        for view in &self.views {
            let checkpoint = match info.view(&view.name) {
                Some(entry) if entry.key == view.log.key() => self.sign_log(&view.log, entry.length),
                _ => None,
            };
            checkpoints.push(checkpoint);
        }
        Ok(checkpoints)
    }

    /// Collect the indexers' latest checkpoints and commit every log a quorum has signed.
    fn maybe_signed(&mut self) -> Result<(), ApplyStateError> {
        if self.indexers.is_empty() {
            return Ok(());
        }
        for checkpoint_log in self.checkpoints.iter_mut() {
            if !checkpoint_log.update(&self.codec)? {
                continue;
            }
            let writer = checkpoint_log.writer();
            for (i, checkpoint) in checkpoint_log.checkpoints() {
                if let Some(signer) = self.signers.get_mut(i) {
                    signer.add_checkpoint(&writer, checkpoint);
                }
            }
        }
        self.check_system_upgrade();

        if let Some(manifest) = self.system.log().manifest() {
            let multisig =
                self.signers[0].sign(&self.indexers, &manifest, self.system.log(), self.indexed_length);
            if let Some(multisig) = multisig {
                let length = multisig.length;
                self.system.log_mut().commit(multisig)?;
                self.signers[0].gc(length);
                self.publish_sign(self.system.key(), length);
            }
        }

        let signed = self.system.log().signed_length().min(self.indexed_length);
        if signed == 0 {
            return Ok(());
        }
        let info = self.system.get_indexed_info(signed)?;
        for (i, view) in self.views.iter_mut().enumerate() {
            let entry = match info.view(&view.name) {
                Some(entry)
                    if entry.key == view.log.key() && entry.length > view.log.signed_length() =>
                {
                    entry
                }
                _ => continue,
            };
            let manifest = match view.log.manifest() {
                Some(manifest) => manifest,
                None => continue,
            };
            let multisig = match self.signers.get(i + 1) {
                Some(signer) => signer.sign(&self.indexers, &manifest, &view.log, entry.length),
                None => None,
            };
            if let Some(multisig) = multisig {
                let length = multisig.length;
                view.log.commit(multisig)?;
                self.signers[i + 1].gc(length);
                Event::publish(
                    &self.event_publisher,
                    Event::Sign(SignEvent {
                        timestamp: SystemTime::now(),
                        key: view.log.key(),
                        length,
                    }),
                );
            }
        }
        Ok(())
    }

    fn publish_sign(&self, key: LogKey, length: u64) {
        Event::publish(
            &self.event_publisher,
            Event::Sign(SignEvent {
                timestamp: SystemTime::now(),
                key,
                length,
            }),
        );
    }

    /// Note a System key that a quorum of indexers' digests name instead of the local one.
    fn check_system_upgrade(&mut self) {
        let local = self.system.key();
        let mut counts: BTreeMap<LogKey, usize> = BTreeMap::new();
        for checkpoint_log in &self.checkpoints {
            if let Some(key) = checkpoint_log.digest_key() {
                if key != local {
                    *counts.entry(key).or_default() += 1;
                }
            }
        }
        let threshold = quorum(self.indexers.len());
        if let Some((key, _)) = counts.into_iter().find(|(_, count)| *count >= threshold) {
            self.system_upgrade = Some(key);
        }
    }
}

#[derive(Debug)]
pub enum ApplyStateError {
    SystemError(SystemError),
    AppendLogError(AppendLogError),
    WriterError(WriterError),
    ViewStoreError(ViewStoreError),
    MigrationError(MigrationError),
    Apply(ApplyError),
    DeserializeBootRecordError { source: io::Error },
    /// `apply` called [`interrupt`](crate::applier::ApplyCalls::interrupt).
    Interrupted { reason: String },
    /// The local state was written by a newer version of this crate.
    UpgradeRequired { version: u32 },
}

impl From<SystemError> for ApplyStateError {
    fn from(value: SystemError) -> Self {
        ApplyStateError::SystemError(value)
    }
}

impl From<AppendLogError> for ApplyStateError {
    fn from(value: AppendLogError) -> Self {
        ApplyStateError::AppendLogError(value)
    }
}

impl From<WriterError> for ApplyStateError {
    fn from(value: WriterError) -> Self {
        ApplyStateError::WriterError(value)
    }
}

impl From<ViewStoreError> for ApplyStateError {
    fn from(value: ViewStoreError) -> Self {
        ApplyStateError::ViewStoreError(value)
    }
}

impl From<MigrationError> for ApplyStateError {
    fn from(value: MigrationError) -> Self {
        ApplyStateError::MigrationError(value)
    }
}

impl From<ApplyError> for ApplyStateError {
    fn from(value: ApplyError) -> Self {
        ApplyStateError::Apply(value)
    }
}
