/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fast-forward: jumping a lagging base directly to a System that a quorum of indexers signed.
//!
//! A [`FastForward`] checks that a candidate System log is worth adopting (far enough ahead of the
//! local one), and that everything the System at its signed length refers to is available: the
//! last System block, every view at the length the System records for it (and signed at least that
//! far), and the boundary block of every indexer and DAG head. The writer entries of every member,
//! indexer and head as of the signed length are read from the System blocks, so the caller can
//! adopt them without replaying the whole System. Only then does
//! [`upgrade`](FastForward::upgrade) return a [`FastForwardDescriptor`] for the caller to adopt.
//! Any failure, including a timeout, returns `None` and leaves the local state untouched.
//!
//! Waiting for blocks is done by registering a channel with
//! [`AppendLog::on_append`] and waiting on it with a deadline. A [`FastForwardCanceller`] wakes the
//! waiting thread up and makes every pending and future wait fail immediately.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    append_log::{AppendLog, LogStore},
    system::{
        reader::SystemReader,
        types::{ViewEntry, WriterInfo},
    },
    types::data_types::{Head, LogKey},
};

/// What a successful fast-forward verified, and the caller adopts.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FastForwardDescriptor {
    /// Key of the System log.
    pub key: LogKey,
    /// Signed length of the System log.
    pub length: u64,
    pub indexers: Vec<Head>,
    pub views: Vec<ViewEntry>,
    pub heads: Vec<Head>,
    /// Entry of the local writer, if the target records one.
    pub local: Option<WriterInfo>,
    /// Entries of every member, indexer and head writer of the target.
    pub writers: BTreeMap<LogKey, WriterInfo>,
}

pub struct FastForward<S: LogStore> {
    store: S,
    key: LogKey,
    timeout: Duration,
    minimum: u64,
    closed: Arc<AtomicBool>,
    wake_sender: Sender<LogKey>,
    wake: Receiver<LogKey>,
}

/// Cancels a [`FastForward`], possibly from another thread.
#[derive(Clone)]
pub struct FastForwardCanceller {
    closed: Arc<AtomicBool>,
    wake: Sender<LogKey>,
}

impl FastForwardCanceller {
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Wake the waiting thread up. The key is not looked at.
        let _ = self.wake.send(LogKey::new([0; 32]));
    }
}

impl<S: LogStore> FastForward<S> {
    /// Prepare a fast-forward to the System log `key`. Every wait for a block gives up after
    /// `timeout`; targets less than `minimum` blocks ahead are rejected unless forced.
    pub fn new(store: S, key: LogKey, timeout: Duration, minimum: u64) -> FastForward<S> {
        let (wake_sender, wake) = mpsc::channel();
        FastForward {
            store,
            key,
            timeout,
            minimum,
            closed: Arc::new(AtomicBool::new(false)),
            wake_sender,
            wake,
        }
    }

    pub fn key(&self) -> LogKey {
        self.key
    }

    pub fn canceller(&self) -> FastForwardCanceller {
        FastForwardCanceller {
            closed: self.closed.clone(),
            wake: self.wake_sender.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Verify the target against a local System of `local_length` blocks with key `local_key`, on
    /// behalf of the writer `local_writer`.
    pub fn upgrade(
        &mut self,
        local_length: u64,
        local_key: &LogKey,
        local_writer: &LogKey,
        force: bool,
    ) -> Option<FastForwardDescriptor> {
        let system = self.open(&self.key.clone());
        let manifest = self.wait_for(&system, |log| log.manifest())?;

        let length = system.signed_length();
        if length == 0 {
            return None;
        }
        if self.key == *local_key && length <= local_length {
            return None;
        }
        if !force && length < local_length + self.minimum {
            log::debug!(
                "Not fast-forwarding to {} at {}: local System is at {}",
                self.key,
                length,
                local_length
            );
            return None;
        }

        for linked in &manifest.linked {
            let log = self.open(linked);
            self.wait_for_block(&log, 0)?;
        }

        self.wait_for_block(&system, length - 1)?;
        let info = {
            let mut reader = SystemReader::new(length, |index| self.wait_for_block(&system, index));
            reader.info().ok()?
        };

        for view in &info.views {
            let log = self.open(&view.key);
            if view.length == 0 {
                continue;
            }
            self.wait_for(&log, |log| (log.signed_length() >= view.length).then_some(()))?;
            self.wait_for_block(&log, view.length - 1)?;
        }

        for head in info.indexers.iter().chain(info.heads.iter()) {
            if head.length == 0 {
                continue;
            }
            let log = self.open(&head.key);
            self.wait_for_block(&log, head.length - 1)?;
        }

        let mut keys: BTreeSet<LogKey> = info.writers.iter().copied().collect();
        keys.extend(info.indexers.iter().chain(info.heads.iter()).map(|head| head.key));
        let mut writers = BTreeMap::new();
        {
            let mut reader = SystemReader::new(length, |index| self.wait_for_block(&system, index));
            for key in keys {
                if let Some(entry) = reader.get(&key).ok()? {
                    writers.insert(key, entry);
                }
            }
        }
        let local = writers.get(local_writer).copied();

        if self.is_closed() {
            return None;
        }
        Some(FastForwardDescriptor {
            key: self.key,
            length,
            indexers: info.indexers,
            views: info.views,
            heads: info.heads,
            local,
            writers,
        })
    }

    fn open(&mut self, key: &LogKey) -> S::Log {
        let log = self.store.open(key);
        log.on_append(self.wake_sender.clone());
        log
    }

    fn wait_for_block(&self, log: &S::Log, index: u64) -> Option<Vec<u8>> {
        self.wait_for(log, |log| log.get(index))
    }

    /// Wait until `check` returns something, the timeout elapses, or the fast-forward is cancelled.
    fn wait_for<T>(&self, log: &S::Log, check: impl Fn(&S::Log) -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(value) = check(log) {
                return Some(value);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("Timed out waiting for {} during fast-forward", log.key());
                return None;
            }
            match self.wake.recv_timeout(remaining) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}
