//! A volatile, in-memory implementation of [`LogStore`] and [`AppendLog`], with [`replicate`] and
//! [`replicate_views`] standing in for peer-to-peer replication between the stores of bases.

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc, Mutex},
};

use causal_base::{
    append_log::{AppendLog, AppendLogError, LogStore},
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{CryptoHash, LogKey},
        manifest::{Manifest, WRITER_NAMESPACE},
        multisig::Multisig,
    },
};

#[derive(Default)]
struct LogData {
    manifest: Option<Manifest>,
    blocks: Vec<Vec<u8>>,
    signed_length: u64,
    user_data: HashMap<String, Vec<u8>>,
    listeners: Vec<Sender<LogKey>>,
}

impl LogData {
    /// Writer logs are signed by their single writer on every append.
    fn is_writer(&self) -> bool {
        match &self.manifest {
            Some(manifest) => {
                manifest.signers.len() == 1
                    && manifest.signers[0].namespace == hash(&[WRITER_NAMESPACE])
            }
            None => false,
        }
    }

    fn tree_hash(&self, length: u64) -> Option<CryptoHash> {
        if length > self.blocks.len() as u64 {
            return None;
        }
        let mut hasher = CryptoHasher::new();
        for block in &self.blocks[..length as usize] {
            hasher.update(hash(&[block]).bytes());
        }
        Some(CryptoHash::new(hasher.finalize().into()))
    }

    fn notify(&mut self, key: LogKey) {
        self.listeners.retain(|listener| listener.send(key).is_ok());
    }
}

fn hash(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// A session on one log of a [`MemLogStore`]. All sessions on the same key share the same data.
#[derive(Clone)]
pub(crate) struct MemLog {
    key: LogKey,
    data: Arc<Mutex<LogData>>,
}

impl AppendLog for MemLog {
    fn key(&self) -> LogKey {
        self.key
    }

    fn manifest(&self) -> Option<Manifest> {
        self.data.lock().unwrap().manifest.clone()
    }

    fn length(&self) -> u64 {
        self.data.lock().unwrap().blocks.len() as u64
    }

    fn signed_length(&self) -> u64 {
        self.data.lock().unwrap().signed_length
    }

    fn get(&self, index: u64) -> Option<Vec<u8>> {
        self.data.lock().unwrap().blocks.get(index as usize).cloned()
    }

    fn append(&mut self, blocks: Vec<Vec<u8>>) -> Result<u64, AppendLogError> {
        let mut data = self.data.lock().unwrap();
        data.blocks.extend(blocks);
        let length = data.blocks.len() as u64;
        if data.is_writer() {
            data.signed_length = length;
        }
        data.notify(self.key);
        Ok(length)
    }

    fn truncate(&mut self, length: u64) -> Result<(), AppendLogError> {
        let mut data = self.data.lock().unwrap();
        if length < data.signed_length {
            return Err(AppendLogError::TruncateBelowSigned {
                key: self.key,
                length,
                signed_length: data.signed_length,
            });
        }
        data.blocks.truncate(length as usize);
        Ok(())
    }

    fn tree_hash(&self, length: u64) -> Option<CryptoHash> {
        self.data.lock().unwrap().tree_hash(length)
    }

    fn commit(&mut self, signature: Multisig) -> Result<(), AppendLogError> {
        let mut data = self.data.lock().unwrap();
        let manifest = data.manifest.clone().ok_or(AppendLogError::InvalidSignature {
            key: self.key,
            length: signature.length,
        })?;
        if !signature.verify(&manifest, &self.key, |length| data.tree_hash(length)) {
            return Err(AppendLogError::InvalidSignature {
                key: self.key,
                length: signature.length,
            });
        }
        data.signed_length = data.signed_length.max(signature.length);
        Ok(())
    }

    fn copy_prologue(&mut self, source: &Self) -> Result<(), AppendLogError> {
        let prologue = self
            .manifest()
            .and_then(|manifest| manifest.prologue)
            .ok_or(AppendLogError::PrologueMismatch { key: self.key })?;
        if source.tree_hash(prologue.length) != Some(prologue.hash) {
            return Err(AppendLogError::PrologueMismatch { key: self.key });
        }
        let blocks = source.data.lock().unwrap().blocks[..prologue.length as usize].to_vec();

        let mut data = self.data.lock().unwrap();
        data.blocks = blocks;
        data.signed_length = data.signed_length.max(prologue.length);
        data.notify(self.key);
        Ok(())
    }

    fn user_data(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().user_data.get(key).cloned()
    }

    fn set_user_data(&mut self, key: &str, value: Option<Vec<u8>>) -> Result<(), AppendLogError> {
        let mut data = self.data.lock().unwrap();
        match value {
            Some(value) => data.user_data.insert(key.to_string(), value),
            None => data.user_data.remove(key),
        };
        Ok(())
    }

    fn on_append(&self, notify: Sender<LogKey>) {
        self.data.lock().unwrap().listeners.push(notify);
    }
}

/// The logs of one peer.
#[derive(Clone)]
pub(crate) struct MemLogStore {
    logs: Arc<Mutex<HashMap<LogKey, Arc<Mutex<LogData>>>>>,
}

impl MemLogStore {
    pub(crate) fn new() -> MemLogStore {
        MemLogStore {
            logs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entry(&self, key: &LogKey) -> Arc<Mutex<LogData>> {
        self.logs
            .lock()
            .unwrap()
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(LogData::default())))
            .clone()
    }

    fn keys(&self) -> Vec<LogKey> {
        self.logs.lock().unwrap().keys().copied().collect()
    }
}

impl LogStore for MemLogStore {
    type Log = MemLog;

    fn open(&mut self, key: &LogKey) -> MemLog {
        MemLog {
            key: *key,
            data: self.entry(key),
        }
    }

    fn create(&mut self, manifest: &Manifest) -> MemLog {
        let key = manifest.key();
        let data = self.entry(&key);
        {
            let mut data = data.lock().unwrap();
            if data.manifest.is_none() {
                data.manifest = Some(manifest.clone());
                data.notify(key);
            }
        }
        MemLog { key, data }
    }
}

/// Copy the writer logs `from` holds into `to`, the way replication between two peers would.
///
/// Writer logs are extended with every block `to` does not have yet. Views and Systems are left
/// alone: a peer that replays the writers computes their content itself.
pub(crate) fn replicate(from: &MemLogStore, to: &MemLogStore) {
    copy_logs(from, to, true);
}

/// Copy the signed content of the views and Systems `from` holds into `to`, for peers that skip
/// replaying the writers by fast-forwarding. Content is only copied into logs `to` holds no
/// blocks of.
pub(crate) fn replicate_views(from: &MemLogStore, to: &MemLogStore) {
    copy_logs(from, to, false);
}

fn copy_logs(from: &MemLogStore, to: &MemLogStore, writers: bool) {
    for key in from.keys() {
        let source = from.entry(&key);
        let target = to.entry(&key);
        if Arc::ptr_eq(&source, &target) {
            continue;
        }
        let source = source.lock().unwrap();
        if source.manifest.is_none() || source.is_writer() != writers {
            continue;
        }
        let mut target = target.lock().unwrap();

        let mut changed = false;
        if target.manifest.is_none() {
            target.manifest = source.manifest.clone();
            changed = true;
        }

        if writers {
            if source.blocks.len() > target.blocks.len() {
                let start = target.blocks.len();
                target.blocks.extend_from_slice(&source.blocks[start..]);
                target.signed_length = target.blocks.len() as u64;
                changed = true;
            }
        } else if target.blocks.is_empty() && source.signed_length > 0 {
            let length = (source.signed_length as usize).min(source.blocks.len());
            target.blocks = source.blocks[..length].to_vec();
            target.signed_length = length as u64;
            changed = true;
        }

        if changed {
            target.notify(key);
        }
    }
}
