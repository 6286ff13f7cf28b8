/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deriving the manifests (and therefore the keys) of views for an indexer set.
//!
//! Every view, and the System itself, is a log whose signers are the indexers of the epoch that
//! created it. Each indexer signs a view under a namespace specific to the base, the view, and the
//! indexer, so a signature over one view can never be replayed as a signature over another.
//!
//! Before any indexer exists, views are keyed by a static prologue derived from the bootstrap key
//! and the view name, so every peer of a base agrees on the genesis keys.

use crate::{
    append_log::{AppendLog, LogStore},
    types::{
        crypto_primitives::hash_parts,
        data_types::{CryptoHash, LogKey},
        indexer_set::{quorum, IndexerSet},
        manifest::{Manifest, ManifestSigner, Prologue, MANIFEST_VERSION},
    },
};

/// Name under which the System is derived like a view.
pub const SYSTEM_VIEW_NAME: &str = "_system";

const SIGNER_NAMESPACE: &[u8] = b"causal_base/signer";

#[derive(Clone)]
pub(crate) struct ViewStore<S: LogStore> {
    store: S,
    bootstrap: LogKey,
    encryption: Option<CryptoHash>,
}

impl<S: LogStore> ViewStore<S> {
    pub(crate) fn new(store: S, bootstrap: LogKey, encryption: Option<CryptoHash>) -> Self {
        Self {
            store,
            bootstrap,
            encryption,
        }
    }

    /// The namespace the indexer whose writer namespace is `indexer_namespace` signs view `name`
    /// under.
    pub(crate) fn namespace(&self, name: &str, indexer_namespace: &CryptoHash) -> CryptoHash {
        let encryption = self.encryption.map(|id| id.bytes()).unwrap_or([0; 32]);
        hash_parts(&[
            SIGNER_NAMESPACE,
            &MANIFEST_VERSION.to_le_bytes(),
            &self.bootstrap.bytes(),
            &encryption,
            name.as_bytes(),
            &indexer_namespace.bytes(),
        ])
    }

    /// The manifests of the writer logs of `indexers`, in indexer order.
    fn indexer_manifests(&mut self, indexers: &IndexerSet) -> Result<Vec<Manifest>, ViewStoreError> {
        let mut manifests = Vec::with_capacity(indexers.len());
        for indexer in indexers.iter() {
            let manifest = self
                .store
                .open(indexer)
                .manifest()
                .ok_or(ViewStoreError::MissingManifest { writer: *indexer })?;
            if manifest.signers.is_empty() {
                return Err(ViewStoreError::MissingManifest { writer: *indexer });
            }
            manifests.push(manifest);
        }
        Ok(manifests)
    }

    /// The manifest of view `name` for the epoch of `indexers`, extending `prologue`.
    pub(crate) fn view_manifest(
        &mut self,
        indexers: &IndexerSet,
        name: &str,
        prologue: Option<Prologue>,
    ) -> Result<Manifest, ViewStoreError> {
        if indexers.is_empty() {
            return Ok(self.genesis_manifest(name));
        }

        let signers = self
            .indexer_manifests(indexers)?
            .into_iter()
            .map(|manifest| {
                let writer = &manifest.signers[0];
                ManifestSigner {
                    public_key: writer.public_key,
                    namespace: self.namespace(name, &writer.namespace),
                }
            })
            .collect::<Vec<_>>();

        Ok(Manifest {
            version: MANIFEST_VERSION,
            quorum: quorum(signers.len()) as u32,
            signers,
            prologue,
            linked: Vec::new(),
        })
    }

    /// The manifest of view `name` before the base has any indexers.
    pub(crate) fn genesis_manifest(&self, name: &str) -> Manifest {
        Manifest {
            version: MANIFEST_VERSION,
            quorum: 0,
            signers: Vec::new(),
            prologue: Some(Prologue {
                hash: hash_parts(&[&self.bootstrap.bytes(), name.as_bytes()]),
                length: 0,
            }),
            linked: Vec::new(),
        }
    }

    /// Open (creating if needed) the log described by `manifest`.
    pub(crate) fn create(&mut self, manifest: &Manifest) -> S::Log {
        self.store.create(manifest)
    }

    /// Open the log with `key`, e.g., a view whose key the System recorded.
    pub(crate) fn open(&mut self, key: &LogKey) -> S::Log {
        self.store.open(key)
    }

    /// Open view `name` from the key the System recorded for it, or its genesis log if the System
    /// has no record of it.
    pub(crate) fn open_view(&mut self, key: Option<&LogKey>, name: &str) -> S::Log {
        match key {
            Some(key) => self.store.open(key),
            None => {
                let manifest = self.genesis_manifest(name);
                self.store.create(&manifest)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStoreError {
    /// The manifest of an indexer's log has not been replicated yet.
    MissingManifest { writer: LogKey },
}
