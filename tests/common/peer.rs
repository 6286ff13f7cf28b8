use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use causal_base::{
    base::{Base, BaseSpec},
    config::Configuration,
    types::{data_types::LogKey, manifest::Manifest},
};

use crate::common::{
    encryption::XorEncryption,
    logging::log_with_context,
    mem_db::MemDB,
    mem_log::{replicate, MemLogStore},
    network::NetworkStub,
    test_applier::{TestApplier, OUTPUT},
};

pub(crate) type TestBase = Base<MemDB, MemLogStore, TestApplier, NetworkStub>;

/// Things a Peer can be started with besides its keypair and network.
#[derive(Clone)]
pub(crate) struct PeerOptions {
    pub(crate) bootstrap: Option<LogKey>,
    pub(crate) optimistic: bool,
    pub(crate) fast_forward: bool,
    pub(crate) fast_forward_minimum: u64,
    pub(crate) fast_forward_timeout: Duration,
    pub(crate) encryption: Option<u8>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        PeerOptions {
            bootstrap: None,
            optimistic: false,
            fast_forward: false,
            fast_forward_minimum: 16,
            fast_forward_timeout: Duration::from_millis(500),
            encryption: None,
        }
    }
}

/// One base together with the stores it runs on, so that it can be restarted from them.
pub(crate) struct Peer {
    keypair: SigningKey,
    network: NetworkStub,
    options: PeerOptions,
    pub(crate) store: MemLogStore,
    pub(crate) kv_store: MemDB,
    pub(crate) base: TestBase,
}

impl Peer {
    pub(crate) fn new(keypair: SigningKey, network: NetworkStub, options: PeerOptions) -> Peer {
        Peer::start(keypair, network, options, MemLogStore::new(), MemDB::new())
    }

    fn start(
        keypair: SigningKey,
        network: NetworkStub,
        options: PeerOptions,
        store: MemLogStore,
        kv_store: MemDB,
    ) -> Peer {
        let base = start_base(
            keypair.clone(),
            network.clone(),
            options.clone(),
            store.clone(),
            kv_store.clone(),
        );
        Peer {
            keypair,
            network,
            options,
            store,
            kv_store,
            base,
        }
    }

    /// Drop the base and start a new one on the same stores.
    pub(crate) fn restart(self) -> Peer {
        let Peer {
            keypair,
            network,
            options,
            store,
            kv_store,
            base,
        } = self;
        drop(base);
        Peer::start(keypair, network, options, store, kv_store)
    }

    /// Key of the peer's writer log.
    pub(crate) fn key(&self) -> LogKey {
        self.base.local_key()
    }

    pub(crate) fn append(&mut self, value: &[u8]) {
        self.base.append(value.to_vec()).unwrap();
    }

    /// Every block of the `output` view, including unconfirmed ones.
    pub(crate) fn output(&self) -> Vec<Vec<u8>> {
        let view = self.base.view(OUTPUT).unwrap();
        (0..view.length()).map(|i| view.get(i).unwrap()).collect()
    }

    pub(crate) fn output_indexed_length(&self) -> u64 {
        self.base.view(OUTPUT).unwrap().indexed_length()
    }
}

pub(crate) fn start_base(
    keypair: SigningKey,
    network: NetworkStub,
    options: PeerOptions,
    store: MemLogStore,
    kv_store: MemDB,
) -> TestBase {
    let configuration = Configuration::builder()
        .me(keypair)
        .bootstrap(options.bootstrap)
        .optimistic(options.optimistic)
        .fast_forward(options.fast_forward)
        .fast_forward_minimum(options.fast_forward_minimum)
        .fast_forward_timeout(options.fast_forward_timeout)
        .ack_threshold(2)
        .log_events(false)
        .build();

    match options.encryption {
        Some(secret) => BaseSpec::builder()
            .store(store)
            .kv_store(kv_store)
            .applier(TestApplier)
            .network(network)
            .configuration(configuration)
            .encryption(XorEncryption::new(secret))
            .build()
            .start()
            .unwrap(),
        None => BaseSpec::builder()
            .store(store)
            .kv_store(kv_store)
            .applier(TestApplier)
            .network(network)
            .configuration(configuration)
            .build()
            .start()
            .unwrap(),
    }
}

pub(crate) fn keypairs(n: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    (0..n).map(|_| SigningKey::generate(&mut csprg)).collect()
}

/// Key of the writer log of the holder of `keypair`.
pub(crate) fn writer_key(keypair: &SigningKey) -> LogKey {
    Manifest::writer(&keypair.verifying_key()).key()
}

/// Replicate every peer's writer logs to every other peer, then update them all.
pub(crate) fn sync(peers: &mut [&mut Peer]) {
    for i in 0..peers.len() {
        for j in 0..peers.len() {
            if i != j {
                replicate(&peers[i].store, &peers[j].store);
            }
        }
    }
    for peer in peers.iter_mut() {
        peer.base.update().unwrap();
    }
}

/// Let every indexer among `peers` append an empty node, twice, syncing in between, so that
/// everything the peers have appended so far becomes indexed.
pub(crate) fn confirm(peers: &mut [&mut Peer]) {
    for _ in 0..2 {
        for i in 0..peers.len() {
            sync(peers);
            if peers[i].base.is_indexer() {
                log_with_context(Some(peers[i].key()), "Acknowledging");
                peers[i].base.force_ack().unwrap();
            }
        }
    }
    sync(peers);
}
