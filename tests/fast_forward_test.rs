use std::{
    thread,
    time::{Duration, Instant},
};

use log::LevelFilter;

use causal_base::{
    append_log::{AppendLog, LogStore},
    fast_forward::FastForward,
    types::{
        crypto_primitives::{Signer, SigningKey},
        data_types::{CryptoHash, LogKey, SignatureBytes},
        manifest::{Manifest, ManifestSigner, MANIFEST_VERSION},
        multisig::{signable, Multisig, PartialSignature},
    },
};

mod common;

use common::{
    logging::{log_with_context, setup_logger},
    mem_log::{replicate, replicate_views, MemLogStore},
    network::mock_network,
    peer::{keypairs, writer_key, Peer, PeerOptions},
    test_applier::add,
};

/// A bootstrap peer with one signed value, and a fresh peer bootstrapped from it.
fn signed_pair(options: PeerOptions) -> (Peer, Peer) {
    let keypairs = keypairs(2);
    let mut networks = mock_network(keypairs.iter().map(writer_key));
    let mut a = Peer::new(keypairs[0].clone(), networks.remove(0), PeerOptions::default());
    a.append(b"x");
    assert!(a.base.ack().unwrap());
    assert!(a.base.system_signed_length() > 0);

    let b = Peer::new(
        keypairs[1].clone(),
        networks.remove(0),
        PeerOptions {
            bootstrap: Some(a.key()),
            ..options
        },
    );
    (a, b)
}

/// A peer jumps straight to the signed System of another, and keeps updating from there.
#[test]
fn fast_forward_test() {
    setup_logger(LevelFilter::Debug);

    let (mut a, mut b) = signed_pair(PeerOptions::default());
    let target = a.base.system_key();

    // 1. B has the signed views and System, and the writer blocks they refer to.
    replicate(&a.store, &b.store);
    replicate_views(&a.store, &b.store);

    // 2. Fast-forward.
    log_with_context(Some(b.key()), "Fast-forwarding");
    assert!(b.base.fast_forward(target, true).unwrap());
    assert_eq!(b.base.system_key(), target);
    assert_eq!(b.base.indexed_length(), a.base.indexed_length());
    assert_eq!(b.output(), vec![b"x".to_vec()]);
    assert_eq!(b.output_indexed_length(), 1);

    // 3. New nodes are applied on top of the adopted state.
    a.append(b"y");
    replicate(&a.store, &b.store);
    b.base.update().unwrap();
    assert_eq!(b.output(), vec![b"x".to_vec(), b"y".to_vec()]);
}

/// Without `force`, a target that is not far enough ahead is rejected.
#[test]
fn fast_forward_not_far_enough_test() {
    setup_logger(LevelFilter::Debug);

    let (a, mut b) = signed_pair(PeerOptions::default());
    replicate(&a.store, &b.store);
    replicate_views(&a.store, &b.store);
    let local = b.base.system_key();

    assert!(!b.base.fast_forward(a.base.system_key(), false).unwrap());
    assert_eq!(b.base.system_key(), local);
    assert!(!b.base.is_closed());
}

/// A target whose referenced blocks never arrive times out, and nothing changes.
#[test]
fn fast_forward_incomplete_test() {
    setup_logger(LevelFilter::Debug);

    let (a, mut b) = signed_pair(PeerOptions {
        fast_forward_timeout: Duration::from_millis(100),
        ..PeerOptions::default()
    });

    // Only the views and System, none of the writer blocks.
    replicate_views(&a.store, &b.store);
    let local = b.base.system_key();

    assert!(!b.base.fast_forward(a.base.system_key(), true).unwrap());
    assert_eq!(b.base.system_key(), local);
    assert!(b.output().is_empty());
    assert!(!b.base.is_closed());
}

/// A writer whose addition is part of the target can append as soon as it fast-forwards, without
/// replaying the System.
#[test]
fn fast_forward_past_own_addition_test() {
    setup_logger(LevelFilter::Debug);

    let keypairs = keypairs(2);
    let mut networks = mock_network(keypairs.iter().map(writer_key));
    let mut a = Peer::new(keypairs[0].clone(), networks.remove(0), PeerOptions::default());
    let mut b = Peer::new(
        keypairs[1].clone(),
        networks.remove(0),
        PeerOptions {
            bootstrap: Some(a.key()),
            ..PeerOptions::default()
        },
    );

    // 1. A adds B and signs the System that records it.
    a.append(&add(&b.key()));
    a.append(b"x");
    assert!(a.base.ack().unwrap());
    let target = a.base.system_key();
    replicate(&a.store, &b.store);
    replicate_views(&a.store, &b.store);
    assert!(!b.base.writable());

    // 2. The target records B's entry.
    let descriptor = FastForward::new(b.store.clone(), target, Duration::from_secs(1), 0)
        .upgrade(0, &b.base.system_key(), &b.key(), true)
        .unwrap();
    let local = descriptor.local.unwrap();
    assert!(!local.is_indexer);
    assert!(!local.is_removed);
    assert_eq!(descriptor.writers.get(&b.key()), Some(&local));

    // 3. Right after fast-forwarding, B is a member and its appends are applied.
    log_with_context(Some(b.key()), "Fast-forwarding past its own addition");
    assert!(b.base.fast_forward(target, true).unwrap());
    assert!(b.base.writable());
    assert!(b.base.writer_info(&b.key()).unwrap().is_some());

    b.append(b"from b");
    replicate(&b.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(a.output(), vec![b"x".to_vec(), b"from b".to_vec()]);
}

/// A single-signer log holding `block`, which is not a System block, in `store`.
fn foreign_log(store: &mut MemLogStore, signer: &SigningKey, block: &[u8]) -> LogKey {
    let namespace = CryptoHash::new([9; 32]);
    let manifest = Manifest {
        version: MANIFEST_VERSION,
        quorum: 1,
        signers: vec![ManifestSigner {
            public_key: signer.verifying_key().to_bytes(),
            namespace,
        }],
        prologue: None,
        linked: Vec::new(),
    };
    let mut log = store.create(&manifest);
    log.append(vec![block.to_vec()]).unwrap();
    log.key()
}

/// A target nobody signed is rejected right away.
#[test]
fn unsigned_target_rejected_test() {
    let mut store = MemLogStore::new();
    let signer = keypairs(1).pop().unwrap();
    let key = foreign_log(&mut store, &signer, b"not a system block");
    assert_eq!(store.open(&key).signed_length(), 0);

    let mut fast_forward = FastForward::new(store, key, Duration::from_secs(10), 0);
    let start = Instant::now();
    assert!(fast_forward
        .upgrade(0, &LogKey::new([1; 32]), &LogKey::new([2; 32]), true)
        .is_none());
    assert!(start.elapsed() < Duration::from_secs(5));
}

/// A target whose signature verifies, but whose last block is not a System block, is rejected.
#[test]
fn undecodable_target_rejected_test() {
    let mut store = MemLogStore::new();
    let signer = keypairs(1).pop().unwrap();
    let key = foreign_log(&mut store, &signer, b"not a system block");

    let mut log = store.open(&key);
    let manifest = log.manifest().unwrap();
    let message = signable(
        &manifest.signers[0].namespace,
        &key,
        1,
        &log.tree_hash(1).unwrap(),
    );
    let signature = SignatureBytes::new(signer.sign(&message.bytes()).to_bytes());
    log.commit(Multisig::assemble(
        1,
        vec![PartialSignature {
            signer: 0,
            length: 1,
            signature,
        }],
    ))
    .unwrap();
    assert_eq!(log.signed_length(), 1);

    let mut fast_forward = FastForward::new(store, key, Duration::from_millis(100), 0);
    assert!(fast_forward
        .upgrade(0, &LogKey::new([1; 32]), &LogKey::new([2; 32]), true)
        .is_none());
    assert!(!fast_forward.is_closed());
}

#[test]
fn upgrade_times_out_test() {
    let mut fast_forward = FastForward::new(
        MemLogStore::new(),
        LogKey::new([7; 32]),
        Duration::from_millis(100),
        0,
    );

    let start = Instant::now();
    assert!(fast_forward
        .upgrade(0, &LogKey::new([1; 32]), &LogKey::new([2; 32]), true)
        .is_none());
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(!fast_forward.is_closed());
}

/// Cancelling from another thread stops a pending wait right away.
#[test]
fn upgrade_cancelled_test() {
    let mut fast_forward = FastForward::new(
        MemLogStore::new(),
        LogKey::new([7; 32]),
        Duration::from_secs(10),
        0,
    );
    let canceller = fast_forward.canceller();
    let cancelling = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });

    let start = Instant::now();
    assert!(fast_forward
        .upgrade(0, &LogKey::new([1; 32]), &LogKey::new([2; 32]), true)
        .is_none());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(fast_forward.is_closed());
    cancelling.join().unwrap();
}
