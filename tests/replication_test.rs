use log::LevelFilter;

use causal_base::append_log::{AppendLog, LogStore};

mod common;

use common::{
    logging::{log_with_context, setup_logger},
    mem_log::replicate,
    network::mock_network,
    peer::{confirm, keypairs, sync, writer_key, Peer, PeerOptions},
    test_applier::{add, add_indexer, OUTPUT},
};

/// Start `n` peers, all bootstrapped from the first.
fn peers(n: usize) -> Vec<Peer> {
    let keypairs = keypairs(n);
    let networks = mock_network(keypairs.iter().map(writer_key));
    let mut bootstrap = None;
    keypairs
        .into_iter()
        .zip(networks)
        .map(|(keypair, network)| {
            let peer = Peer::new(
                keypair,
                network,
                PeerOptions {
                    bootstrap,
                    ..PeerOptions::default()
                },
            );
            bootstrap = bootstrap.or(Some(peer.key()));
            peer
        })
        .collect()
}

/// A writer that is not an indexer appends, and both bases converge on the same indexed output.
#[test]
fn two_bases_converge_test() {
    setup_logger(LevelFilter::Debug);

    let mut peers = peers(2);
    let (a, b) = peers.split_at_mut(1);
    let (a, b) = (&mut a[0], &mut b[0]);

    // 1. A adds B as a writer, and B learns about it.
    a.append(&add(&b.key()));
    sync(&mut [&mut *a, &mut *b]);
    assert!(b.base.writable());
    assert!(!b.base.is_indexer());
    assert_eq!(b.base.system_key(), a.base.system_key());

    // 2. B appends. A sees the value before it is indexed.
    log_with_context(Some(b.key()), "Appending as a non-indexer");
    b.append(b"from b");
    sync(&mut [&mut *a, &mut *b]);
    assert_eq!(a.output(), vec![b"from b".to_vec()]);
    assert_eq!(a.output_indexed_length(), 0);

    // 3. Once A acks, the value is indexed on both bases.
    confirm(&mut [&mut *a, &mut *b]);
    assert_eq!(a.output(), b.output());
    assert_eq!(a.output_indexed_length(), 1);
    assert_eq!(b.output_indexed_length(), 1);
    assert_eq!(a.base.indexed_length(), b.base.indexed_length());
}

/// Nodes that arrive after a lighter branch was applied are ordered first, which undoes and
/// reapplies the lighter branch. An observer that sees everything at once ends up with the same
/// output.
#[test]
fn reorder_and_converge_test() {
    setup_logger(LevelFilter::Debug);

    let mut peers = peers(4);
    let (a, rest) = peers.split_at_mut(1);
    let (b, rest) = rest.split_at_mut(1);
    let (c, d) = rest.split_at_mut(1);
    let (a, b, c, d) = (&mut a[0], &mut b[0], &mut c[0], &mut d[0]);

    // 1. A adds B and C as writers.
    a.append(&add(&b.key()));
    a.append(&add(&c.key()));
    sync(&mut [&mut *a, &mut *b, &mut *c]);
    assert!(b.base.writable());
    assert!(c.base.writable());

    // 2. B and C append concurrently. C's branch is heavier.
    b.append(b"b0");
    c.append(b"c0");
    c.append(b"c1");

    // 3. A receives B's node first...
    replicate(&b.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(a.output(), vec![b"b0".to_vec()]);

    // 4. ...then C's, which sort before it.
    log_with_context(Some(a.key()), "Receiving the heavier branch");
    replicate(&c.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(
        a.output(),
        vec![b"c0".to_vec(), b"c1".to_vec(), b"b0".to_vec()]
    );

    // 5. A confirms everything, and an observer replays it in one go.
    a.base.force_ack().unwrap();
    assert_eq!(a.output_indexed_length(), 3);

    for peer in [&*a, &*b, &*c] {
        replicate(&peer.store, &d.store);
    }
    d.base.update().unwrap();
    assert_eq!(d.output(), a.output());
    assert_eq!(d.output_indexed_length(), 3);
    assert_eq!(d.base.system_key(), a.base.system_key());
}

/// A snapshot taken before a reorg keeps returning what the view held when it was taken.
#[test]
fn snapshot_isolation_test() {
    setup_logger(LevelFilter::Debug);

    let mut peers = peers(3);
    let (a, rest) = peers.split_at_mut(1);
    let (b, c) = rest.split_at_mut(1);
    let (a, b, c) = (&mut a[0], &mut b[0], &mut c[0]);

    a.append(&add(&b.key()));
    a.append(&add(&c.key()));
    sync(&mut [&mut *a, &mut *b, &mut *c]);
    b.append(b"b0");
    c.append(b"c0");
    c.append(b"c1");

    // 1. Take a snapshot while the output is [b0].
    replicate(&b.store, &a.store);
    a.base.update().unwrap();
    let snapshot = a.base.view(OUTPUT).unwrap();
    assert_eq!(snapshot.get(0), Some(b"b0".to_vec()));
    assert!(!snapshot.is_detached());

    // 2. C's heavier branch truncates the view and reorders it.
    replicate(&c.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(a.output()[0], b"c0".to_vec());

    // 3. The snapshot still holds the old content.
    assert!(snapshot.is_detached());
    assert_eq!(snapshot.length(), 1);
    assert_eq!(snapshot.get(0), Some(b"b0".to_vec()));
    assert_eq!(snapshot.get(1), None);
}

/// After any number of reorgs, a base's views and System equal those of a base that applied the
/// final order in one go.
#[test]
fn reorg_matches_fresh_replay_test() {
    setup_logger(LevelFilter::Debug);

    let mut peers = peers(4);
    let (a, rest) = peers.split_at_mut(1);
    let (b, rest) = rest.split_at_mut(1);
    let (c, e) = rest.split_at_mut(1);
    let (a, b, c, e) = (&mut a[0], &mut b[0], &mut c[0], &mut e[0]);

    a.append(&add(&b.key()));
    a.append(&add(&c.key()));
    sync(&mut [&mut *a, &mut *b, &mut *c]);

    // 1. A applies B's branch, then reorders C's heavier branch before it.
    b.append(b"b0");
    c.append(b"c0");
    c.append(b"c1");
    replicate(&b.store, &a.store);
    a.base.update().unwrap();
    replicate(&c.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(
        a.output(),
        vec![b"c0".to_vec(), b"c1".to_vec(), b"b0".to_vec()]
    );

    // 2. B's branch grows past C's, which reorders everything again.
    b.append(b"b1");
    b.append(b"b2");
    b.append(b"b3");
    replicate(&b.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(
        a.output(),
        vec![
            b"b0".to_vec(),
            b"b1".to_vec(),
            b"b2".to_vec(),
            b"b3".to_vec(),
            b"c0".to_vec(),
            b"c1".to_vec(),
        ]
    );
    assert_eq!(a.output_indexed_length(), 0);

    // 3. E receives everything at once.
    for peer in [&*a, &*b, &*c] {
        replicate(&peer.store, &e.store);
    }
    e.base.update().unwrap();
    assert_eq!(e.output(), a.output());
    assert_eq!(e.output_indexed_length(), 0);
    assert_eq!(e.base.system_length(), a.base.system_length());
    assert_eq!(e.base.system_info(), a.base.system_info());
}

/// When the indexer set changes, each view moves to a new log whose prologue is the indexed
/// content of the previous one.
#[test]
fn view_migration_test() {
    setup_logger(LevelFilter::Debug);

    let mut peers = peers(2);
    let (a, b) = peers.split_at_mut(1);
    let (a, b) = (&mut a[0], &mut b[0]);
    let genesis_view = a.base.view(OUTPUT).unwrap().key();

    // 1. The bootstrap writer's first append moves the output onto a log it signs.
    a.append(b"one");
    let first_view = a.base.view(OUTPUT).unwrap().key();
    assert_ne!(first_view, genesis_view);

    let mut store = a.store.clone();
    let genesis_log = store.open(&genesis_view);
    let first_log = store.open(&first_view);
    let manifest = first_log.manifest().unwrap();
    assert_eq!(manifest.signers.len(), 1);
    let prologue = manifest.prologue.unwrap();
    assert_eq!(prologue.length, 1);
    assert_eq!(genesis_log.tree_hash(1), Some(prologue.hash));
    assert_eq!(first_log.get(0), genesis_log.get(0));

    // 2. Adding a second indexer moves it again, onto a log signed by both.
    a.append(b"two");
    replicate(&b.store, &a.store);
    a.append(&add_indexer(&b.key()));
    let second_view = a.base.view(OUTPUT).unwrap().key();
    assert_ne!(second_view, first_view);

    let second_log = store.open(&second_view);
    let manifest = second_log.manifest().unwrap();
    assert_eq!(manifest.signers.len(), 2);
    assert_eq!(manifest.quorum, 2);
    let prologue = manifest.prologue.unwrap();
    assert_eq!(prologue.length, 2);
    assert_eq!(first_log.tree_hash(2), Some(prologue.hash));

    // 3. B derives the same logs, and both indexers keep writing on top of them.
    sync(&mut [&mut *a, &mut *b]);
    assert_eq!(b.base.view(OUTPUT).unwrap().key(), second_view);
    a.append(b"a");
    b.append(b"b");
    confirm(&mut [&mut *a, &mut *b]);
    assert_eq!(a.output(), b.output());
    assert_eq!(a.output_indexed_length(), 4);
    assert_eq!(b.output_indexed_length(), 4);
    assert_eq!(&a.output()[..2], &[b"one".to_vec(), b"two".to_vec()]);
}

/// Adding an indexer whose manifest is not available stalls the base until it is replicated.
#[test]
fn missing_manifest_stalls_test() {
    setup_logger(LevelFilter::Debug);

    let mut peers = peers(2);
    let (a, b) = peers.split_at_mut(1);
    let (a, b) = (&mut a[0], &mut b[0]);
    a.append(b"hello");
    let view = a.base.view(OUTPUT).unwrap().key();

    // 1. The node is stored, but not applied.
    a.append(&add_indexer(&b.key()));
    assert!(!a.base.is_closed());
    assert_eq!(a.base.system_info().indexers.len(), 1);
    assert_eq!(a.base.view(OUTPUT).unwrap().key(), view);
    a.base.update().unwrap();
    assert_eq!(a.base.system_info().indexers.len(), 1);

    // 2. Once B's manifest arrives, the base makes progress.
    replicate(&b.store, &a.store);
    a.base.update().unwrap();
    assert_eq!(a.base.system_info().indexers.len(), 2);
    assert_ne!(a.base.view(OUTPUT).unwrap().key(), view);
    assert_eq!(a.output(), vec![b"hello".to_vec()]);
}
