use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use causal_base::{
    networking::{Network, WakeupMessage},
    types::data_types::LogKey,
};

/// A mock network stub which passes wakeup messages between bases using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_key: LogKey,
    all_peers: HashMap<LogKey, Sender<(LogKey, WakeupMessage)>>,
    inbox: Arc<Mutex<Receiver<(LogKey, WakeupMessage)>>>,
}

impl Network for NetworkStub {
    fn send(&mut self, peer: LogKey, message: WakeupMessage) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_key, message));
        }
    }

    fn broadcast(&mut self, message: WakeupMessage) {
        for (key, peer) in &self.all_peers {
            if *key != self.my_key {
                let _ = peer.send((self.my_key, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(LogKey, WakeupMessage)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Create one connected `NetworkStub` for each of `peers`, in the same order.
pub(crate) fn mock_network(peers: impl Iterator<Item = LogKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(LogKey, Receiver<(LogKey, WakeupMessage)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_key, inbox)| NetworkStub {
            my_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
