use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use sport_bft::{
    networking::{messages::Message, network::Network},
    types::data_types::Address,
};

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_address: Address,
    all_peers: HashMap<Address, Sender<(Address, Message)>>,
    inbox: Arc<Mutex<Receiver<(Address, Message)>>>,
}

impl Network for NetworkStub {
    fn find_peers(&self, targets: &[Address]) -> Vec<Address> {
        targets
            .iter()
            .filter(|target| self.all_peers.contains_key(target))
            .copied()
            .collect()
    }

    fn send(&mut self, peer: Address, message: Message) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_address, message));
        }
    }

    fn recv(&mut self) -> Option<(Address, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = Address>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(Address, Receiver<(Address, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_address, inbox)| NetworkStub {
            my_address,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
