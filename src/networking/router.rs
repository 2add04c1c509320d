/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! De-duplication of gossiped consensus messages.
//!
//! The router remembers, by payload hash, which messages this node has already seen
//! (`known_messages`) and which messages each peer is known to have (`recent_messages`), either
//! because the peer sent them to us or because we sent them to the peer. Both caches have fixed
//! capacity. An eviction only causes a redundant delivery, which consensus tolerates.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::{
    crypto_primitives::keccak256,
    data_types::{Address, CryptoHash},
    validator_set::ValidatorSet,
};

/// Number of peers whose recent messages are tracked.
pub const INMEMORY_PEERS: usize = 40;

/// Number of message hashes tracked per peer, and for this node.
pub const INMEMORY_MESSAGES: usize = 1024;

pub(crate) struct Router {
    address: Address,
    recent_messages: Mutex<LruCache<Address, LruCache<CryptoHash, ()>>>,
    known_messages: Mutex<LruCache<CryptoHash, ()>>,
}

impl Router {
    pub(crate) fn new(address: Address) -> Router {
        Router {
            address,
            recent_messages: Mutex::new(LruCache::new(capacity(INMEMORY_PEERS))),
            known_messages: Mutex::new(LruCache::new(capacity(INMEMORY_MESSAGES))),
        }
    }

    /// Record that `from` sent us `payload`. Returns whether this node is seeing `payload` for the
    /// first time, i.e., whether it should be handed to the engine.
    pub(crate) fn on_receive(&self, from: Address, payload: &[u8]) -> bool {
        let hash = keccak256(payload);
        self.mark_peer(from, hash);

        let mut known_messages = self.known_messages.lock();
        if known_messages.contains(&hash) {
            return false;
        }
        known_messages.put(hash, ());
        true
    }

    /// Record that this node is gossiping `payload`, and return the peers among `connected` that
    /// should receive it: validators in `validators` other than this node that are not known to have
    /// it. The returned peers are recorded as having it.
    pub(crate) fn gossip_targets(
        &self,
        validators: &ValidatorSet,
        connected: &[Address],
        payload: &[u8],
    ) -> Vec<Address> {
        let hash = keccak256(payload);
        self.known_messages.lock().put(hash, ());

        let mut recent_messages = self.recent_messages.lock();
        connected
            .iter()
            .filter(|peer| **peer != self.address && validators.contains(peer))
            .filter(|peer| {
                let seen = recent_messages
                    .get_or_insert_mut(**peer, || LruCache::new(capacity(INMEMORY_MESSAGES)));
                if seen.contains(&hash) {
                    false
                } else {
                    seen.put(hash, ());
                    true
                }
            })
            .copied()
            .collect()
    }

    /// The validators in `validators` other than this node.
    pub(crate) fn targets(&self, validators: &ValidatorSet) -> Vec<Address> {
        validators
            .list()
            .iter()
            .filter(|validator| **validator != self.address)
            .copied()
            .collect()
    }

    fn mark_peer(&self, peer: Address, hash: CryptoHash) {
        self.recent_messages
            .lock()
            .get_or_insert_mut(peer, || LruCache::new(capacity(INMEMORY_MESSAGES)))
            .put(hash, ());
    }
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::validator_set::ProposerPolicy;

    fn address(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn validator_set(members: &[u8]) -> ValidatorSet {
        let members: Vec<Address> = members.iter().map(|byte| address(*byte)).collect();
        ValidatorSet::new(&members, ProposerPolicy::RoundRobin)
    }

    #[test]
    fn on_receive_drops_duplicates_test() {
        let router = Router::new(address(1));

        assert!(router.on_receive(address(2), b"prepare"));
        assert!(!router.on_receive(address(2), b"prepare"));
        // A copy from another peer is still a duplicate.
        assert!(!router.on_receive(address(3), b"prepare"));
        assert!(router.on_receive(address(3), b"commit"));
    }

    #[test]
    fn gossip_targets_test() {
        let router = Router::new(address(1));
        let validators = validator_set(&[1, 2, 3, 4]);
        let connected = [address(1), address(2), address(3), address(4), address(5)];

        // 1. Validator 2 sent us the payload, so it already has it.
        assert!(router.on_receive(address(2), b"preprepare"));

        // 2. Neither this node, the sender, nor the non-validator 5 is a target.
        assert_eq!(
            router.gossip_targets(&validators, &connected, b"preprepare"),
            vec![address(3), address(4)]
        );

        // 3. Every validator now has it.
        assert!(router
            .gossip_targets(&validators, &connected, b"preprepare")
            .is_empty());

        // 4. Gossiping a payload marks it as known to this node.
        assert_eq!(
            router.gossip_targets(&validators, &connected, b"round change"),
            vec![address(2), address(3), address(4)]
        );
        assert!(!router.on_receive(address(3), b"round change"));
    }

    #[test]
    fn targets_test() {
        let router = Router::new(address(2));
        let validators = validator_set(&[1, 2, 3]);

        let mut targets = router.targets(&validators);
        targets.sort();
        assert_eq!(targets, vec![address(1), address(3)]);
    }
}
