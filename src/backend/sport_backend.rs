/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Backend`] implementation that connects the consensus engine to a host node.
//!
//! A [`SportBackend`] is a cheap handle to state shared between three parties:
//! 1. The host, which calls the header [verifier](super::verifier), the block
//!    [producer](super::producer) and the [API](super::api), hands it inbound frames through
//!    [`handle_message`](SportBackend::handle_message), and announces imported blocks through
//!    [`new_chain_head`](SportBackend::new_chain_head).
//! 2. The engine thread, which owns a [`Core`] holding a clone of the backend.
//! 3. The network poller, which feeds inbound frames to the backend.
//!
//! ## Commit path
//!
//! When the engine decides a block this node proposed, the block goes back to the
//! [`seal`](SportBackend::seal) call that proposed it, through a single-slot commit channel. Blocks
//! proposed by others are handed to the host through [`ChainReader::insert_block`].

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
        Arc,
    },
    thread::JoinHandle,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    chain::ChainReader,
    config::Configuration,
    consensus::{
        engine::{start_engine, EngineEvent},
        implementation::{Core, CoreConfiguration},
    },
    events::Event,
    networking::{messages::Message, network::Network, router::Router},
    snapshot::{pluggables::KVStore, resolver::SnapshotStore, Snapshot, SnapshotError},
    types::{
        block::{Block, Proposal},
        crypto_primitives::{recover_address, Keypair},
        data_types::{Address, CryptoHash, Signature},
        extra,
        validator_set::ValidatorSet,
    },
};

use super::{Backend, BackendError, VerifyError};

pub struct SportBackend<N: Network, K: KVStore, C: ChainReader> {
    pub(super) inner: Arc<Inner<N, K, C>>,
}

pub(super) struct Inner<N: Network, K: KVStore, C: ChainReader> {
    pub(super) config: Configuration,
    pub(super) keypair: Keypair,
    pub(super) address: Address,
    pub(super) chain: C,
    pub(super) network: Mutex<N>,
    pub(super) snapshots: SnapshotStore<K>,
    pub(super) router: Router,
    /// Votes this node will cast when it produces blocks: `true` to authorize, `false` to drop.
    pub(super) candidates: RwLock<HashMap<Address, bool>>,
    /// Sender of the running engine's event queue. `None` while the engine is stopped.
    pub(super) engine: Mutex<Option<Sender<EngineEvent<Block>>>>,
    pub(super) engine_thread: Mutex<Option<JoinHandle<()>>>,
    /// Hash of the block the pending `seal` call is waiting on, or zero.
    pub(super) proposed_block_hash: Mutex<CryptoHash>,
    pub(super) commit_tx: Mutex<Option<SyncSender<Block>>>,
    pub(super) commit_rx: Mutex<Option<Receiver<Block>>>,
    pub(super) event_publisher: Option<Sender<Event>>,
}

impl<N: Network, K: KVStore, C: ChainReader> Clone for SportBackend<N, K, C> {
    fn clone(&self) -> Self {
        SportBackend {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Network, K: KVStore, C: ChainReader> SportBackend<N, K, C> {
    /// Create a backend whose engine is not running yet. Call [`start`](Self::start) to run it.
    pub fn new(
        config: Configuration,
        keypair: Keypair,
        chain: C,
        network: N,
        kv_store: K,
        event_publisher: Option<Sender<Event>>,
    ) -> SportBackend<N, K, C> {
        let address = keypair.address();
        let snapshots = SnapshotStore::new(
            kv_store,
            config.epoch,
            config.proposer_policy,
            event_publisher.clone(),
        );
        SportBackend {
            inner: Arc::new(Inner {
                config,
                keypair,
                address,
                chain,
                network: Mutex::new(network),
                snapshots,
                router: Router::new(address),
                candidates: RwLock::new(HashMap::new()),
                engine: Mutex::new(None),
                engine_thread: Mutex::new(None),
                proposed_block_hash: Mutex::new(CryptoHash::zero()),
                commit_tx: Mutex::new(None),
                commit_rx: Mutex::new(None),
                event_publisher,
            }),
        }
    }

    /// Start the engine thread. The engine enters round 0 of the height after the current chain head.
    pub fn start(&self) -> Result<(), BackendError> {
        let mut engine = self.inner.engine.lock();
        if engine.is_some() {
            return Err(BackendError::StartedEngine);
        }

        let (commit_tx, commit_rx) = mpsc::sync_channel(1);
        *self.inner.commit_tx.lock() = Some(commit_tx);
        *self.inner.commit_rx.lock() = Some(commit_rx);
        *self.inner.proposed_block_hash.lock() = CryptoHash::zero();

        let (event_queue, events) = mpsc::channel();
        let core = Core::new(
            CoreConfiguration::from(&self.inner.config),
            self.clone(),
            event_queue.clone(),
            self.inner.event_publisher.clone(),
        );
        *engine = Some(event_queue);
        drop(engine);

        *self.inner.engine_thread.lock() = Some(start_engine(core, events));
        log::debug!("Started engine, address: {}", self.inner.address);
        Ok(())
    }

    /// Stop the engine thread and wait for it to exit. A pending [`seal`](Self::seal) returns `None`.
    pub fn stop(&self) -> Result<(), BackendError> {
        let engine = self
            .inner
            .engine
            .lock()
            .take()
            .ok_or(BackendError::StoppedEngine)?;
        let _ = engine.send(EngineEvent::Stop);
        drop(engine);

        if let Some(engine_thread) = self.inner.engine_thread.lock().take() {
            if engine_thread.join().is_err() {
                log::error!("Engine thread panicked, address: {}", self.inner.address);
            }
        }

        *self.inner.commit_tx.lock() = None;
        *self.inner.commit_rx.lock() = None;
        log::debug!("Stopped engine, address: {}", self.inner.address);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.engine.lock().is_some()
    }

    /// Hand an inbound frame from `from` to the engine. Returns `Ok(false)` if the frame does not
    /// belong to the consensus protocol, and `Ok(true)` if it does, whether or not it was new.
    pub fn handle_message(&self, from: Address, message: Message) -> Result<bool, BackendError> {
        if !message.is_consensus() {
            return Ok(false);
        }

        let engine = self.inner.engine.lock();
        let engine = engine.as_ref().ok_or(BackendError::StoppedEngine)?;
        if self.inner.router.on_receive(from, &message.payload) {
            let _ = engine.send(EngineEvent::Message(message.payload));
        }
        Ok(true)
    }

    /// Tell the engine that the host imported a new chain head, so that it moves on to the next height.
    pub fn new_chain_head(&self) -> Result<(), BackendError> {
        let engine = self.inner.engine.lock();
        let engine = engine.as_ref().ok_or(BackendError::StoppedEngine)?;
        let _ = engine.send(EngineEvent::FinalCommitted);
        Ok(())
    }

    pub fn chain(&self) -> &C {
        &self.inner.chain
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// Post `event` to the engine. Returns false if the engine is not running.
    pub(super) fn post(&self, event: EngineEvent<Block>) -> bool {
        match self.inner.engine.lock().as_ref() {
            Some(engine) => engine.send(event).is_ok(),
            None => false,
        }
    }

    pub(super) fn snapshot(
        &self,
        number: u64,
        hash: CryptoHash,
    ) -> Result<Snapshot, SnapshotError> {
        self.inner
            .snapshots
            .snapshot(&self.inner.chain, number, hash, &[])
    }

    fn validators_at(&self, number: u64, hash: CryptoHash) -> ValidatorSet {
        match self.snapshot(number, hash) {
            Ok(snapshot) => snapshot.validator_set,
            Err(err) => {
                log::warn!(
                    "Failed to resolve validators, number: {}, hash: {}, err: {:?}",
                    number,
                    hash,
                    err
                );
                ValidatorSet::new(&[], self.inner.config.proposer_policy)
            }
        }
    }
}

impl<N: Network, K: KVStore, C: ChainReader> Backend for SportBackend<N, K, C> {
    type Proposal = Block;

    fn address(&self) -> Address {
        self.inner.address
    }

    fn validators(&self, proposal: &Block) -> ValidatorSet {
        self.validators_at(proposal.number(), proposal.hash())
    }

    fn parent_validators(&self, proposal: &Block) -> ValidatorSet {
        self.validators_at(proposal.number().saturating_sub(1), proposal.parent_hash())
    }

    fn last_proposal(&self) -> (Block, Address) {
        let block = self.inner.chain.current_block();
        if block.number() == 0 {
            return (block, Address::zero());
        }
        let proposer = match extra::ecrecover(block.header()) {
            Ok(proposer) => proposer,
            Err(err) => {
                log::warn!(
                    "Failed to recover the proposer of the chain head, number: {}, err: {:?}",
                    block.number(),
                    err
                );
                Address::zero()
            }
        };
        (block, proposer)
    }

    fn has_proposal(&self, hash: &CryptoHash, number: u64) -> bool {
        self.inner.chain.get_header(hash, number).is_some()
    }

    fn has_bad_proposal(&self, hash: &CryptoHash) -> bool {
        self.inner.chain.has_bad_block(hash)
    }

    fn get_proposer(&self, number: u64) -> Address {
        self.inner
            .chain
            .get_header_by_number(number)
            .and_then(|header| extra::ecrecover(&header).ok())
            .unwrap_or_default()
    }

    fn verify(&self, proposal: &Block) -> Result<(), VerifyError> {
        self.verify_proposal(proposal)
    }

    fn commit(&self, proposal: Block, committed_seals: Vec<Signature>) -> Result<(), BackendError> {
        let mut header = proposal.header().clone();
        extra::write_committed_seals(&mut header, &committed_seals)?;
        let block = proposal.with_header(header);
        let hash = block.hash();
        log::info!(
            "Committed, address: {}, hash: {}, number: {}",
            self.inner.address,
            hash,
            block.number()
        );

        // A block this node proposed goes back to the `seal` call waiting on it. The host imports it
        // from there.
        if hash == *self.inner.proposed_block_hash.lock() {
            if let Some(commit_tx) = self.inner.commit_tx.lock().as_ref() {
                match commit_tx.try_send(block) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        let (TrySendError::Full(block) | TrySendError::Disconnected(block)) = err;
                        self.inner.chain.insert_block(block);
                        return Ok(());
                    }
                }
            }
        }

        self.inner.chain.insert_block(block);
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, BackendError> {
        Ok(self.inner.keypair.sign(data)?)
    }

    fn check_signature(
        &self,
        data: &[u8],
        address: &Address,
        signature: &Signature,
    ) -> Result<(), BackendError> {
        let signer = recover_address(data, signature)?;
        if signer != *address {
            return Err(BackendError::InvalidSigner);
        }
        Ok(())
    }

    fn broadcast(&self, validators: &ValidatorSet, payload: Vec<u8>) {
        self.post(EngineEvent::Message(payload.clone()));
        self.gossip(validators, payload);
    }

    fn gossip(&self, validators: &ValidatorSet, payload: Vec<u8>) {
        let targets = self.inner.router.targets(validators);
        let mut network = self.inner.network.lock();
        let connected = network.find_peers(&targets);
        for peer in self
            .inner
            .router
            .gossip_targets(validators, &connected, &payload)
        {
            network.send(peer, Message::consensus(payload.clone()));
        }
    }
}
