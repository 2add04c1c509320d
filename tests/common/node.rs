use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use sport_bft::{
    backend::{sport_backend::SportBackend, BackendError},
    chain::ChainReader,
    config::Configuration,
    events::{CommitBlockEvent, ReceivePreprepareEvent, RoundChangeEvent, StartRoundEvent},
    replica::{Replica, ReplicaSpec},
    types::{
        block::{Header, Proposal, Transaction},
        crypto_primitives::Keypair,
        data_types::Address,
    },
};

use super::{
    logging::{first_seven_base64_chars, log_with_context},
    mem_chain::MemChain,
    mem_db::MemDB,
    network::NetworkStub,
};

/// Things the Nodes will have in common:
/// - Genesis block (and therefore the initial validator set).
/// - Configuration.
///
/// Things that they will differ in:
/// - Chain instance.
/// - Network instance.
/// - KVStore.
/// - Keypair.
///
/// Each node runs a producer thread that, like a miner, repeatedly prepares, finalizes and seals a
/// block on top of its chain head, and announces every new head to the engine.
pub(crate) struct Node {
    address: Address,
    chain: MemChain,
    replica: Option<Replica<NetworkStub, MemDB, MemChain>>,
    producer: Option<JoinHandle<()>>,
    producer_shutdown: Arc<AtomicBool>,
}

impl Node {
    pub(crate) fn new(
        keypair: Keypair,
        network: NetworkStub,
        genesis: Header,
        configuration: Configuration,
    ) -> Node {
        let address = keypair.address();
        let chain = MemChain::new(genesis);

        let replica = ReplicaSpec::builder()
            .keypair(keypair)
            .chain(chain.clone())
            .network(network)
            .kv_store(MemDB::new())
            .configuration(configuration)
            .on_start_round(start_round_handler(address))
            .on_receive_preprepare(receive_preprepare_handler(address))
            .on_round_change(round_change_handler(address))
            .on_commit_block(commit_block_handler(address))
            .build()
            .start();

        let producer_shutdown = Arc::new(AtomicBool::new(false));
        let producer = start_producer(
            replica.backend().clone(),
            chain.clone(),
            producer_shutdown.clone(),
        );

        Node {
            address,
            chain,
            replica: Some(replica),
            producer: Some(producer),
            producer_shutdown,
        }
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn height(&self) -> u64 {
        self.chain.height()
    }

    pub(crate) fn chain(&self) -> &MemChain {
        &self.chain
    }

    pub(crate) fn backend(&self) -> &SportBackend<NetworkStub, MemDB, MemChain> {
        self.replica.as_ref().unwrap().backend()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Stopping the engine releases a producer blocked in `seal`.
        self.producer_shutdown.store(true, Ordering::SeqCst);
        drop(self.replica.take());
        if let Some(producer) = self.producer.take() {
            producer.join().unwrap();
        }
    }
}

fn start_producer(
    backend: SportBackend<NetworkStub, MemDB, MemChain>,
    chain: MemChain,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            let parent = chain.current_block();
            let mut header = Header {
                parent_hash: parent.hash(),
                number: parent.number() + 1,
                gas_limit: parent.header().gas_limit,
                extra: b"sport node".to_vec(),
                ..Header::default()
            };
            if let Err(err) = backend.prepare(&mut header) {
                log::debug!("Failed to prepare a header: {:?}", err);
                thread::sleep(Duration::from_millis(100));
                continue;
            }

            let transactions = vec![Transaction::new(header.number.to_be_bytes().to_vec())];
            let block = backend.finalize(header, transactions);
            match backend.seal(block) {
                Ok(Some(block)) => {
                    chain.push(block);
                    let _ = backend.new_chain_head();
                }
                Ok(None) => {
                    let _ = backend.new_chain_head();
                }
                Err(BackendError::StoppedEngine) => return,
                Err(err) => {
                    log::debug!("Failed to seal a block: {:?}", err);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    })
}

fn start_round_handler(address: Address) -> impl Fn(&StartRoundEvent) + Send + 'static {
    move |start_round_event| {
        log_with_context(
            Some(address),
            &format!(
                "Started round, view: {}, proposer: {}",
                start_round_event.view,
                first_seven_base64_chars(start_round_event.proposer.as_slice())
            ),
        );
    }
}

fn receive_preprepare_handler(
    address: Address,
) -> impl Fn(&ReceivePreprepareEvent) + Send + 'static {
    move |receive_preprepare_event| {
        log_with_context(
            Some(address),
            &format!(
                "Received preprepare, view: {}, proposal: {}",
                receive_preprepare_event.view,
                first_seven_base64_chars(receive_preprepare_event.proposal.as_slice())
            ),
        );
    }
}

fn round_change_handler(address: Address) -> impl Fn(&RoundChangeEvent) + Send + 'static {
    move |round_change_event| {
        log_with_context(
            Some(address),
            &format!("Sent round change, view: {}", round_change_event.view),
        );
    }
}

fn commit_block_handler(address: Address) -> impl Fn(&CommitBlockEvent) + Send + 'static {
    move |commit_block_event| {
        log_with_context(
            Some(address),
            &format!(
                "Committed block, number: {}, hash: {}, seals: {}",
                commit_block_event.number,
                first_seven_base64_chars(commit_block_event.block.as_slice()),
                commit_block_event.committed_seals
            ),
        );
    }
}
