//! A [`Backend`] that records what the core asks of it, for driving a [`Core`] by hand.
//!
//! [`Core`]: sport_bft::consensus::implementation::Core

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use sport_bft::{
    backend::{Backend, BackendError, VerifyError},
    consensus::messages::ConsensusMessage,
    types::{
        block::{Block, Proposal},
        crypto_primitives::{recover_address, Keypair},
        data_types::{Address, CryptoHash, Signature},
        validator_set::{ProposerPolicy, ValidatorSet},
    },
};

#[derive(Clone)]
pub(crate) struct MockBackend {
    keypair: Keypair,
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    validators: Vec<Address>,
    policy: ProposerPolicy,
    last_proposal: Block,
    last_proposer: Address,
    chain: HashMap<u64, (CryptoHash, Address)>,
    bad_proposals: HashSet<CryptoHash>,
    invalid_proposals: HashSet<CryptoHash>,
    future_proposals: HashMap<CryptoHash, Duration>,
    fail_commits: bool,
    broadcasts: Vec<ConsensusMessage>,
    gossips: usize,
    committed: Vec<(Block, Vec<Signature>)>,
}

impl MockBackend {
    pub(crate) fn new(
        keypair: Keypair,
        validators: Vec<Address>,
        policy: ProposerPolicy,
        genesis: Block,
    ) -> MockBackend {
        MockBackend {
            keypair,
            state: Arc::new(Mutex::new(MockState {
                validators,
                policy,
                chain: HashMap::from([(0, (genesis.hash(), Address::zero()))]),
                last_proposal: genesis,
                last_proposer: Address::zero(),
                bad_proposals: HashSet::new(),
                invalid_proposals: HashSet::new(),
                future_proposals: HashMap::new(),
                fail_commits: false,
                broadcasts: Vec::new(),
                gossips: 0,
                committed: Vec::new(),
            })),
        }
    }

    /// Make `block`, proposed by `proposer`, the head of the chain.
    pub(crate) fn set_head(&self, block: Block, proposer: Address) {
        let mut state = self.state.lock().unwrap();
        state
            .chain
            .insert(block.number(), (block.hash(), proposer));
        state.last_proposal = block;
        state.last_proposer = proposer;
    }

    pub(crate) fn mark_bad(&self, hash: CryptoHash) {
        self.state.lock().unwrap().bad_proposals.insert(hash);
    }

    pub(crate) fn mark_invalid(&self, hash: CryptoHash) {
        self.state.lock().unwrap().invalid_proposals.insert(hash);
    }

    pub(crate) fn mark_future(&self, hash: CryptoHash, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .future_proposals
            .insert(hash, delay);
    }

    pub(crate) fn fail_commits(&self) {
        self.state.lock().unwrap().fail_commits = true;
    }

    /// Take the messages broadcast since the last call.
    pub(crate) fn take_broadcasts(&self) -> Vec<ConsensusMessage> {
        std::mem::take(&mut self.state.lock().unwrap().broadcasts)
    }

    pub(crate) fn gossips(&self) -> usize {
        self.state.lock().unwrap().gossips
    }

    pub(crate) fn committed(&self) -> Vec<(Block, Vec<Signature>)> {
        self.state.lock().unwrap().committed.clone()
    }
}

impl Backend for MockBackend {
    type Proposal = Block;

    fn address(&self) -> Address {
        self.keypair.address()
    }

    fn validators(&self, _: &Block) -> ValidatorSet {
        let state = self.state.lock().unwrap();
        ValidatorSet::new(&state.validators, state.policy)
    }

    fn parent_validators(&self, proposal: &Block) -> ValidatorSet {
        self.validators(proposal)
    }

    fn last_proposal(&self) -> (Block, Address) {
        let state = self.state.lock().unwrap();
        (state.last_proposal.clone(), state.last_proposer)
    }

    fn has_proposal(&self, hash: &CryptoHash, number: u64) -> bool {
        self.state
            .lock()
            .unwrap()
            .chain
            .get(&number)
            .is_some_and(|(known, _)| known == hash)
    }

    fn has_bad_proposal(&self, hash: &CryptoHash) -> bool {
        self.state.lock().unwrap().bad_proposals.contains(hash)
    }

    fn get_proposer(&self, number: u64) -> Address {
        self.state
            .lock()
            .unwrap()
            .chain
            .get(&number)
            .map(|(_, proposer)| *proposer)
            .unwrap_or_default()
    }

    fn verify(&self, proposal: &Block) -> Result<(), VerifyError> {
        let state = self.state.lock().unwrap();
        let hash = proposal.hash();
        if let Some(delay) = state.future_proposals.get(&hash) {
            return Err(VerifyError::FutureBlock { delay: *delay });
        }
        if state.invalid_proposals.contains(&hash) || state.bad_proposals.contains(&hash) {
            return Err(VerifyError::InvalidProposal);
        }
        Ok(())
    }

    fn commit(&self, proposal: Block, committed_seals: Vec<Signature>) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(BackendError::UnknownAncestor);
        }
        state.committed.push((proposal, committed_seals));
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, BackendError> {
        Ok(self.keypair.sign(data)?)
    }

    fn check_signature(
        &self,
        data: &[u8],
        address: &Address,
        signature: &Signature,
    ) -> Result<(), BackendError> {
        if recover_address(data, signature)? != *address {
            return Err(BackendError::InvalidSigner);
        }
        Ok(())
    }

    fn broadcast(&self, _: &ValidatorSet, payload: Vec<u8>) {
        let msg = ConsensusMessage::from_payload(&payload).unwrap();
        self.state.lock().unwrap().broadcasts.push(msg);
    }

    fn gossip(&self, _: &ValidatorSet, _: Vec<u8>) {
        self.state.lock().unwrap().gossips += 1;
    }
}
