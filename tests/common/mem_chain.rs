//! A simple, volatile, in-memory implementation of [`ChainReader`].

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use sport_bft::{
    chain::ChainReader,
    types::{
        block::{transactions_hash, Block, Header, Proposal, Transaction},
        crypto_primitives::keccak256_concat,
        data_types::CryptoHash,
    },
};

/// A single canonical chain, starting from a genesis block, that only grows by blocks extending its
/// head.
#[derive(Clone)]
pub(crate) struct MemChain(Arc<Mutex<ChainState>>);

struct ChainState {
    blocks: HashMap<CryptoHash, Block>,
    canonical: Vec<CryptoHash>,
    bad_blocks: HashSet<CryptoHash>,
}

impl MemChain {
    pub(crate) fn new(genesis: Header) -> MemChain {
        let genesis = Block::new(genesis, Vec::new());
        let hash = genesis.hash();
        MemChain(Arc::new(Mutex::new(ChainState {
            blocks: HashMap::from([(hash, genesis)]),
            canonical: vec![hash],
            bad_blocks: HashSet::new(),
        })))
    }

    /// Append `block` if it extends the head. Returns whether it did.
    pub(crate) fn push(&self, block: Block) -> bool {
        let mut state = self.0.lock().unwrap();
        let head = *state.canonical.last().unwrap();
        if block.parent_hash() != head || block.number() != state.canonical.len() as u64 {
            return false;
        }
        let hash = block.hash();
        state.canonical.push(hash);
        state.blocks.insert(hash, block);
        true
    }

    pub(crate) fn push_header(&self, header: Header) -> bool {
        self.push(Block::new(header, Vec::new()))
    }

    pub(crate) fn mark_bad(&self, hash: CryptoHash) {
        self.0.lock().unwrap().bad_blocks.insert(hash);
    }

    pub(crate) fn height(&self) -> u64 {
        self.0.lock().unwrap().canonical.len() as u64 - 1
    }

    pub(crate) fn block(&self, number: u64) -> Option<Block> {
        let state = self.0.lock().unwrap();
        let hash = state.canonical.get(number as usize)?;
        state.blocks.get(hash).cloned()
    }
}

impl ChainReader for MemChain {
    fn get_header(&self, hash: &CryptoHash, number: u64) -> Option<Header> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(hash)
            .filter(|block| block.number() == number)
            .map(|block| block.header().clone())
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.block(number).map(|block| block.header().clone())
    }

    fn get_header_by_hash(&self, hash: &CryptoHash) -> Option<Header> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(hash)
            .map(|block| block.header().clone())
    }

    fn current_block(&self) -> Block {
        let state = self.0.lock().unwrap();
        let head = state.canonical.last().unwrap();
        state.blocks[head].clone()
    }

    fn has_bad_block(&self, hash: &CryptoHash) -> bool {
        self.0.lock().unwrap().bad_blocks.contains(hash)
    }

    fn state_root(&self, header: &Header, transactions: &[Transaction]) -> CryptoHash {
        keccak256_concat(&[
            header.parent_hash.as_slice(),
            transactions_hash(transactions).as_slice(),
        ])
    }

    fn insert_block(&self, block: Block) {
        self.push(block);
    }
}
