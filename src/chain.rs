/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable access to the host's blockchain.
//!
//! The engine does not store blocks. It reads headers from, and hands committed blocks to, the host
//! through a [`ChainReader`]. Implementations must be cheap to clone and safe to use from several
//! threads, because the engine thread, the network poller and the host's sealing calls all hold one.

use crate::types::{
    block::{Block, Header, Transaction},
    data_types::CryptoHash,
};

pub trait ChainReader: Clone + Send + Sync + 'static {
    /// Get the header with the given hash, if it is in the chain at `number`.
    fn get_header(&self, hash: &CryptoHash, number: u64) -> Option<Header>;

    /// Get the canonical header at `number`.
    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    fn get_header_by_hash(&self, hash: &CryptoHash) -> Option<Header>;

    /// Get the head of the canonical chain. Before the first block is imported, this is genesis.
    fn current_block(&self) -> Block;

    /// Check whether the block with `hash` is known to be invalid.
    fn has_bad_block(&self, hash: &CryptoHash) -> bool;

    /// Execute `transactions` on top of the state of `header`'s parent and return the resulting state
    /// root. Called when a block being produced is finalized.
    fn state_root(&self, header: &Header, transactions: &[Transaction]) -> CryptoHash;

    /// Hand a block that this node did not propose, but whose commit it observed, to the host for
    /// import. The host announces the import later via [`SportBackend::new_chain_head`].
    ///
    /// [`SportBackend::new_chain_head`]: crate::backend::sport_backend::SportBackend::new_chain_head
    fn insert_block(&self, block: Block);
}
