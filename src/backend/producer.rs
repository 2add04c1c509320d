/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Production of new blocks.
//!
//! The host produces a block in three steps:
//! 1. [`prepare`](SportBackend::prepare) fills in the consensus fields of a fresh header: the vote it
//!    carries, the validator list, the difficulty and the timestamp.
//! 2. [`finalize`](SportBackend::finalize) computes the roots and assembles the block.
//! 3. [`seal`](SportBackend::seal) signs the header, proposes the block to the engine, and blocks
//!    until the engine decides it or the attempt becomes stale.

use std::{
    sync::mpsc::RecvTimeoutError,
    thread,
    time::{Duration, SystemTime},
};

use rand::{seq::SliceRandom, thread_rng};

use crate::{
    chain::ChainReader,
    consensus::engine::EngineEvent,
    networking::network::Network,
    snapshot::pluggables::KVStore,
    types::{
        block::{empty_uncle_hash, transactions_hash, Block, Header, Proposal, Transaction},
        data_types::{Address, CryptoHash, Nonce},
        extra::{self, SPORT_DIGEST},
    },
};

use super::{
    sport_backend::SportBackend, verifier::secs_since_unix_epoch, BackendError, VerifyError,
};

/// How often a pending [`seal`](SportBackend::seal) checks whether its block went stale.
pub const SEAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl<N: Network, K: KVStore, C: ChainReader> SportBackend<N, K, C> {
    /// Fill in the consensus fields of `header`, whose `parent_hash`, `number` and vanity extra-data
    /// the host has already set.
    ///
    /// If there are candidate votes that would change the parent's validator set, one of them is
    /// picked at random and carried in the header's coinbase and nonce.
    pub fn prepare(&self, header: &mut Header) -> Result<(), BackendError> {
        header.coinbase = Address::zero();
        header.nonce = Nonce::EMPTY;
        header.mix_digest = SPORT_DIGEST;
        header.difficulty = 1;

        let parent_number = header
            .number
            .checked_sub(1)
            .ok_or(BackendError::UnknownAncestor)?;
        let parent = self
            .inner
            .chain
            .get_header(&header.parent_hash, parent_number)
            .ok_or(BackendError::UnknownAncestor)?;
        let snapshot = self.snapshot(parent_number, header.parent_hash)?;

        let valid_votes: Vec<(Address, bool)> = self
            .inner
            .candidates
            .read()
            .iter()
            .filter(|(address, authorize)| snapshot.check_vote(address, **authorize))
            .map(|(address, authorize)| (*address, *authorize))
            .collect();
        if let Some((address, authorize)) = valid_votes.choose(&mut thread_rng()) {
            header.coinbase = *address;
            header.nonce = if *authorize {
                Nonce::AUTH_VOTE
            } else {
                Nonce::DROP_VOTE
            };
        }

        header.extra = extra::prepare_extra(&header.extra, &snapshot.validators());
        header.time = parent
            .time
            .saturating_add(self.inner.config.block_period)
            .max(secs_since_unix_epoch());
        Ok(())
    }

    /// Compute the state, transaction and uncle roots of `header` and assemble the block.
    pub fn finalize(&self, mut header: Header, transactions: Vec<Transaction>) -> Block {
        header.root = self.inner.chain.state_root(&header, &transactions);
        header.uncle_hash = empty_uncle_hash();
        header.tx_hash = transactions_hash(&transactions);
        Block::new(header, transactions)
    }

    /// Sign `block`, propose it to the engine, and wait for the engine to decide it.
    ///
    /// Returns the block with its committed seals once it is decided, or `None` if the attempt went
    /// stale first: the local chain reached the block's height through another block, or the engine
    /// was stopped.
    pub fn seal(&self, block: Block) -> Result<Option<Block>, BackendError> {
        let mut header = block.header().clone();
        let number = header.number;
        let parent_number = number
            .checked_sub(1)
            .ok_or(BackendError::VerifyError(VerifyError::UnknownBlock))?;

        let snapshot = self.snapshot(parent_number, header.parent_hash)?;
        if !snapshot.validator_set.contains(&self.inner.address) {
            return Err(BackendError::Unauthorized(self.inner.address));
        }
        if self
            .inner
            .chain
            .get_header(&header.parent_hash, parent_number)
            .is_none()
        {
            return Err(BackendError::UnknownAncestor);
        }
        if block.transactions().is_empty() && number >= self.inner.config.min_blocks_empty_mining {
            return Err(BackendError::WaitTransactions);
        }

        let seal_hash = extra::seal_hash(&header)?;
        let seal = self.inner.keypair.sign(seal_hash.as_slice())?;
        extra::write_seal(&mut header, &seal)?;
        let block = block.with_header(header);

        // Not before the block's own timestamp.
        let target = SystemTime::UNIX_EPOCH + Duration::from_secs(block.timestamp());
        if let Ok(delay) = target.duration_since(SystemTime::now()) {
            thread::sleep(delay);
        }

        *self.inner.proposed_block_hash.lock() = block.hash();
        let result = if self.post(EngineEvent::Request(block.clone())) {
            Ok(self.wait_for_commit(&block))
        } else {
            Err(BackendError::StoppedEngine)
        };
        *self.inner.proposed_block_hash.lock() = CryptoHash::zero();
        result
    }

    fn wait_for_commit(&self, block: &Block) -> Option<Block> {
        let hash = block.hash();
        loop {
            let received = match self.inner.commit_rx.lock().as_ref() {
                Some(commit_rx) => commit_rx.recv_timeout(SEAL_POLL_INTERVAL),
                None => return None,
            };
            match received {
                Ok(committed) if committed.hash() == hash => return Some(committed),
                Ok(committed) => log::debug!(
                    "Discarding a committed block from an earlier seal, hash: {}",
                    committed.hash()
                ),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return None,
            }

            if self.inner.chain.current_block().number() >= block.number() {
                log::debug!(
                    "Sealed block went stale, number: {}, hash: {}",
                    block.number(),
                    hash
                );
                return None;
            }
        }
    }
}
