/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods for inspecting validator snapshots and for managing this node's validator votes.

use std::collections::HashMap;

use crate::{
    chain::ChainReader,
    networking::network::Network,
    snapshot::{pluggables::KVStore, Snapshot},
    types::{
        block::Header,
        data_types::{Address, CryptoHash},
    },
};

use super::{sport_backend::SportBackend, BackendError, VerifyError};

impl<N: Network, K: KVStore, C: ChainReader> SportBackend<N, K, C> {
    /// Get the snapshot at block `number` of the canonical chain, or at the chain head if `number` is
    /// `None`.
    pub fn get_snapshot(&self, number: Option<u64>) -> Result<Snapshot, BackendError> {
        let header = self.header_by_number(number)?;
        Ok(self.snapshot(header.number, header.hash())?)
    }

    pub fn get_snapshot_at_hash(&self, hash: &CryptoHash) -> Result<Snapshot, BackendError> {
        let header = self
            .inner
            .chain
            .get_header_by_hash(hash)
            .ok_or(VerifyError::UnknownBlock)?;
        Ok(self.snapshot(header.number, header.hash())?)
    }

    /// Get the validators authorized at block `number`, or at the chain head if `number` is `None`.
    pub fn get_validators(&self, number: Option<u64>) -> Result<Vec<Address>, BackendError> {
        Ok(self.get_snapshot(number)?.validators())
    }

    pub fn get_validators_at_hash(&self, hash: &CryptoHash) -> Result<Vec<Address>, BackendError> {
        Ok(self.get_snapshot_at_hash(hash)?.validators())
    }

    /// The votes this node casts when it produces blocks.
    pub fn candidates(&self) -> HashMap<Address, bool> {
        self.inner.candidates.read().clone()
    }

    /// Vote to authorize (`authorize == true`) or drop `address` in the blocks this node produces,
    /// replacing any earlier vote on it.
    pub fn propose(&self, address: Address, authorize: bool) {
        self.inner.candidates.write().insert(address, authorize);
    }

    /// Withdraw this node's vote on `address`.
    pub fn discard(&self, address: &Address) {
        self.inner.candidates.write().remove(address);
    }

    fn header_by_number(&self, number: Option<u64>) -> Result<Header, BackendError> {
        match number {
            Some(number) => Ok(self
                .inner
                .chain
                .get_header_by_number(number)
                .ok_or(VerifyError::UnknownBlock)?),
            None => Ok(self.inner.chain.current_block().header().clone()),
        }
    }
}
