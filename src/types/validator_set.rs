/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`ValidatorSet`] and [`ProposerPolicy`] types and their associated methods.
//!
//! Every validator has equal weight. With `n` validators the set tolerates `f = floor((n - 1) / 3)`
//! faulty ones, and a quorum ("min approvers") is `ceil(2n / 3)` validators.

use serde::{Deserialize, Serialize};

use super::{
    crypto_primitives::{keccak256, keccak256_concat, recover_address, CryptoError},
    data_types::{Address, Round, Signature},
};

/// How the proposer of a round is chosen from the validator set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposerPolicy {
    /// Rotate through the sorted validator list, one step per block and one per round change.
    RoundRobin,
    /// Pick a validator pseudorandomly from the last proposer, the round and the validator list.
    /// Also called the "Lottery".
    WeightedRandom,
}

impl Default for ProposerPolicy {
    fn default() -> Self {
        ProposerPolicy::WeightedRandom
    }
}

/// Identities of validators, kept in ascending order of address, and the proposer of the current round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<Address>,
    policy: ProposerPolicy,
    proposer: Option<Address>,
}

impl ValidatorSet {
    /// Create a validator set from `validators`, sorting them and removing duplicates. The initial
    /// proposer is the first validator.
    pub fn new(validators: &[Address], policy: ProposerPolicy) -> ValidatorSet {
        let mut validators = validators.to_vec();
        validators.sort();
        validators.dedup();
        let proposer = validators.first().copied();
        ValidatorSet {
            validators,
            policy,
            proposer,
        }
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// Validators in ascending order of address.
    pub fn list(&self) -> &[Address] {
        &self.validators
    }

    pub fn policy(&self) -> ProposerPolicy {
        self.policy
    }

    pub fn get_by_index(&self, index: usize) -> Option<Address> {
        self.validators.get(index).copied()
    }

    /// Get the position of `address` in the sorted list, if it is a validator.
    pub fn get_by_address(&self, address: &Address) -> Option<usize> {
        self.validators.binary_search(address).ok()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    pub fn get_proposer(&self) -> Option<Address> {
        self.proposer
    }

    pub fn is_proposer(&self, address: &Address) -> bool {
        self.proposer.as_ref() == Some(address)
    }

    /// Recompute the proposer for `round` given the proposer of the last block. `last_proposer` is the
    /// zero address before the first block.
    pub fn calc_proposer(&mut self, last_proposer: &Address, round: Round) {
        if self.validators.is_empty() {
            self.proposer = None;
            return;
        }
        let index = match self.policy {
            ProposerPolicy::RoundRobin => self.round_robin_index(last_proposer, round),
            ProposerPolicy::WeightedRandom => self.lottery_index(last_proposer, round),
        };
        self.proposer = Some(self.validators[index]);
    }

    fn round_robin_index(&self, last_proposer: &Address, round: Round) -> usize {
        let n = self.validators.len() as u64;
        let seed = if last_proposer.is_zero() {
            round.int()
        } else {
            // A last proposer that has since been removed rotates from the start of the list.
            let offset = self.get_by_address(last_proposer).unwrap_or(0) as u64;
            offset.wrapping_add(round.int()).wrapping_add(1)
        };
        (seed % n) as usize
    }

    /// `keccak(last_proposer || round as 8 big-endian bytes || keccak(validators concatenated))`, first
    /// eight bytes read big-endian, modulo the set size.
    fn lottery_index(&self, last_proposer: &Address, round: Round) -> usize {
        let validators_bytes: Vec<u8> = self
            .validators
            .iter()
            .flat_map(|validator| validator.bytes())
            .collect();
        let set_seed = keccak256(&validators_bytes);
        let digest = keccak256_concat(&[
            last_proposer.as_slice(),
            &round.int().to_be_bytes(),
            set_seed.as_slice(),
        ]);

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_slice()[..8]);
        (u64::from_be_bytes(prefix) % self.validators.len() as u64) as usize
    }

    /// Insert `address`, keeping the list sorted. Returns false if it is already a validator.
    pub fn add(&mut self, address: Address) -> bool {
        match self.validators.binary_search(&address) {
            Ok(_) => false,
            Err(pos) => {
                self.validators.insert(pos, address);
                true
            }
        }
    }

    /// Remove `address`. Returns false if it is not a validator.
    pub fn remove(&mut self, address: &Address) -> bool {
        match self.validators.binary_search(address) {
            Ok(pos) => {
                self.validators.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Maximum number of faulty validators tolerated: `floor((n - 1) / 3)`.
    pub fn f(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// Size of a quorum: `ceil(2n / 3)`.
    pub fn min_approvers(&self) -> usize {
        (2 * self.validators.len() + 2) / 3
    }

    /// Number of matching ROUND-CHANGE messages that proves at least one honest validator has moved
    /// to a round: `f + 1`.
    pub fn weak_certificate(&self) -> usize {
        self.f() + 1
    }

    /// Recover the signer of `signature` over `data` and check that it is a validator.
    pub fn check_validator_signature(
        &self,
        data: &[u8],
        signature: &Signature,
    ) -> Result<Address, SignerError> {
        let signer = recover_address(data, signature)?;
        if !self.contains(&signer) {
            return Err(SignerError::Unauthorized(signer));
        }
        Ok(signer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerError {
    InvalidSignature,
    /// The signature is valid, but the signer is not in the validator set.
    Unauthorized(Address),
}

impl From<CryptoError> for SignerError {
    fn from(_: CryptoError) -> Self {
        SignerError::InvalidSignature
    }
}
