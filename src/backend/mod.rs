/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The engine's view of the node it runs in.
//!
//! [`consensus::Core`](crate::consensus::implementation::Core) never touches the chain, keys or
//! network directly. It goes through a [`Backend`], which [`SportBackend`](sport_backend::SportBackend)
//! implements on top of a [`ChainReader`](crate::chain::ChainReader), a
//! [`Network`](crate::networking::network::Network) and a
//! [`KVStore`](crate::snapshot::pluggables::KVStore).
//!
//! This module also holds the parts of the engine the host calls into directly: the header
//! [`verifier`], the block [`producer`], and the snapshot and voting [`api`].

use std::time::Duration;

use rlp::DecoderError;

use crate::{
    snapshot::SnapshotError,
    types::{
        block::Proposal,
        crypto_primitives::CryptoError,
        data_types::{Address, CryptoHash, Signature},
        extra::ExtraError,
        validator_set::ValidatorSet,
    },
};

pub mod api;

pub mod producer;

pub mod sport_backend;

pub mod verifier;

/// Everything [`Core`](crate::consensus::implementation::Core) needs from the node.
pub trait Backend: Send + 'static {
    type Proposal: Proposal;

    /// The address of this node.
    fn address(&self) -> Address;

    /// The validator set that decides the block after `proposal`.
    fn validators(&self, proposal: &Self::Proposal) -> ValidatorSet;

    /// The validator set that decided `proposal`.
    fn parent_validators(&self, proposal: &Self::Proposal) -> ValidatorSet;

    /// The head of the local chain, and the address of its proposer (zero for genesis).
    fn last_proposal(&self) -> (Self::Proposal, Address);

    /// Check whether the local chain holds the block `hash` at `number`.
    fn has_proposal(&self, hash: &CryptoHash, number: u64) -> bool;

    fn has_bad_proposal(&self, hash: &CryptoHash) -> bool;

    /// The proposer of block `number` on the local chain, or zero if it is not known.
    fn get_proposer(&self, number: u64) -> Address;

    /// Check that `proposal` is a valid next block. Returns [`VerifyError::FutureBlock`] if it is valid
    /// except that its timestamp is still in the future.
    fn verify(&self, proposal: &Self::Proposal) -> Result<(), VerifyError>;

    /// Hand a decided proposal and its committed seals to the node for insertion.
    fn commit(
        &self,
        proposal: Self::Proposal,
        committed_seals: Vec<Signature>,
    ) -> Result<(), BackendError>;

    /// Sign `data` with this node's key.
    fn sign(&self, data: &[u8]) -> Result<Signature, BackendError>;

    /// Check that `signature` over `data` was produced by `address`.
    fn check_signature(
        &self,
        data: &[u8],
        address: &Address,
        signature: &Signature,
    ) -> Result<(), BackendError>;

    /// Send `payload` to every validator in `validators`, including this node.
    fn broadcast(&self, validators: &ValidatorSet, payload: Vec<u8>);

    /// Send `payload` to every validator in `validators` except this node, skipping peers known to
    /// have it already.
    fn gossip(&self, validators: &ValidatorSet, payload: Vec<u8>);
}

/// Reasons a header or a proposed block fails verification.
#[derive(Debug)]
pub enum VerifyError {
    UnknownBlock,
    InvalidExtraDataFormat,
    InvalidNonce,
    InvalidMixDigest,
    InvalidUncleHash,
    InvalidDifficulty,
    InvalidTimestamp,
    /// The header's timestamp is ahead of the local clock by `delay`.
    FutureBlock {
        delay: Duration,
    },
    UnknownAncestor,
    /// The header was sealed by an account that is not a validator.
    Unauthorized(Address),
    InvalidSignature,
    InvalidCommittedSeals,
    /// The header has no committed seals yet. Expected for a block that is still being decided.
    EmptyCommittedSeals,
    /// The validator list in the header's extra-data differs from the parent snapshot's.
    InconsistentValidatorSet,
    /// The header's transaction root does not match the block's transactions.
    MismatchTxHashes,
    /// The block is on the node's list of bad blocks.
    InvalidProposal,
    SnapshotError(SnapshotError),
}

impl From<ExtraError> for VerifyError {
    fn from(value: ExtraError) -> Self {
        match value {
            ExtraError::InvalidExtraDataFormat => VerifyError::InvalidExtraDataFormat,
            ExtraError::InvalidSignature => VerifyError::InvalidSignature,
            ExtraError::InvalidCommittedSeals => VerifyError::InvalidCommittedSeals,
        }
    }
}

impl From<SnapshotError> for VerifyError {
    fn from(value: SnapshotError) -> Self {
        match value {
            SnapshotError::UnknownAncestor => VerifyError::UnknownAncestor,
            SnapshotError::Unauthorized(address) => VerifyError::Unauthorized(address),
            other => VerifyError::SnapshotError(other),
        }
    }
}

/// The ways a call into the backend can fail.
#[derive(Debug)]
pub enum BackendError {
    StartedEngine,
    StoppedEngine,
    /// This node is not a validator at the height it was asked to seal.
    Unauthorized(Address),
    UnknownAncestor,
    /// Empty blocks are no longer produced at this height.
    WaitTransactions,
    InvalidSignature,
    /// A signature recovered to an address other than the expected one.
    InvalidSigner,
    DecodeFailed(DecoderError),
    VerifyError(VerifyError),
    SnapshotError(SnapshotError),
    ExtraError(ExtraError),
}

impl From<CryptoError> for BackendError {
    fn from(_: CryptoError) -> Self {
        BackendError::InvalidSignature
    }
}

impl From<DecoderError> for BackendError {
    fn from(value: DecoderError) -> Self {
        BackendError::DecodeFailed(value)
    }
}

impl From<VerifyError> for BackendError {
    fn from(value: VerifyError) -> Self {
        BackendError::VerifyError(value)
    }
}

impl From<SnapshotError> for BackendError {
    fn from(value: SnapshotError) -> Self {
        match value {
            SnapshotError::UnknownAncestor => BackendError::UnknownAncestor,
            other => BackendError::SnapshotError(other),
        }
    }
}

impl From<ExtraError> for BackendError {
    fn from(value: ExtraError) -> Self {
        BackendError::ExtraError(value)
    }
}
