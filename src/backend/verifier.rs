/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Verification of headers and proposed blocks.
//!
//! A header is checked in two stages. The standalone checks look only at the header: its timestamp is
//! not in the future, its extra-data parses, and its nonce, mix digest, uncle hash and difficulty have
//! the only values this engine produces. The cascading checks need the parent and the validator set
//! that decided the header: the parent exists and is at least `block_period` seconds older, the
//! validator list in the extra-data matches the parent snapshot, the seal was made by a validator, and
//! the committed seals come from a quorum of distinct validators.

use std::time::{Duration, SystemTime};

use crate::{
    chain::ChainReader,
    networking::network::Network,
    snapshot::pluggables::KVStore,
    types::{
        block::{empty_uncle_hash, transactions_hash, Block, Header},
        crypto_primitives::recover_address,
        data_types::{Address, Signature},
        extra::{self, SPORT_DIGEST},
        validator_set::ValidatorSet,
    },
};

use super::{sport_backend::SportBackend, VerifyError};

impl<N: Network, K: KVStore, C: ChainReader> SportBackend<N, K, C> {
    /// Recover the address of the validator that sealed `header`.
    pub fn author(&self, header: &Header) -> Result<Address, VerifyError> {
        Ok(extra::ecrecover(header)?)
    }

    /// Check that `header` is a valid header produced by this engine, against its parent in the chain.
    pub fn verify_header(&self, header: &Header) -> Result<(), VerifyError> {
        self.verify_header_with_parents(header, &[])
    }

    /// Verify a contiguous batch of headers in ascending order. Each header's parent may be the
    /// previous header in the batch rather than a header in the chain. Returns one result per header.
    pub fn verify_headers(&self, headers: &[Header]) -> Vec<Result<(), VerifyError>> {
        headers
            .iter()
            .enumerate()
            .map(|(i, header)| self.verify_header_with_parents(header, &headers[..i]))
            .collect()
    }

    /// Check that `header` was sealed by a member of its parent's validator set.
    pub fn verify_seal(&self, header: &Header) -> Result<(), VerifyError> {
        if header.number == 0 {
            return Err(VerifyError::UnknownBlock);
        }
        if header.difficulty != 1 {
            return Err(VerifyError::InvalidDifficulty);
        }
        let snapshot = self.inner.snapshots.snapshot(
            &self.inner.chain,
            header.number - 1,
            header.parent_hash,
            &[],
        )?;
        self.verify_signer(header, &snapshot.validator_set)
    }

    /// Check a proposed block before voting for it: it is not a known bad block, its transaction root
    /// matches its body, and its header is valid. A header without committed seals is accepted, since
    /// the block has not been decided yet.
    pub(crate) fn verify_proposal(&self, block: &Block) -> Result<(), VerifyError> {
        let header = block.header();
        if self.inner.chain.has_bad_block(&header.hash()) {
            return Err(VerifyError::InvalidProposal);
        }
        if transactions_hash(block.transactions()) != header.tx_hash {
            return Err(VerifyError::MismatchTxHashes);
        }
        match self.verify_header(header) {
            Ok(()) | Err(VerifyError::EmptyCommittedSeals) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn verify_header_with_parents(
        &self,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), VerifyError> {
        let now = secs_since_unix_epoch();
        if header.time > now {
            return Err(VerifyError::FutureBlock {
                delay: Duration::from_secs(header.time - now),
            });
        }

        extra::extract(header)?;
        if !header.nonce.is_auth_vote() && !header.nonce.is_drop_vote() {
            return Err(VerifyError::InvalidNonce);
        }
        if header.mix_digest != SPORT_DIGEST {
            return Err(VerifyError::InvalidMixDigest);
        }
        if header.uncle_hash != empty_uncle_hash() {
            return Err(VerifyError::InvalidUncleHash);
        }
        if header.difficulty != 1 {
            return Err(VerifyError::InvalidDifficulty);
        }

        self.verify_cascading_fields(header, parents)
    }

    fn verify_cascading_fields(
        &self,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), VerifyError> {
        // Genesis is trusted as configured.
        if header.number == 0 {
            return Ok(());
        }

        let parent_number = header.number - 1;
        let parent = match parents.last() {
            Some(parent) => Some(parent.clone()),
            None => self
                .inner
                .chain
                .get_header(&header.parent_hash, parent_number),
        };
        let parent = parent
            .filter(|parent| parent.number == parent_number && parent.hash() == header.parent_hash)
            .ok_or(VerifyError::UnknownAncestor)?;
        if parent.time.saturating_add(self.inner.config.block_period) > header.time {
            return Err(VerifyError::InvalidTimestamp);
        }

        let snapshot = self.inner.snapshots.snapshot(
            &self.inner.chain,
            parent_number,
            header.parent_hash,
            parents,
        )?;
        let bft_extra = extra::extract(header)?;
        if bft_extra.validators != snapshot.validators() {
            return Err(VerifyError::InconsistentValidatorSet);
        }

        self.verify_signer(header, &snapshot.validator_set)?;
        verify_committed_seals(header, &snapshot.validator_set)
    }

    fn verify_signer(&self, header: &Header, validators: &ValidatorSet) -> Result<(), VerifyError> {
        if header.number == 0 {
            return Err(VerifyError::UnknownBlock);
        }
        let signer = extra::ecrecover(header)?;
        if !validators.contains(&signer) {
            return Err(VerifyError::Unauthorized(signer));
        }
        Ok(())
    }
}

/// Check that the committed seals of `header` are signatures over its hash by at least
/// [`min_approvers`](ValidatorSet::min_approvers) distinct members of `validators`.
pub(crate) fn verify_committed_seals(
    header: &Header,
    validators: &ValidatorSet,
) -> Result<(), VerifyError> {
    let bft_extra = extra::extract(header)?;
    if bft_extra.committed_seal.is_empty() {
        return Err(VerifyError::EmptyCommittedSeals);
    }

    let proposal_seal = extra::prepare_committed_seal(&header.hash());
    let mut remaining = validators.clone();
    let mut valid_seals = 0;
    for seal in &bft_extra.committed_seal {
        let seal = Signature::from_slice(seal).ok_or(VerifyError::InvalidSignature)?;
        let signer =
            recover_address(&proposal_seal, &seal).map_err(|_| VerifyError::InvalidSignature)?;
        // Each validator may seal once.
        if !remaining.remove(&signer) {
            return Err(VerifyError::InvalidCommittedSeals);
        }
        valid_seals += 1;
    }

    if valid_seals < validators.min_approvers() {
        return Err(VerifyError::InvalidCommittedSeals);
    }
    Ok(())
}

pub(super) fn secs_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
