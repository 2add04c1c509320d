/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus-specific part of a header's extra-data field.
//!
//! A header produced by this engine carries, in its `extra` field, [`EXTRA_VANITY`] bytes of free-form
//! vanity data followed by the RLP encoding of a [`BFTExtra`]:
//!
//! ```text
//! extra = vanity (32 bytes) || RLP([validators], seal, [committed_seal, ..])
//! ```
//!
//! The `seal` is the proposer's signature over [`seal_hash`], and each committed seal is a validator's
//! signature over [`prepare_committed_seal`] of the block hash. Both are excluded from the seal hash,
//! and committed seals are also excluded from the block hash (see [`Header::hash`]).

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::consensus::messages::MessageCode;

use super::{
    block::Header,
    crypto_primitives::{keccak256, recover_address, CryptoError},
    data_types::{Address, CryptoHash, Signature},
};

/// Number of vanity bytes at the start of the extra-data field.
pub const EXTRA_VANITY: usize = 32;

/// Length of a seal or committed seal.
pub const EXTRA_SEAL: usize = Signature::LEN;

/// Mix digest marking a header as produced by this engine: the ASCII text
/// `"chain platform with a conscience"`.
pub const SPORT_DIGEST: CryptoHash = CryptoHash::new(*b"chain platform with a conscience");

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BFTExtra {
    pub validators: Vec<Address>,
    pub seal: Vec<u8>,
    pub committed_seal: Vec<Vec<u8>>,
}

impl Encodable for BFTExtra {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.begin_list(self.validators.len());
        for validator in &self.validators {
            s.append(validator);
        }
        s.append(&self.seal);
        s.begin_list(self.committed_seal.len());
        for seal in &self.committed_seal {
            s.append(seal);
        }
    }
}

impl Decodable for BFTExtra {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(BFTExtra {
            validators: rlp.list_at(0)?,
            seal: rlp.val_at(1)?,
            committed_seal: rlp
                .at(2)?
                .iter()
                .map(|seal| seal.as_val())
                .collect::<Result<Vec<Vec<u8>>, DecoderError>>()?,
        })
    }
}

/// Decode the [`BFTExtra`] embedded in `header`'s extra-data field.
pub fn extract(header: &Header) -> Result<BFTExtra, ExtraError> {
    if header.extra.len() < EXTRA_VANITY {
        return Err(ExtraError::InvalidExtraDataFormat);
    }
    rlp::decode(&header.extra[EXTRA_VANITY..]).map_err(|_| ExtraError::InvalidExtraDataFormat)
}

/// Build the extra-data field for a new header: the vanity of `extra` (zero-padded or truncated to
/// [`EXTRA_VANITY`] bytes) followed by a [`BFTExtra`] listing `validators` with no seals.
pub fn prepare_extra(extra: &[u8], validators: &[Address]) -> Vec<u8> {
    let mut buf = vec![0u8; EXTRA_VANITY];
    let vanity_len = extra.len().min(EXTRA_VANITY);
    buf[..vanity_len].copy_from_slice(&extra[..vanity_len]);

    let bft_extra = BFTExtra {
        validators: validators.to_vec(),
        seal: Vec::new(),
        committed_seal: Vec::new(),
    };
    buf.extend_from_slice(&rlp::encode(&bft_extra));
    buf
}

/// Return a copy of `header` with its committed seals cleared, and also its seal unless `keep_seal`.
pub fn filtered_header(header: &Header, keep_seal: bool) -> Result<Header, ExtraError> {
    let mut bft_extra = extract(header)?;
    if !keep_seal {
        bft_extra.seal = Vec::new();
    }
    bft_extra.committed_seal = Vec::new();

    let mut filtered = header.clone();
    set_bft_extra(&mut filtered, &bft_extra);
    Ok(filtered)
}

/// The hash the proposer signs: Keccak-256 of the RLP of the header with both kinds of seal cleared.
pub fn seal_hash(header: &Header) -> Result<CryptoHash, ExtraError> {
    let filtered = filtered_header(header, false)?;
    Ok(keccak256(&rlp::encode(&filtered)))
}

/// Write the proposer's `seal` into `header`'s extra-data.
pub fn write_seal(header: &mut Header, seal: &Signature) -> Result<(), ExtraError> {
    let mut bft_extra = extract(header)?;
    bft_extra.seal = seal.as_slice().to_vec();
    set_bft_extra(header, &bft_extra);
    Ok(())
}

/// Replace the committed seals in `header`'s extra-data with `committed_seals`.
pub fn write_committed_seals(
    header: &mut Header,
    committed_seals: &[Signature],
) -> Result<(), ExtraError> {
    if committed_seals.is_empty() {
        return Err(ExtraError::InvalidCommittedSeals);
    }
    let mut bft_extra = extract(header)?;
    bft_extra.committed_seal = committed_seals
        .iter()
        .map(|seal| seal.as_slice().to_vec())
        .collect();
    set_bft_extra(header, &bft_extra);
    Ok(())
}

/// Recover the address of the proposer that sealed `header`.
pub fn ecrecover(header: &Header) -> Result<Address, ExtraError> {
    let bft_extra = extract(header)?;
    let seal = Signature::from_slice(&bft_extra.seal).ok_or(ExtraError::InvalidSignature)?;
    let seal_hash = seal_hash(header)?;
    Ok(recover_address(seal_hash.as_slice(), &seal)?)
}

/// The bytes a validator signs to produce its committed seal for the block with hash `hash`:
/// `hash || COMMIT`.
pub fn prepare_committed_seal(hash: &CryptoHash) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CryptoHash::LEN + 1);
    buf.extend_from_slice(hash.as_slice());
    buf.push(MessageCode::Commit as u8);
    buf
}

fn set_bft_extra(header: &mut Header, bft_extra: &BFTExtra) {
    header.extra.truncate(EXTRA_VANITY);
    header.extra.extend_from_slice(&rlp::encode(bft_extra));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraError {
    /// The extra-data is shorter than the vanity, or its tail is not a valid `BFTExtra`.
    InvalidExtraDataFormat,
    /// The seal is missing, has the wrong length, or does not recover to a public key.
    InvalidSignature,
    InvalidCommittedSeals,
}

impl From<CryptoError> for ExtraError {
    fn from(_: CryptoError) -> Self {
        ExtraError::InvalidSignature
    }
}
