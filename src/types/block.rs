/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the block [`Header`], the [`Block`] type, and the [`Proposal`] trait through which
//! the consensus core sees blocks.

use std::fmt::Debug;

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use super::{
    crypto_primitives::keccak256,
    data_types::{Address, Bloom, CryptoHash, Nonce},
    extra::{filtered_header, SPORT_DIGEST},
};

/// A value the consensus core can agree on.
///
/// The core treats proposals as opaque except for the methods below. Proposals travel inside
/// PRE-PREPARE messages, so they must round-trip through RLP.
pub trait Proposal: Clone + Debug + Send + Encodable + Decodable + 'static {
    /// Height of the proposal. The core decides one proposal per height.
    fn number(&self) -> u64;

    fn hash(&self) -> CryptoHash;

    fn parent_hash(&self) -> CryptoHash;

    /// Seconds since the Unix Epoch.
    fn timestamp(&self) -> u64;

    /// The raw extra-data field, see [`crate::types::extra`].
    fn extra(&self) -> &[u8];
}

/// Block header.
///
/// Field order is the order of the header's RLP list, and therefore determines its hash.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Header {
    pub parent_hash: CryptoHash,
    pub uncle_hash: CryptoHash,
    /// Target of the vote carried by this header, or the zero address if there is none.
    pub coinbase: Address,
    pub root: CryptoHash,
    pub tx_hash: CryptoHash,
    pub receipt_hash: CryptoHash,
    pub bloom: Bloom,
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Seconds since the Unix Epoch.
    pub time: u64,
    pub extra: Vec<u8>,
    pub mix_digest: CryptoHash,
    pub nonce: Nonce,
}

impl Header {
    /// Keccak-256 of the RLP encoding of the header.
    ///
    /// Headers produced by this engine (recognized by their mix digest) are hashed with their committed
    /// seals stripped, so that writing the committed seals after consensus does not change the hash of
    /// the block the validators agreed on. The proposer's seal stays part of the hash.
    pub fn hash(&self) -> CryptoHash {
        if self.mix_digest == SPORT_DIGEST {
            if let Ok(filtered) = filtered_header(self, true) {
                return keccak256(&rlp::encode(&filtered));
            }
        }
        keccak256(&rlp::encode(self))
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(15);
        s.append(&self.parent_hash);
        s.append(&self.uncle_hash);
        s.append(&self.coinbase);
        s.append(&self.root);
        s.append(&self.tx_hash);
        s.append(&self.receipt_hash);
        s.append(&self.bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.time);
        s.append(&self.extra);
        s.append(&self.mix_digest);
        s.append(&self.nonce);
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 15 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Header {
            parent_hash: rlp.val_at(0)?,
            uncle_hash: rlp.val_at(1)?,
            coinbase: rlp.val_at(2)?,
            root: rlp.val_at(3)?,
            tx_hash: rlp.val_at(4)?,
            receipt_hash: rlp.val_at(5)?,
            bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            time: rlp.val_at(11)?,
            extra: rlp.val_at(12)?,
            mix_digest: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
        })
    }
}

/// An opaque, already serialized transaction. Executing transactions is the host's business.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Hash committing to an ordered list of transactions: Keccak-256 of the RLP list of their bytes.
pub fn transactions_hash(transactions: &[Transaction]) -> CryptoHash {
    let mut s = RlpStream::new_list(transactions.len());
    for tx in transactions {
        s.append(&tx.0);
    }
    keccak256(&s.out())
}

/// Hash of an empty uncle list. This engine never produces uncles.
pub fn empty_uncle_hash() -> CryptoHash {
    keccak256(&rlp::EMPTY_LIST_RLP)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Replace the header, keeping the body. Used after a seal or committed seals are written.
    pub fn with_header(&self, header: Header) -> Block {
        Block {
            header,
            transactions: self.transactions.clone(),
        }
    }
}

impl Proposal for Block {
    fn number(&self) -> u64 {
        self.header.number
    }

    fn hash(&self) -> CryptoHash {
        self.header.hash()
    }

    fn parent_hash(&self) -> CryptoHash {
        self.header.parent_hash
    }

    fn timestamp(&self) -> u64 {
        self.header.time
    }

    fn extra(&self) -> &[u8] {
        &self.header.extra
    }
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.header);
        s.begin_list(self.transactions.len());
        for tx in &self.transactions {
            s.append(&tx.0);
        }
    }
}

impl Decodable for Block {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let header = rlp.val_at(0)?;
        let transactions = rlp
            .at(1)?
            .iter()
            .map(|tx| Ok(Transaction(tx.as_val()?)))
            .collect::<Result<Vec<_>, DecoderError>>()?;
        Ok(Block {
            header,
            transactions,
        })
    }
}
