/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged by validators during consensus.
//!
//! Every message travels inside a signed [`ConsensusMessage`] envelope. The envelope's `msg` field
//! carries the RLP encoding of the inner message, which is a [`Preprepare`] for
//! [`MessageCode::Preprepare`], and a [`Subject`] for every other code.
//!
//! ## Signing
//!
//! The sender signs the envelope with its `signature` field left empty (see
//! [`payload_no_sig`](ConsensusMessage::payload_no_sig)). A COMMIT additionally carries a committed
//! seal, the sender's signature over `hash || MessageCode::Commit`, which ends up in the committed
//! block's extra-data.

use std::fmt::{self, Display, Formatter};

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::types::{
    block::Proposal,
    data_types::{Address, CryptoHash, Signature, View},
};

/// Type of a [`ConsensusMessage`]. The numeric value is the one used on the wire, and the byte
/// appended to a block hash when computing a committed seal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u64)]
pub enum MessageCode {
    Preprepare = 0,
    Prepare = 1,
    Commit = 2,
    RoundChange = 3,
}

impl TryFrom<u64> for MessageCode {
    type Error = DecoderError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageCode::Preprepare),
            1 => Ok(MessageCode::Prepare),
            2 => Ok(MessageCode::Commit),
            3 => Ok(MessageCode::RoundChange),
            _ => Err(DecoderError::Custom("unknown message code")),
        }
    }
}

impl Display for MessageCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageCode::Preprepare => "PRE-PREPARE",
            MessageCode::Prepare => "PREPARE",
            MessageCode::Commit => "COMMIT",
            MessageCode::RoundChange => "ROUND-CHANGE",
        };
        f.write_str(name)
    }
}

/// Signed envelope of every consensus message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub code: MessageCode,
    /// RLP encoding of the inner [`Preprepare`] or [`Subject`].
    pub msg: Vec<u8>,
    pub address: Address,
    /// Empty until the message is signed.
    pub signature: Vec<u8>,
    /// Non-empty only for COMMIT.
    pub committed_seal: Vec<u8>,
}

impl ConsensusMessage {
    /// Create an unsigned message from `address` with inner message `inner`.
    pub fn new<T: Encodable>(code: MessageCode, inner: &T, address: Address) -> Self {
        Self {
            code,
            msg: rlp::encode(inner).to_vec(),
            address,
            signature: Vec::new(),
            committed_seal: Vec::new(),
        }
    }

    /// Decode an envelope from its wire form.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecoderError> {
        rlp::decode(payload)
    }

    /// The wire form of this envelope.
    pub fn payload(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// The wire form of this envelope with the signature left out. This is what the sender signs.
    pub fn payload_no_sig(&self) -> Vec<u8> {
        let unsigned = ConsensusMessage {
            signature: Vec::new(),
            ..self.clone()
        };
        rlp::encode(&unsigned).to_vec()
    }

    pub fn signature(&self) -> Option<Signature> {
        Signature::from_slice(&self.signature)
    }

    pub fn committed_seal(&self) -> Option<Signature> {
        Signature::from_slice(&self.committed_seal)
    }

    /// Decode the inner message as a [`Preprepare`].
    pub fn preprepare<P: Proposal>(&self) -> Result<Preprepare<P>, DecoderError> {
        rlp::decode(&self.msg)
    }

    /// Decode the inner message as a [`Subject`].
    pub fn subject(&self) -> Result<Subject, DecoderError> {
        rlp::decode(&self.msg)
    }

    /// The view the inner message is about. Both inner message types start with their view, so this
    /// works without knowing the proposal type.
    pub fn view(&self) -> Result<View, DecoderError> {
        Rlp::new(&self.msg).val_at(0)
    }
}

impl Encodable for ConsensusMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&(self.code as u64));
        s.append(&self.msg);
        s.append(&self.address);
        s.append(&self.signature);
        s.append(&self.committed_seal);
    }
}

impl Decodable for ConsensusMessage {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let code: u64 = rlp.val_at(0)?;
        Ok(ConsensusMessage {
            code: MessageCode::try_from(code)?,
            msg: rlp.val_at(1)?,
            address: rlp.val_at(2)?,
            signature: rlp.val_at(3)?,
            committed_seal: rlp.val_at(4)?,
        })
    }
}

/// Inner message of a PRE-PREPARE: the proposer's proposal for `view`.
#[derive(Clone, Debug)]
pub struct Preprepare<P: Proposal> {
    pub view: View,
    pub proposal: P,
}

impl<P: Proposal> Encodable for Preprepare<P> {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.view);
        s.append(&self.proposal);
    }
}

impl<P: Proposal> Decodable for Preprepare<P> {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Preprepare {
            view: rlp.val_at(0)?,
            proposal: rlp.val_at(1)?,
        })
    }
}

/// Inner message of PREPARE, COMMIT and ROUND-CHANGE: a view and the hash of the proposal it is about.
/// In a ROUND-CHANGE the digest is zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subject {
    pub view: View,
    pub digest: CryptoHash,
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{View: {}, Digest: {}}}", self.view, self.digest)
    }
}

impl Encodable for Subject {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.view);
        s.append(&self.digest);
    }
}

impl Decodable for Subject {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Subject {
            view: rlp.val_at(0)?,
            digest: rlp.val_at(1)?,
        })
    }
}
