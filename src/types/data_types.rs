/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.
//!
//! The byte-oriented types in this module ([`Address`], [`CryptoHash`], [`Nonce`], [`Signature`]) all
//! encode to RLP as plain byte strings, and to JSON as `0x`-prefixed lowercase hex strings, so that
//! extra-data blobs, wire messages, and snapshot checkpoints stay byte-compatible with other
//! implementations of the engine.

use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Implements fixed-length RLP, JSON and formatting support for a byte-array newtype.
macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Number of bytes in this type.
            pub const LEN: usize = $len;

            /// Create a new value wrapping `bytes`.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the inner byte array.
            pub const fn bytes(&self) -> [u8; $len] {
                self.0
            }

            /// Borrow the inner byte array as a slice.
            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }

            /// Copy `bytes` into a new value. Returns `None` if `bytes` has the wrong length.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                if bytes.len() != $len {
                    return None;
                }
                let mut inner = [0u8; $len];
                inner.copy_from_slice(bytes);
                Some(Self(inner))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(self, f)
            }
        }

        impl Encodable for $name {
            fn rlp_append(&self, s: &mut RlpStream) {
                s.encoder().encode_value(&self.0);
            }
        }

        impl Decodable for $name {
            fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
                rlp.decoder().decode_value(|bytes| match bytes.len().cmp(&$len) {
                    Ordering::Less => Err(DecoderError::RlpIsTooShort),
                    Ordering::Greater => Err(DecoderError::RlpIsTooBig),
                    Ordering::Equal => {
                        let mut inner = [0u8; $len];
                        inner.copy_from_slice(bytes);
                        Ok(Self(inner))
                    }
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = <String as Deserialize>::deserialize(deserializer)?;
                let digits = text.strip_prefix("0x").unwrap_or(&text);
                let bytes = hex::decode(digits).map_err(de::Error::custom)?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    de::Error::invalid_length(bytes.len(), &concat!($len, " bytes"))
                })
            }
        }
    };
}

/// 20-byte identity of a participant, derived from its secp256k1 public key.
///
/// `Address`es order by their bytes, which is the order validator lists are kept in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Address([u8; 20]);

fixed_bytes!(Address, 20);

impl Address {
    /// The all-zero address. Used as "no vote" in a header's coinbase, and as "no proposer" before the
    /// first block.
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

/// 32-byte Keccak-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct CryptoHash([u8; 32]);

fixed_bytes!(CryptoHash, 32);

impl CryptoHash {
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// 8-byte header nonce. In this engine the nonce carries a vote instead of proof of work.
///
/// Only two values are meaningful: [`Nonce::AUTH_VOTE`] (all `0xFF`) proposes to authorize the
/// header's coinbase, and [`Nonce::DROP_VOTE`] (all zero, which is also the empty nonce) proposes to
/// deauthorize it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct Nonce([u8; 8]);

fixed_bytes!(Nonce, 8);

impl Nonce {
    pub const AUTH_VOTE: Nonce = Nonce([0xff; 8]);
    pub const DROP_VOTE: Nonce = Nonce([0x00; 8]);
    pub const EMPTY: Nonce = Nonce([0x00; 8]);

    pub fn is_auth_vote(&self) -> bool {
        *self == Self::AUTH_VOTE
    }

    pub fn is_drop_vote(&self) -> bool {
        *self == Self::DROP_VOTE
    }
}

/// 256-byte logs bloom filter. Carried in headers for compatibility; the engine never reads it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bloom([u8; 256]);

fixed_bytes!(Bloom, 256);

impl Default for Bloom {
    fn default() -> Self {
        Self([0u8; 256])
    }
}

/// 65-byte secp256k1 recoverable signature laid out as `r || s || v`, with `v` in `{0, 1}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 65]);

fixed_bytes!(Signature, 65);

/// Height of the block a consensus instance is deciding on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Sequence(u64);

impl Sequence {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Attempt number within one [`Sequence`]. Starts at 0 and increases on every round change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Round(u64);

impl Round {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The round after this one, or `None` if this is the last representable round.
    pub fn next(&self) -> Option<Round> {
        self.0.checked_add(1).map(Round)
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

macro_rules! rlp_u64 {
    ($name:ident) => {
        impl Encodable for $name {
            fn rlp_append(&self, s: &mut RlpStream) {
                self.0.rlp_append(s);
            }
        }

        impl Decodable for $name {
            fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
                Ok(Self(rlp.as_val()?))
            }
        }
    };
}

rlp_u64!(Sequence);
rlp_u64!(Round);

/// A `(sequence, round)` pair. Views are totally ordered, first by sequence, then by round.
///
/// On the wire a view is the RLP list `[round, sequence]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct View {
    pub round: Round,
    pub sequence: Sequence,
}

impl View {
    pub const fn new(sequence: Sequence, round: Round) -> Self {
        Self { round, sequence }
    }
}

impl Ord for View {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then(self.round.cmp(&other.round))
    }
}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{Round: {}, Sequence: {}}}", self.round, self.sequence)
    }
}

impl Encodable for View {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.round);
        s.append(&self.sequence);
    }
}

impl Decodable for View {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(View {
            round: rlp.val_at(0)?,
            sequence: rlp.val_at(1)?,
        })
    }
}
