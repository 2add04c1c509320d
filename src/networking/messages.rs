/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The frame the engine exchanges with its peers.

use borsh::{BorshDeserialize, BorshSerialize};

/// Frame code of consensus messages. Frames with other codes belong to other protocols sharing the
/// transport, and are ignored by the engine.
pub const CONSENSUS_MSG: u64 = 0x11;

/// A frame on the peer-to-peer network.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Message {
    pub code: u64,
    /// For [`CONSENSUS_MSG`], the RLP encoding of a
    /// [`ConsensusMessage`](crate::consensus::messages::ConsensusMessage).
    pub payload: Vec<u8>,
}

impl Message {
    pub fn consensus(payload: Vec<u8>) -> Message {
        Message {
            code: CONSENSUS_MSG,
            payload,
        }
    }

    pub fn is_consensus(&self) -> bool {
        self.code == CONSENSUS_MSG
    }
}
