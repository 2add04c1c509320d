/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events the engine emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are sent to the
//! event bus thread (see [`crate::event_bus`]) which passes them to the registered handlers, so
//! handlers never run on the engine thread.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::types::data_types::{Address, CryptoHash, View};

pub enum Event {
    // Events that change the round state.
    StartRound(StartRoundEvent),
    LockHash(LockHashEvent),
    UnlockHash(UnlockHashEvent),
    RoundTimeout(RoundTimeoutEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Prepare(PrepareEvent),
    Commit(CommitEvent),
    RoundChange(RoundChangeEvent),
    // Events that involve receiving a consensus message.
    ReceivePreprepare(ReceivePreprepareEvent),
    ReceiveRoundChange(ReceiveRoundChangeEvent),
    // Events that change persistent state.
    CommitBlock(CommitBlockEvent),
    UpdateValidatorSet(UpdateValidatorSetEvent),
    StoreSnapshot(StoreSnapshotEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away when the replica is shutting down.
            let _ = event_publisher.send(self);
        }
    }
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub proposer: Address,
}

pub struct LockHashEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub hash: CryptoHash,
}

pub struct UnlockHashEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub hash: CryptoHash,
}

pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub timeout: Duration,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub proposal: CryptoHash,
}

pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub digest: CryptoHash,
}

pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub digest: CryptoHash,
}

/// A ROUND-CHANGE message was broadcast. `view` is the view being moved to.
pub struct RoundChangeEvent {
    pub timestamp: SystemTime,
    pub view: View,
}

pub struct ReceivePreprepareEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub view: View,
    pub proposal: CryptoHash,
}

pub struct ReceiveRoundChangeEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub view: View,
    /// Number of distinct validators known to want `view.round`, this message included.
    pub count: usize,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub number: u64,
    pub block: CryptoHash,
    pub committed_seals: usize,
}

pub struct UpdateValidatorSetEvent {
    pub timestamp: SystemTime,
    pub number: u64,
    pub block: CryptoHash,
    pub validators: Vec<Address>,
}

pub struct StoreSnapshotEvent {
    pub timestamp: SystemTime,
    pub number: u64,
    pub block: CryptoHash,
}
