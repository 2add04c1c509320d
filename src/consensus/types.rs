/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types used to keep track of progress within a height: the engine [`State`], the per-phase
//! [`MessageSet`], and the [`RoundChangeSet`].

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use crate::types::{
    data_types::{Address, Round},
    validator_set::ValidatorSet,
};

use super::messages::ConsensusMessage;

/// Progress of the current round. Only ever increases within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    AcceptRequest,
    Preprepared,
    Prepared,
    Committed,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::AcceptRequest => "Accept request",
            State::Preprepared => "Preprepared",
            State::Prepared => "Prepared",
            State::Committed => "Committed",
        };
        f.write_str(name)
    }
}

/// Messages of one kind for one view, at most one per validator.
#[derive(Clone, Debug)]
pub struct MessageSet {
    validator_set: ValidatorSet,
    messages: BTreeMap<Address, ConsensusMessage>,
}

impl MessageSet {
    pub fn new(validator_set: ValidatorSet) -> MessageSet {
        MessageSet {
            validator_set,
            messages: BTreeMap::new(),
        }
    }

    /// Record `msg`, replacing any earlier message from the same sender.
    pub fn add(&mut self, msg: ConsensusMessage) -> Result<(), MessageSetError> {
        if !self.validator_set.contains(&msg.address) {
            return Err(MessageSetError::Unauthorized(msg.address));
        }
        self.messages.insert(msg.address, msg);
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&ConsensusMessage> {
        self.messages.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.messages.contains_key(address)
    }

    /// Messages ordered by sender address.
    pub fn values(&self) -> impl Iterator<Item = &ConsensusMessage> {
        self.messages.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.messages.keys()
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSetError {
    Unauthorized(Address),
}

/// ROUND-CHANGE messages received for the current sequence, by the round they ask to move to.
pub struct RoundChangeSet {
    validator_set: ValidatorSet,
    round_changes: BTreeMap<Round, MessageSet>,
}

impl RoundChangeSet {
    pub fn new(validator_set: ValidatorSet) -> RoundChangeSet {
        RoundChangeSet {
            validator_set,
            round_changes: BTreeMap::new(),
        }
    }

    /// Record `msg` as a request to move to `round`. Returns the number of distinct validators that
    /// have asked to move to `round`.
    pub fn add(&mut self, round: Round, msg: ConsensusMessage) -> Result<usize, MessageSetError> {
        let set = self
            .round_changes
            .entry(round)
            .or_insert_with(|| MessageSet::new(self.validator_set.clone()));
        set.add(msg)?;
        Ok(set.size())
    }

    /// Forget every round below `round`, and every round with no messages.
    pub fn clear(&mut self, round: Round) {
        self.round_changes
            .retain(|r, set| set.size() > 0 && *r >= round);
    }

    /// The highest round that at least `num` validators have asked to move to.
    pub fn max_round(&self, num: usize) -> Option<Round> {
        self.round_changes
            .iter()
            .rev()
            .find(|(_, set)| set.size() >= num)
            .map(|(round, _)| *round)
    }

    /// Number of validators that have asked to move to `round`.
    pub fn count(&self, round: Round) -> usize {
        self.round_changes
            .get(&round)
            .map(|set| set.size())
            .unwrap_or(0)
    }
}
