/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The authorization state of the validator set at a given block, and how it evolves.
//!
//! Validators join and leave by vote. A validator votes by sealing a block whose `coinbase` is the
//! account voted on and whose `nonce` is [`AUTH_VOTE`] or [`DROP_VOTE`]. A change takes
//! effect in the first block at which more than half of the current validators have a standing vote
//! for it. Every `epoch` blocks, all standing votes are discarded.
//!
//! A [`Snapshot`] is this state as of one block. Snapshots are derived by replaying headers onto an
//! older snapshot ([`Snapshot::apply`]); [`resolver::SnapshotStore`] finds the nearest known snapshot
//! and does the replay, caching results in memory and checkpointing them to a
//! [`KVStore`](pluggables::KVStore).
//!
//! [`AUTH_VOTE`]: crate::types::data_types::Nonce::AUTH_VOTE
//! [`DROP_VOTE`]: crate::types::data_types::Nonce::DROP_VOTE

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    block::Header,
    data_types::{Address, CryptoHash},
    extra::{self, ExtraError},
    validator_set::{ProposerPolicy, ValidatorSet},
};

use self::{
    pluggables::KVGetError,
    votes::{Tally, Vote},
};

pub mod pluggables;

pub mod resolver;

pub mod votes;

/// Number of blocks after which a snapshot is checkpointed to the key-value store.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Number of recent snapshots kept in memory.
pub const INMEMORY_SNAPSHOTS: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SnapshotJson", into = "SnapshotJson")]
pub struct Snapshot {
    /// Number of blocks after which to reset all votes.
    pub epoch: u64,
    /// Number of the block this snapshot is for.
    pub number: u64,
    /// Hash of the block this snapshot is for.
    pub hash: CryptoHash,
    /// Standing votes in chronological order.
    pub votes: Vec<Vote>,
    /// Current tally of the standing votes, by the account voted on.
    pub tally: BTreeMap<Address, Tally>,
    pub validator_set: ValidatorSet,
}

impl Snapshot {
    /// Create a snapshot with no votes. Used for the genesis block.
    pub fn new(epoch: u64, number: u64, hash: CryptoHash, validator_set: ValidatorSet) -> Snapshot {
        Snapshot {
            epoch,
            number,
            hash,
            votes: Vec::new(),
            tally: BTreeMap::new(),
            validator_set,
        }
    }

    /// The authorized validators, in ascending order.
    pub fn validators(&self) -> Vec<Address> {
        self.validator_set.list().to_vec()
    }

    /// Check whether a vote to set the authorization of `address` to `authorize` would change
    /// anything, i.e., whether it is a vote to add a non-validator or to drop a validator.
    pub fn check_vote(&self, address: &Address, authorize: bool) -> bool {
        self.validator_set.contains(address) != authorize
    }

    /// Add a vote to the tally. Returns false, leaving the tally unchanged, if the vote is meaningless.
    fn cast(&mut self, address: Address, authorize: bool) -> bool {
        if !self.check_vote(&address, authorize) {
            return false;
        }
        self.tally
            .entry(address)
            .and_modify(|tally| tally.votes += 1)
            .or_insert(Tally {
                authorize,
                votes: 1,
            });
        true
    }

    /// Remove a previously cast vote from the tally. Returns false if there is no matching tally.
    fn uncast(&mut self, address: &Address, authorize: bool) -> bool {
        let Some(tally) = self.tally.get_mut(address) else {
            return false;
        };
        if tally.authorize != authorize {
            return false;
        }
        if tally.votes > 1 {
            tally.votes -= 1;
        } else {
            self.tally.remove(address);
        }
        true
    }

    /// Replay `headers` onto this snapshot and return the resulting snapshot. `headers` must be
    /// contiguous, in ascending order, and start right after this snapshot's block.
    pub fn apply(&self, headers: &[Header]) -> Result<Snapshot, SnapshotError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        if headers.windows(2).any(|pair| pair[1].number != pair[0].number + 1) {
            return Err(SnapshotError::InvalidVotingChain);
        }
        if headers[0].number != self.number + 1 {
            return Err(SnapshotError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            // 1. Discard all votes at an epoch boundary.
            let number = header.number;
            if snap.epoch != 0 && number % snap.epoch == 0 {
                snap.votes.clear();
                snap.tally.clear();
            }

            // 2. Check that the header was sealed by a validator.
            let signer = extra::ecrecover(header)?;
            if !snap.validator_set.contains(&signer) {
                return Err(SnapshotError::Unauthorized(signer));
            }

            // 3. A validator has at most one standing vote per account. Replace any older one.
            if let Some(pos) = snap
                .votes
                .iter()
                .position(|vote| vote.validator == signer && vote.address == header.coinbase)
            {
                let old = snap.votes.remove(pos);
                snap.uncast(&old.address, old.authorize);
            }

            // 4. Tally the new vote.
            let authorize = if header.nonce.is_auth_vote() {
                true
            } else if header.nonce.is_drop_vote() {
                false
            } else {
                return Err(SnapshotError::InvalidVote);
            };
            if snap.cast(header.coinbase, authorize) {
                snap.votes.push(Vote {
                    validator: signer,
                    block: number,
                    address: header.coinbase,
                    authorize,
                });
            }

            // 5. If the vote passed, change the validator set.
            let passed = snap
                .tally
                .get(&header.coinbase)
                .filter(|tally| tally.votes > snap.validator_set.size() / 2)
                .copied();
            if let Some(tally) = passed {
                if tally.authorize {
                    snap.validator_set.add(header.coinbase);
                } else {
                    snap.validator_set.remove(&header.coinbase);

                    // 5.1. Votes cast by the dropped validator no longer count.
                    let (dropped, kept): (Vec<Vote>, Vec<Vote>) = snap
                        .votes
                        .drain(..)
                        .partition(|vote| vote.validator == header.coinbase);
                    snap.votes = kept;
                    for vote in dropped {
                        snap.uncast(&vote.address, vote.authorize);
                    }
                }

                // 5.2. Votes about the changed account are settled.
                snap.votes.retain(|vote| vote.address != header.coinbase);
                snap.tally.remove(&header.coinbase);
            }
        }

        snap.number += headers.len() as u64;
        snap.hash = headers[headers.len() - 1].hash();
        Ok(snap)
    }
}

/// The JSON form of a [`Snapshot`], used for checkpoints and the snapshot API.
#[derive(Clone, Serialize, Deserialize)]
struct SnapshotJson {
    epoch: u64,
    number: u64,
    hash: CryptoHash,
    votes: Vec<Vote>,
    tally: BTreeMap<Address, Tally>,
    validators: Vec<Address>,
    policy: ProposerPolicy,
}

impl From<Snapshot> for SnapshotJson {
    fn from(snapshot: Snapshot) -> Self {
        SnapshotJson {
            epoch: snapshot.epoch,
            number: snapshot.number,
            hash: snapshot.hash,
            votes: snapshot.votes,
            tally: snapshot.tally,
            validators: snapshot.validator_set.list().to_vec(),
            policy: snapshot.validator_set.policy(),
        }
    }
}

impl From<SnapshotJson> for Snapshot {
    fn from(json: SnapshotJson) -> Self {
        Snapshot {
            epoch: json.epoch,
            number: json.number,
            hash: json.hash,
            votes: json.votes,
            tally: json.tally,
            validator_set: ValidatorSet::new(&json.validators, json.policy),
        }
    }
}

#[derive(Debug)]
pub enum SnapshotError {
    /// The headers passed to [`Snapshot::apply`] are not contiguous or do not follow the snapshot.
    InvalidVotingChain,
    /// A header was sealed by an account that is not a validator.
    Unauthorized(Address),
    /// A header's nonce is neither an authorize nor a drop vote.
    InvalidVote,
    /// A header needed to reach a known snapshot is missing from the chain.
    UnknownAncestor,
    ExtraError(ExtraError),
    KVGetError(KVGetError),
    SerializeError(serde_json::Error),
}

impl From<ExtraError> for SnapshotError {
    fn from(value: ExtraError) -> Self {
        SnapshotError::ExtraError(value)
    }
}

impl From<KVGetError> for SnapshotError {
    fn from(value: KVGetError) -> Self {
        SnapshotError::KVGetError(value)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(value: serde_json::Error) -> Self {
        SnapshotError::SerializeError(value)
    }
}
