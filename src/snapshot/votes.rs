/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Membership votes, and the running tallies they add up to.

use serde::{Deserialize, Serialize};

use crate::types::data_types::Address;

/// A single vote an authorized validator cast, through a block it sealed, to change the
/// authorization of `address`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// The validator that sealed the block carrying the vote.
    pub validator: Address,
    /// Number of the block the vote was cast in. Votes expire at the next epoch boundary.
    pub block: u64,
    /// Account being voted on.
    pub address: Address,
    /// Whether the vote is to authorize (`true`) or to drop (`false`) `address`.
    pub authorize: bool,
}

/// Votes currently standing for one change. All votes in a tally agree on `authorize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub authorize: bool,
    pub votes: usize,
}
