/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Buffers for input that arrives before the engine is ready for it.
//!
//! [`Backlog`] holds consensus messages for future views, per sender, and [`PendingRequests`] holds
//! requests to propose blocks above the current sequence. Both are priority queues that release their
//! contents in view order once the engine catches up.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
};

use crate::types::{
    block::Proposal,
    data_types::{Address, View},
    validator_set::ValidatorSet,
};

use super::{
    implementation::CoreError,
    messages::{ConsensusMessage, MessageCode},
};

/// Position of a backlogged message in its sender's queue. Smaller keys are released first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Priority {
    sequence: u64,
    round: u64,
    code_order: u8,
    arrival: u64,
}

impl Priority {
    /// Within a view, PRE-PREPARE comes first, then COMMIT, then PREPARE. A ROUND-CHANGE ranks with
    /// the start of its sequence.
    fn new(code: MessageCode, view: &View, arrival: u64) -> Priority {
        let (round, code_order) = match code {
            MessageCode::RoundChange => (0, 0),
            MessageCode::Preprepare => (view.round.int(), 1),
            MessageCode::Commit => (view.round.int(), 2),
            MessageCode::Prepare => (view.round.int(), 3),
        };
        Priority {
            sequence: view.sequence.int(),
            round,
            code_order,
            arrival,
        }
    }
}

struct BacklogEntry {
    priority: Priority,
    view: View,
    msg: ConsensusMessage,
}

impl PartialEq for BacklogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for BacklogEntry {}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}

/// Consensus messages for future views, per sender.
#[derive(Default)]
pub struct Backlog {
    queues: HashMap<Address, BinaryHeap<Reverse<BacklogEntry>>>,
    arrivals: u64,
}

impl Backlog {
    pub fn new() -> Backlog {
        Backlog::default()
    }

    /// Buffer `msg`, which is about `view`, until the engine reaches `view`.
    pub fn store(&mut self, msg: ConsensusMessage, view: View) {
        self.arrivals += 1;
        let entry = BacklogEntry {
            priority: Priority::new(msg.code, &view, self.arrivals),
            view,
            msg,
        };
        self.queues
            .entry(entry.msg.address)
            .or_default()
            .push(Reverse(entry));
    }

    /// Release every buffered message the engine can now handle, in priority order per sender.
    ///
    /// Queues of senders that are not in `validator_set` are discarded. For each remaining sender,
    /// messages are popped until one is still for the future according to `check`. Messages `check`
    /// rejects for any other reason are dropped.
    pub fn drain(
        &mut self,
        validator_set: &ValidatorSet,
        check: impl Fn(MessageCode, &View) -> Result<(), CoreError>,
    ) -> Vec<ConsensusMessage> {
        self.queues
            .retain(|sender, _| validator_set.contains(sender));

        let mut ready = Vec::new();
        for queue in self.queues.values_mut() {
            while let Some(Reverse(entry)) = queue.pop() {
                match check(entry.msg.code, &entry.view) {
                    Ok(()) => ready.push(entry.msg),
                    Err(CoreError::FutureMessage) => {
                        queue.push(Reverse(entry));
                        break;
                    }
                    Err(err) => {
                        log::trace!(
                            "Skip the backlog message, from: {}, view: {}, error: {:?}",
                            entry.msg.address,
                            entry.view,
                            err
                        );
                    }
                }
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        ready
    }

    /// Number of messages buffered from `sender`.
    pub fn len_from(&self, sender: &Address) -> usize {
        self.queues.get(sender).map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

struct PendingRequest<P> {
    number: u64,
    arrival: u64,
    proposal: P,
}

impl<P> PartialEq for PendingRequest<P> {
    fn eq(&self, other: &Self) -> bool {
        (self.number, self.arrival) == (other.number, other.arrival)
    }
}

impl<P> Eq for PendingRequest<P> {}

impl<P> PartialOrd for PendingRequest<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for PendingRequest<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.number, self.arrival).cmp(&(other.number, other.arrival))
    }
}

/// Requests to propose blocks above the current sequence, lowest number first.
pub struct PendingRequests<P: Proposal> {
    queue: BinaryHeap<Reverse<PendingRequest<P>>>,
    arrivals: u64,
}

impl<P: Proposal> PendingRequests<P> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            arrivals: 0,
        }
    }

    pub fn store(&mut self, proposal: P) {
        self.arrivals += 1;
        self.queue.push(Reverse(PendingRequest {
            number: proposal.number(),
            arrival: self.arrivals,
            proposal,
        }));
    }

    /// Release the requests the engine can now handle. Stops at the first request that is still for
    /// the future according to `check`, and drops requests `check` rejects for any other reason.
    pub fn drain(&mut self, check: impl Fn(&P) -> Result<(), CoreError>) -> Vec<P> {
        let mut ready = Vec::new();
        while let Some(Reverse(request)) = self.queue.pop() {
            match check(&request.proposal) {
                Ok(()) => ready.push(request.proposal),
                Err(CoreError::FutureMessage) => {
                    self.queue.push(Reverse(request));
                    break;
                }
                Err(err) => {
                    log::trace!(
                        "Skip the pending request, number: {}, error: {:?}",
                        request.number,
                        err
                    );
                }
            }
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<P: Proposal> Default for PendingRequests<P> {
    fn default() -> Self {
        Self::new()
    }
}
