/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state of the round a validator is currently in.

use crate::types::{
    block::Proposal,
    data_types::{CryptoHash, Round, Sequence, View},
    validator_set::ValidatorSet,
};

use super::{
    messages::{Preprepare, Subject},
    types::MessageSet,
};

/// Everything a validator knows about its current view.
///
/// A round state is replaced whenever the view changes. On a round change within the same sequence,
/// the locked hash (together with the PRE-PREPARE that carried the locked proposal) and the pending
/// request survive into the new round state.
pub struct RoundState<P: Proposal> {
    round: Round,
    sequence: Sequence,
    preprepare: Option<Preprepare<P>>,
    prepares: MessageSet,
    commits: MessageSet,
    locked_hash: Option<CryptoHash>,
    pending_request: Option<P>,
}

impl<P: Proposal> RoundState<P> {
    pub fn new(
        view: View,
        validator_set: &ValidatorSet,
        locked_hash: Option<CryptoHash>,
        preprepare: Option<Preprepare<P>>,
        pending_request: Option<P>,
    ) -> Self {
        Self {
            round: view.round,
            sequence: view.sequence,
            preprepare,
            prepares: MessageSet::new(validator_set.clone()),
            commits: MessageSet::new(validator_set.clone()),
            locked_hash,
            pending_request,
        }
    }

    pub fn view(&self) -> View {
        View::new(self.sequence, self.round)
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// The subject PREPAREs and COMMITs in this round must match. `None` until a PRE-PREPARE is
    /// accepted.
    pub fn subject(&self) -> Option<Subject> {
        self.preprepare.as_ref().map(|preprepare| Subject {
            view: self.view(),
            digest: preprepare.proposal.hash(),
        })
    }

    pub fn preprepare(&self) -> Option<&Preprepare<P>> {
        self.preprepare.as_ref()
    }

    pub fn set_preprepare(&mut self, preprepare: Preprepare<P>) {
        self.preprepare = Some(preprepare)
    }

    /// The proposal of the accepted PRE-PREPARE.
    pub fn proposal(&self) -> Option<&P> {
        self.preprepare.as_ref().map(|preprepare| &preprepare.proposal)
    }

    pub fn prepares(&self) -> &MessageSet {
        &self.prepares
    }

    pub fn prepares_mut(&mut self) -> &mut MessageSet {
        &mut self.prepares
    }

    pub fn commits(&self) -> &MessageSet {
        &self.commits
    }

    pub fn commits_mut(&mut self) -> &mut MessageSet {
        &mut self.commits
    }

    /// Number of distinct validators that have sent either a PREPARE or a COMMIT for this round. A
    /// validator that sent both is counted once.
    pub fn prepare_or_commit_size(&self) -> usize {
        let overlap = self
            .commits
            .addresses()
            .filter(|address| self.prepares.contains(address))
            .count();
        self.prepares.size() + self.commits.size() - overlap
    }

    /// Lock on the proposal of the accepted PRE-PREPARE. Does nothing if there is none.
    pub fn lock_hash(&mut self) {
        if let Some(proposal) = self.proposal() {
            self.locked_hash = Some(proposal.hash());
        }
    }

    pub fn unlock_hash(&mut self) {
        self.locked_hash = None;
    }

    pub fn locked_hash(&self) -> Option<CryptoHash> {
        self.locked_hash
    }

    pub fn pending_request(&self) -> Option<&P> {
        self.pending_request.as_ref()
    }

    pub fn set_pending_request(&mut self, request: P) {
        self.pending_request = Some(request)
    }

    /// Break this round state up into its locked hash, PRE-PREPARE and pending request.
    pub(crate) fn into_parts(self) -> (Option<CryptoHash>, Option<Preprepare<P>>, Option<P>) {
        (self.locked_hash, self.preprepare, self.pending_request)
    }
}
