/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the three-phase consensus protocol.
//!
//! Main type: [`Core`].
//!
//! ## Protocol
//!
//! Validators decide one block per sequence (height). Each attempt at a sequence is a round, and each
//! round has a proposer picked by the [`ValidatorSet`]'s policy. Within a round:
//! 1. The proposer broadcasts a PRE-PREPARE carrying its proposal.
//! 2. A validator that accepts the proposal broadcasts a PREPARE for its hash.
//! 3. A validator that has seen PREPAREs or COMMITs from a quorum ("min approvers") of validators locks
//!    on the hash and broadcasts a COMMIT, which carries its committed seal.
//! 4. A validator that has seen COMMITs from a quorum hands the proposal and the collected committed
//!    seals to the [`Backend`].
//!
//! If a round does not finish before its timer fires, validators broadcast ROUND-CHANGE messages for
//! the next round. `f + 1` of them for a higher round pull a validator along to that round, and a
//! quorum of them starts the round. A validator that is locked on a hash only accepts (and, as
//! proposer, only proposes) that hash in later rounds of the same sequence.

use std::{
    sync::mpsc::Sender,
    time::{Duration, Instant, SystemTime},
};

use crate::{
    backend::{Backend, BackendError, VerifyError},
    events::{
        CommitBlockEvent, CommitEvent, Event, LockHashEvent, PrepareEvent, ProposeEvent,
        ReceivePreprepareEvent, ReceiveRoundChangeEvent, RoundChangeEvent, RoundTimeoutEvent,
        StartRoundEvent, UnlockHashEvent,
    },
    types::{
        block::Proposal,
        crypto_primitives::recover_address,
        data_types::{Address, CryptoHash, Round, Sequence, Signature, View},
        extra::prepare_committed_seal,
        validator_set::{SignerError, ValidatorSet},
    },
};

use super::{
    backlog::{Backlog, PendingRequests},
    engine::EngineEvent,
    messages::{ConsensusMessage, MessageCode, Preprepare, Subject},
    round_state::RoundState,
    timers::{round_timeout, Expired, Timers},
    types::{MessageSetError, RoundChangeSet, State},
};

/// A single validator's participation in consensus.
///
/// `Core` is driven from one thread (see [`engine`](super::engine)) by calling
/// [`handle_event`](Self::handle_event) with every [`EngineEvent`] in arrival order, and
/// [`handle_expired_timers`](Self::handle_expired_timers) whenever
/// [`next_deadline`](Self::next_deadline) passes. Work that `Core` defers to later (backlogged
/// messages that became current, pending requests) is posted back onto its own event queue.
pub struct Core<B: Backend> {
    config: CoreConfiguration,
    address: Address,
    backend: B,
    state: State,
    current: RoundState<B::Proposal>,
    validator_set: ValidatorSet,
    waiting_for_round_change: bool,
    round_change_set: RoundChangeSet,
    backlog: Backlog,
    pending_requests: PendingRequests<B::Proposal>,
    /// Whether this node has already sent a PRE-PREPARE in the current round.
    sent_preprepare: bool,
    timers: Timers,
    event_queue: Sender<EngineEvent<B::Proposal>>,
    event_publisher: Option<Sender<Event>>,
}

impl<B: Backend> Core<B> {
    /// Create a core that has not started a round yet. Call [`start`](Self::start) before feeding it
    /// events.
    pub fn new(
        config: CoreConfiguration,
        backend: B,
        event_queue: Sender<EngineEvent<B::Proposal>>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let address = backend.address();
        let (last_proposal, _) = backend.last_proposal();
        let validator_set = backend.validators(&last_proposal);
        Self {
            config,
            address,
            backend,
            state: State::AcceptRequest,
            current: RoundState::new(View::default(), &validator_set, None, None, None),
            round_change_set: RoundChangeSet::new(validator_set.clone()),
            validator_set,
            waiting_for_round_change: false,
            backlog: Backlog::new(),
            pending_requests: PendingRequests::new(),
            sent_preprepare: false,
            timers: Timers::new(),
            event_queue,
            event_publisher,
        }
    }

    /// Enter the first round after the head of the local chain.
    pub fn start(&mut self) {
        self.start_new_round(Round::new(0));
    }

    pub fn stop(&mut self) {
        self.timers.stop();
    }

    pub fn handle_event(&mut self, event: EngineEvent<B::Proposal>) -> Result<(), CoreError> {
        match event {
            EngineEvent::Request(proposal) => match self.handle_request(proposal.clone()) {
                Err(CoreError::FutureMessage) => {
                    self.pending_requests.store(proposal);
                    Err(CoreError::FutureMessage)
                }
                result => result,
            },
            EngineEvent::Message(payload) => {
                self.handle_msg(&payload)?;
                self.backend.gossip(&self.validator_set, payload);
                Ok(())
            }
            EngineEvent::Backlog(msg) => {
                // Backlogged messages had their signature checked on arrival.
                self.handle_checked_msg(msg.clone())?;
                self.backend.gossip(&self.validator_set, msg.payload());
                Ok(())
            }
            EngineEvent::Timeout => {
                self.handle_timeout();
                Ok(())
            }
            EngineEvent::FinalCommitted => {
                self.handle_final_committed();
                Ok(())
            }
            EngineEvent::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    /// The earliest instant at which a timer fires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Act on every timer that has fired as of `now`.
    pub fn handle_expired_timers(&mut self, now: Instant) {
        for expired in self.timers.take_expired(now) {
            match expired {
                Expired::RoundChange => self.handle_timeout(),
                Expired::FuturePreprepare(msg) => self.post(EngineEvent::Backlog(msg)),
            }
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn current_view(&self) -> View {
        self.current.view()
    }

    pub fn round_state(&self) -> &RoundState<B::Proposal> {
        &self.current
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn is_proposer(&self) -> bool {
        self.validator_set.is_proposer(&self.address)
    }

    pub fn waiting_for_round_change(&self) -> bool {
        self.waiting_for_round_change
    }

    /// Number of validators known to want to move to `round` of the current sequence.
    pub fn round_change_count(&self, round: Round) -> usize {
        self.round_change_set.count(round)
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the current round is locked on a hash. A lock on a hash the node has since learned is
    /// bad does not count.
    pub fn is_hash_locked(&self) -> bool {
        self.current
            .locked_hash()
            .is_some_and(|hash| !self.backend.has_bad_proposal(&hash))
    }

    /* ↓↓↓ Requests ↓↓↓ */

    fn handle_request(&mut self, proposal: B::Proposal) -> Result<(), CoreError> {
        self.check_request(&proposal)?;

        log::trace!("Handle request, number: {}, hash: {}", proposal.number(), proposal.hash());
        self.current.set_pending_request(proposal.clone());
        if self.state == State::AcceptRequest {
            self.send_preprepare(&proposal);
        }
        Ok(())
    }

    fn check_request(&self, proposal: &B::Proposal) -> Result<(), CoreError> {
        let sequence = self.current.sequence().int();
        if proposal.number() < sequence {
            Err(CoreError::OldMessage)
        } else if proposal.number() > sequence {
            Err(CoreError::FutureMessage)
        } else {
            Ok(())
        }
    }

    fn process_pending_requests(&mut self) {
        let sequence = self.current.sequence().int();
        let ready = self.pending_requests.drain(|proposal| {
            if proposal.number() < sequence {
                Err(CoreError::OldMessage)
            } else if proposal.number() > sequence {
                Err(CoreError::FutureMessage)
            } else {
                Ok(())
            }
        });
        for proposal in ready {
            log::trace!("Post pending request, number: {}", proposal.number());
            self.post(EngineEvent::Request(proposal));
        }
    }

    /* ↓↓↓ Messages ↓↓↓ */

    /// Decode and authenticate an inbound message, then handle it.
    fn handle_msg(&mut self, payload: &[u8]) -> Result<(), CoreError> {
        // 1. Decode the envelope.
        let msg =
            ConsensusMessage::from_payload(payload).map_err(|_| CoreError::FailedDecodeMessage)?;

        // 2. Check that it was signed by a current validator, and by the sender it claims.
        let signature = msg.signature().ok_or(CoreError::InvalidSignature)?;
        let signer = self
            .validator_set
            .check_validator_signature(&msg.payload_no_sig(), &signature)?;
        if signer != msg.address {
            return Err(CoreError::InvalidSigner);
        }

        self.handle_checked_msg(msg)
    }

    fn handle_checked_msg(&mut self, msg: ConsensusMessage) -> Result<(), CoreError> {
        if !self.validator_set.contains(&msg.address) {
            return Err(CoreError::Unauthorized(msg.address));
        }

        let result = match msg.code {
            MessageCode::Preprepare => self.handle_preprepare(&msg),
            MessageCode::Prepare => self.handle_prepare(&msg),
            MessageCode::Commit => self.handle_commit(&msg),
            MessageCode::RoundChange => self.handle_round_change(&msg),
        };
        if let Err(CoreError::FutureMessage) = result {
            self.store_backlog(msg);
        }
        result
    }

    /// Classify a message about `view` relative to the current view and state.
    fn check_message(&self, code: MessageCode, view: &View) -> Result<(), CoreError> {
        let current = self.current.view();

        // A ROUND-CHANGE for a later round of the current sequence is handled right away.
        if code == MessageCode::RoundChange {
            if view.sequence > current.sequence {
                return Err(CoreError::FutureMessage);
            } else if *view < current {
                return Err(CoreError::OldMessage);
            }
            return Ok(());
        }

        if *view > current {
            return Err(CoreError::FutureMessage);
        }
        if *view < current {
            return Err(CoreError::OldMessage);
        }
        if self.waiting_for_round_change {
            return Err(CoreError::FutureMessage);
        }
        if self.state == State::AcceptRequest && code > MessageCode::Preprepare {
            return Err(CoreError::FutureMessage);
        }
        Ok(())
    }

    fn store_backlog(&mut self, msg: ConsensusMessage) {
        if msg.address == self.address {
            log::warn!("Backlog from self, code: {}", msg.code);
            return;
        }
        match msg.view() {
            Ok(view) => {
                log::trace!(
                    "Store future message, from: {}, code: {}, view: {}",
                    msg.address,
                    msg.code,
                    view
                );
                self.backlog.store(msg, view);
            }
            Err(err) => log::debug!("Failed to read the view of a future message: {:?}", err),
        }
    }

    fn process_backlog(&mut self) {
        let mut backlog = std::mem::take(&mut self.backlog);
        let ready = backlog.drain(&self.validator_set, |code, view| {
            self.check_message(code, view)
        });
        self.backlog = backlog;
        for msg in ready {
            log::trace!("Post backlog message, from: {}, code: {}", msg.address, msg.code);
            self.post(EngineEvent::Backlog(msg));
        }
    }

    /* ↓↓↓ PRE-PREPARE ↓↓↓ */

    fn send_preprepare(&mut self, proposal: &B::Proposal) {
        if self.current.sequence().int() != proposal.number() || !self.is_proposer() {
            return;
        }
        if self.sent_preprepare {
            log::trace!("Already proposed in this round, view: {}", self.current.view());
            return;
        }

        let view = self.current.view();
        let preprepare = Preprepare {
            view,
            proposal: proposal.clone(),
        };
        let msg = ConsensusMessage::new(MessageCode::Preprepare, &preprepare, self.address);
        if self.broadcast(msg).is_ok() {
            self.sent_preprepare = true;
            log::debug!("Propose, view: {}, hash: {}", view, proposal.hash());
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                view,
                proposal: proposal.hash(),
            })
            .publish(&self.event_publisher);
        }
    }

    fn handle_preprepare(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        // 1. Decode the PRE-PREPARE.
        let preprepare: Preprepare<B::Proposal> =
            msg.preprepare().map_err(|_| CoreError::FailedDecodePreprepare)?;
        let proposal_hash = preprepare.proposal.hash();
        let proposal_number = preprepare.proposal.number();

        // 2. Check the view. A PRE-PREPARE for a block that is already in the chain, from the proposer
        //    of that block's view, means the proposer is behind: help it along with a COMMIT.
        if let Err(err) = self.check_message(MessageCode::Preprepare, &preprepare.view) {
            if let CoreError::OldMessage = err {
                let mut validator_set = self.backend.parent_validators(&preprepare.proposal);
                let previous_proposer = self
                    .backend
                    .get_proposer(proposal_number.saturating_sub(1));
                validator_set.calc_proposer(&previous_proposer, preprepare.view.round);
                if validator_set.is_proposer(&msg.address)
                    && self.backend.has_proposal(&proposal_hash, proposal_number)
                {
                    self.send_commit_for_old_block(preprepare.view, proposal_hash);
                    return Ok(());
                }
            }
            return Err(err);
        }

        // 3. Check that it came from the proposer of the current round.
        if !self.validator_set.is_proposer(&msg.address) {
            log::warn!("Ignore preprepare messages from non-proposer, from: {}", msg.address);
            return Err(CoreError::NotFromProposer);
        }

        // 4. Verify the proposal.
        if let Err(err) = self.backend.verify(&preprepare.proposal) {
            log::warn!("Failed to verify proposal, hash: {}, error: {:?}", proposal_hash, err);
            return match err {
                VerifyError::FutureBlock { delay } => {
                    self.timers.set_future_preprepare(delay, msg.clone());
                    Err(CoreError::FutureBlock(delay))
                }
                err => {
                    self.send_next_round_change();
                    Err(CoreError::InvalidProposal(err))
                }
            };
        }

        Event::ReceivePreprepare(ReceivePreprepareEvent {
            timestamp: SystemTime::now(),
            origin: msg.address,
            view: preprepare.view,
            proposal: proposal_hash,
        })
        .publish(&self.event_publisher);

        // 5. Accept the proposal, unless locked on a different one.
        if self.state == State::AcceptRequest {
            if self.is_hash_locked() {
                if self.current.locked_hash() == Some(proposal_hash) {
                    // Locked on this proposal already: skip straight to COMMIT.
                    self.accept_preprepare(preprepare);
                    self.set_state(State::Prepared);
                    self.send_commit();
                } else {
                    self.send_next_round_change();
                }
            } else {
                self.accept_preprepare(preprepare);
                self.set_state(State::Preprepared);
                self.send_prepare();
            }
        }
        Ok(())
    }

    fn accept_preprepare(&mut self, preprepare: Preprepare<B::Proposal>) {
        self.current.set_preprepare(preprepare);
    }

    /* ↓↓↓ PREPARE ↓↓↓ */

    fn send_prepare(&mut self) {
        let Some(subject) = self.current.subject() else {
            return;
        };
        let msg = ConsensusMessage::new(MessageCode::Prepare, &subject, self.address);
        if self.broadcast(msg).is_ok() {
            Event::Prepare(PrepareEvent {
                timestamp: SystemTime::now(),
                view: subject.view,
                digest: subject.digest,
            })
            .publish(&self.event_publisher);
        }
    }

    fn handle_prepare(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        // 1. Decode and check the view.
        let prepare = msg.subject().map_err(|_| CoreError::FailedDecodePrepare)?;
        self.check_message(MessageCode::Prepare, &prepare.view)?;

        // 2. It must be about the accepted proposal.
        self.verify_subject(&prepare, msg)?;

        // 3. Record it.
        self.current.prepares_mut().add(msg.clone())?;

        // 4. Move to Prepared on a quorum of PREPAREs and COMMITs, or straight away if locked on this
        //    hash.
        let locked_on_digest =
            self.is_hash_locked() && self.current.locked_hash() == Some(prepare.digest);
        if (locked_on_digest
            || self.current.prepare_or_commit_size() >= self.validator_set.min_approvers())
            && self.state < State::Prepared
        {
            self.lock_hash();
            self.set_state(State::Prepared);
            self.send_commit();
        }
        Ok(())
    }

    /// Check that a PREPARE or COMMIT is about the current subject.
    fn verify_subject(&self, subject: &Subject, msg: &ConsensusMessage) -> Result<(), CoreError> {
        match self.current.subject() {
            Some(current) if current == *subject => Ok(()),
            current => {
                log::warn!(
                    "Inconsistent subjects between {} and proposal, from: {}, expected: {:?}, got: {}",
                    msg.code,
                    msg.address,
                    current,
                    subject
                );
                Err(CoreError::InconsistentSubject)
            }
        }
    }

    /* ↓↓↓ COMMIT ↓↓↓ */

    fn send_commit(&mut self) {
        let Some(subject) = self.current.subject() else {
            return;
        };
        self.broadcast_commit(subject);
    }

    fn send_commit_for_old_block(&mut self, view: View, digest: CryptoHash) {
        self.broadcast_commit(Subject { view, digest });
    }

    fn broadcast_commit(&mut self, subject: Subject) {
        let mut msg = ConsensusMessage::new(MessageCode::Commit, &subject, self.address);
        match self.backend.sign(&prepare_committed_seal(&subject.digest)) {
            Ok(seal) => msg.committed_seal = seal.as_slice().to_vec(),
            Err(err) => {
                log::error!("Failed to sign committed seal: {:?}", err);
                return;
            }
        }
        if self.broadcast(msg).is_ok() {
            Event::Commit(CommitEvent {
                timestamp: SystemTime::now(),
                view: subject.view,
                digest: subject.digest,
            })
            .publish(&self.event_publisher);
        }
    }

    fn handle_commit(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        // 1. Decode and check the view.
        let commit = msg.subject().map_err(|_| CoreError::FailedDecodeCommit)?;
        self.check_message(MessageCode::Commit, &commit.view)?;

        // 2. It must be about the accepted proposal, and carry the sender's committed seal for it.
        self.verify_subject(&commit, msg)?;
        let seal = msg
            .committed_seal()
            .ok_or(CoreError::InvalidCommittedSeals)?;
        let sealer = recover_address(&prepare_committed_seal(&commit.digest), &seal)
            .map_err(|_| CoreError::InvalidCommittedSeals)?;
        if sealer != msg.address {
            return Err(CoreError::InvalidCommittedSeals);
        }

        // 3. Record it.
        self.current.commits_mut().add(msg.clone())?;

        // 4. Commit on a quorum of COMMITs.
        if self.current.commits().size() >= self.validator_set.min_approvers()
            && self.state < State::Committed
        {
            self.lock_hash();
            self.commit();
        }
        Ok(())
    }

    fn commit(&mut self) {
        self.set_state(State::Committed);

        let Some(proposal) = self.current.proposal().cloned() else {
            return;
        };
        let committed_seals: Vec<Signature> = self
            .current
            .commits()
            .values()
            .filter_map(|msg| msg.committed_seal())
            .collect();
        let number = proposal.number();
        let hash = proposal.hash();
        let seals = committed_seals.len();

        match self.backend.commit(proposal, committed_seals) {
            Ok(()) => {
                log::info!("Committed, number: {}, hash: {}, seals: {}", number, hash, seals);
                Event::CommitBlock(CommitBlockEvent {
                    timestamp: SystemTime::now(),
                    number,
                    block: hash,
                    committed_seals: seals,
                })
                .publish(&self.event_publisher);
            }
            Err(err) => {
                log::error!("Failed to commit, number: {}, hash: {}, error: {:?}", number, hash, err);
                self.unlock_hash();
                self.send_next_round_change();
            }
        }
    }

    fn lock_hash(&mut self) {
        let was_locked = self.current.locked_hash();
        self.current.lock_hash();
        if let Some(hash) = self.current.locked_hash() {
            if was_locked != Some(hash) {
                Event::LockHash(LockHashEvent {
                    timestamp: SystemTime::now(),
                    view: self.current.view(),
                    hash,
                })
                .publish(&self.event_publisher);
            }
        }
    }

    fn unlock_hash(&mut self) {
        if let Some(hash) = self.current.locked_hash() {
            self.current.unlock_hash();
            Event::UnlockHash(UnlockHashEvent {
                timestamp: SystemTime::now(),
                view: self.current.view(),
                hash,
            })
            .publish(&self.event_publisher);
        }
    }

    /* ↓↓↓ ROUND-CHANGE ↓↓↓ */

    fn send_next_round_change(&mut self) {
        // Never enter a round that could not be left again.
        match self.current.round().next().filter(|next| next.next().is_some()) {
            Some(next) => self.send_round_change(next),
            None => log::error!(
                "Cannot move past the last round, view: {}",
                self.current.view()
            ),
        }
    }

    /// Move to `round` of the current sequence and ask the other validators to do the same.
    fn send_round_change(&mut self, round: Round) {
        let current = self.current.view();
        if current.round >= round {
            log::error!(
                "Cannot send out the round change, current round: {}, target round: {}",
                current.round,
                round
            );
            return;
        }

        self.catch_up_round(View::new(current.sequence, round));

        let view = self.current.view();
        let subject = Subject {
            view,
            digest: CryptoHash::zero(),
        };
        let msg = ConsensusMessage::new(MessageCode::RoundChange, &subject, self.address);
        if self.broadcast(msg).is_ok() {
            Event::RoundChange(RoundChangeEvent {
                timestamp: SystemTime::now(),
                view,
            })
            .publish(&self.event_publisher);
        }
    }

    /// Move to `view` while waiting for enough ROUND-CHANGEs to actually start it.
    fn catch_up_round(&mut self, view: View) {
        log::debug!("Catch up round, from: {}, to: {}", self.current.view(), view);
        self.waiting_for_round_change = true;
        let validator_set = self.validator_set.clone();
        self.update_round_state(view, &validator_set, true);
        self.round_change_set.clear(view.round);
        self.new_round_change_timer();
    }

    fn handle_round_change(&mut self, msg: &ConsensusMessage) -> Result<(), CoreError> {
        // 1. Decode and check the view.
        let round_change = msg
            .subject()
            .map_err(|_| CoreError::FailedDecodeRoundChange)?;
        self.check_message(MessageCode::RoundChange, &round_change.view)?;
        // A round with no successor could never be left again.
        if round_change.view.round.next().is_none() {
            return Err(CoreError::RoundOutOfRange);
        }

        // 2. Count it towards its round.
        let current_round = self.current.round();
        let round = round_change.view.round;
        let count = self.round_change_set.add(round, msg.clone())?;
        Event::ReceiveRoundChange(ReceiveRoundChangeEvent {
            timestamp: SystemTime::now(),
            origin: msg.address,
            view: round_change.view,
            count,
        })
        .publish(&self.event_publisher);

        // 3. A quorum starts the round right away. Failing that, a weak certificate for a later round
        //    means at least one correct validator has moved on, so follow it.
        if count == self.validator_set.min_approvers()
            && (self.waiting_for_round_change || current_round < round)
        {
            self.start_new_round(round);
            Ok(())
        } else if count == self.validator_set.weak_certificate() && current_round < round {
            self.send_round_change(round);
            Ok(())
        } else if current_round < round {
            // Only messages for the current round are worth passing on.
            Err(CoreError::Ignored)
        } else {
            Ok(())
        }
    }

    /* ↓↓↓ Rounds ↓↓↓ */

    /// Start `round` of the current sequence, or round 0 of the sequence after the local chain head
    /// if the chain has moved on.
    fn start_new_round(&mut self, round: Round) {
        let (last_proposal, last_proposer) = self.backend.last_proposal();
        let last_number = last_proposal.number();
        let current_sequence = self.current.sequence().int();

        // 1. Work out whether this is a round change within the current sequence.
        let round_change = if last_number >= current_sequence {
            log::trace!(
                "Catch up latest proposal, number: {}, hash: {}",
                last_number,
                last_proposal.hash()
            );
            false
        } else if last_number + 1 == current_sequence {
            if round.int() == 0 {
                // Already in round 0 of this sequence.
                return;
            }
            if round < self.current.round() {
                log::warn!(
                    "New round should not be smaller than current round, sequence: {}, new round: {}, old round: {}",
                    current_sequence,
                    round,
                    self.current.round()
                );
                return;
            }
            true
        } else {
            log::warn!(
                "New sequence should be larger than current sequence, new sequence: {}",
                last_number
            );
            return;
        };

        // 2. Work out the new view, and on a new sequence the validators that decide it.
        let view = if round_change {
            View::new(self.current.sequence(), round)
        } else {
            self.validator_set = self.backend.validators(&last_proposal);
            View::new(Sequence::new(last_number + 1), Round::new(0))
        };

        // 3. Reset the round state and pick the proposer.
        self.round_change_set = RoundChangeSet::new(self.validator_set.clone());
        let validator_set = self.validator_set.clone();
        self.update_round_state(view, &validator_set, round_change);
        self.validator_set.calc_proposer(&last_proposer, view.round);
        self.waiting_for_round_change = false;
        self.set_state(State::AcceptRequest);

        let proposer = self.validator_set.get_proposer().unwrap_or_default();
        log::debug!(
            "New round, view: {}, proposer: {}, validators: {}, is proposer: {}",
            view,
            proposer,
            self.validator_set.size(),
            self.is_proposer()
        );
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            view,
            proposer,
        })
        .publish(&self.event_publisher);

        // 4. A new proposer re-proposes the locked proposal if there is one, else the pending request.
        if round_change && self.is_proposer() {
            let request = if self.is_hash_locked() {
                self.current.proposal().cloned()
            } else {
                self.current.pending_request().cloned()
            };
            if let Some(request) = request {
                self.send_preprepare(&request);
            }
        }

        self.new_round_change_timer();
    }

    /// Replace the round state with a fresh one for `view`. On a round change, the pending request
    /// carries over, and so does the lock if there is one.
    fn update_round_state(&mut self, view: View, validator_set: &ValidatorSet, round_change: bool) {
        let locked = self.is_hash_locked();
        let previous = std::mem::replace(
            &mut self.current,
            RoundState::new(view, validator_set, None, None, None),
        );
        if round_change {
            let (locked_hash, preprepare, pending_request) = previous.into_parts();
            self.current = if locked {
                RoundState::new(view, validator_set, locked_hash, preprepare, pending_request)
            } else {
                RoundState::new(view, validator_set, None, None, pending_request)
            };
        }
        self.sent_preprepare = false;
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            log::trace!("State change, from: {}, to: {}", self.state, state);
            self.state = state;
        }
        if state == State::AcceptRequest {
            self.process_pending_requests();
        }
        self.process_backlog();
    }

    fn new_round_change_timer(&mut self) {
        let timeout = round_timeout(
            self.config.request_timeout,
            self.config.max_timeout,
            self.current.round(),
        );
        self.timers.reset_round_change(timeout);
    }

    fn handle_timeout(&mut self) {
        let view = self.current.view();
        log::debug!("Round timeout, view: {}", view);
        Event::RoundTimeout(RoundTimeoutEvent {
            timestamp: SystemTime::now(),
            view,
            timeout: round_timeout(self.config.request_timeout, self.config.max_timeout, view.round),
        })
        .publish(&self.event_publisher);

        // 1. Follow a weak certificate for a later round if there is one.
        if !self.waiting_for_round_change {
            if let Some(max_round) = self
                .round_change_set
                .max_round(self.validator_set.weak_certificate())
            {
                if max_round > self.current.round() {
                    self.send_round_change(max_round);
                    return;
                }
            }
        }

        // 2. If the chain has moved past the current sequence, catch up. Otherwise, try the next round.
        let (last_proposal, _) = self.backend.last_proposal();
        if last_proposal.number() >= self.current.sequence().int() {
            self.start_new_round(Round::new(0));
        } else {
            self.send_next_round_change();
        }
    }

    fn handle_final_committed(&mut self) {
        log::trace!("Received a final committed proposal");
        self.start_new_round(Round::new(0));
    }

    /* ↓↓↓ Sending ↓↓↓ */

    /// Sign `msg` and broadcast it to the current validator set, this node included.
    fn broadcast(&mut self, mut msg: ConsensusMessage) -> Result<(), CoreError> {
        msg.address = self.address;
        let signature = self.backend.sign(&msg.payload_no_sig()).map_err(|err| {
            log::error!("Failed to sign message, code: {}, error: {:?}", msg.code, err);
            CoreError::BackendError(err)
        })?;
        msg.signature = signature.as_slice().to_vec();
        self.backend.broadcast(&self.validator_set, msg.payload());
        Ok(())
    }

    fn post(&self, event: EngineEvent<B::Proposal>) {
        // The queue only closes when the engine is shutting down.
        let _ = self.event_queue.send(event);
    }
}

/// Configuration parameters for the [`Core`] struct.
#[derive(Clone, Copy, Debug)]
pub struct CoreConfiguration {
    /// Base length of a round.
    pub request_timeout: Duration,

    /// Upper bound on the length of a round.
    pub max_timeout: Duration,
}

/// The ways handling an event in [`Core`] can fail.
///
/// [`FutureMessage`](CoreError::FutureMessage) is not a failure as such: the message or request was
/// kept for later.
#[derive(Debug)]
pub enum CoreError {
    FailedDecodeMessage,
    FailedDecodePreprepare,
    FailedDecodePrepare,
    FailedDecodeCommit,
    FailedDecodeRoundChange,
    /// The message is for an earlier view.
    OldMessage,
    /// The message is for a later view or state, and was stored in the backlog.
    FutureMessage,
    NotFromProposer,
    /// A PREPARE or COMMIT is not about the accepted proposal.
    InconsistentSubject,
    InvalidSignature,
    /// The envelope's address is not the address that signed it.
    InvalidSigner,
    Unauthorized(Address),
    /// The message is valid but not worth passing on.
    Ignored,
    InvalidProposal(VerifyError),
    /// The proposal's timestamp is ahead of the local clock. It will be retried after the delay.
    FutureBlock(Duration),
    InvalidCommittedSeals,
    /// A ROUND-CHANGE for the last representable round.
    RoundOutOfRange,
    BackendError(BackendError),
}

impl From<SignerError> for CoreError {
    fn from(value: SignerError) -> Self {
        match value {
            SignerError::InvalidSignature => CoreError::InvalidSignature,
            SignerError::Unauthorized(address) => CoreError::Unauthorized(address),
        }
    }
}

impl From<MessageSetError> for CoreError {
    fn from(value: MessageSetError) -> Self {
        match value {
            MessageSetError::Unauthorized(address) => CoreError::Unauthorized(address),
        }
    }
}

impl From<BackendError> for CoreError {
    fn from(value: BackendError) -> Self {
        CoreError::BackendError(value)
    }
}
