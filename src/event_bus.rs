/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that runs event handlers.
//!
//! Components publish [events](crate::events) to an mpsc channel. The event bus thread receives them
//! and calls, in registration order, the default logger for the event (if `log_events` is set) and the
//! user-defined handler (if one is registered).

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

/// How long the event bus waits for an event before checking for the shutdown signal again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) lock_hash_handlers: Vec<HandlerPtr<LockHashEvent>>,
    pub(crate) unlock_hash_handlers: Vec<HandlerPtr<UnlockHashEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_handlers: Vec<HandlerPtr<CommitEvent>>,
    pub(crate) round_change_handlers: Vec<HandlerPtr<RoundChangeEvent>>,
    pub(crate) receive_preprepare_handlers: Vec<HandlerPtr<ReceivePreprepareEvent>>,
    pub(crate) receive_round_change_handlers: Vec<HandlerPtr<ReceiveRoundChangeEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) update_validator_set_handlers: Vec<HandlerPtr<UpdateValidatorSetEvent>>,
    pub(crate) store_snapshot_handlers: Vec<HandlerPtr<StoreSnapshotEvent>>,
}

/// Build the handler list for one event type: the default logger first, then the user's handler.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_round_handler: Option<HandlerPtr<StartRoundEvent>>,
        lock_hash_handler: Option<HandlerPtr<LockHashEvent>>,
        unlock_hash_handler: Option<HandlerPtr<UnlockHashEvent>>,
        round_timeout_handler: Option<HandlerPtr<RoundTimeoutEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        commit_handler: Option<HandlerPtr<CommitEvent>>,
        round_change_handler: Option<HandlerPtr<RoundChangeEvent>>,
        receive_preprepare_handler: Option<HandlerPtr<ReceivePreprepareEvent>>,
        receive_round_change_handler: Option<HandlerPtr<ReceiveRoundChangeEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
        update_validator_set_handler: Option<HandlerPtr<UpdateValidatorSetEvent>>,
        store_snapshot_handler: Option<HandlerPtr<StoreSnapshotEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_round_handlers: handlers(log_events, start_round_handler),
            lock_hash_handlers: handlers(log_events, lock_hash_handler),
            unlock_hash_handlers: handlers(log_events, unlock_hash_handler),
            round_timeout_handlers: handlers(log_events, round_timeout_handler),
            propose_handlers: handlers(log_events, propose_handler),
            prepare_handlers: handlers(log_events, prepare_handler),
            commit_handlers: handlers(log_events, commit_handler),
            round_change_handlers: handlers(log_events, round_change_handler),
            receive_preprepare_handlers: handlers(log_events, receive_preprepare_handler),
            receive_round_change_handlers: handlers(log_events, receive_round_change_handler),
            commit_block_handlers: handlers(log_events, commit_block_handler),
            update_validator_set_handlers: handlers(log_events, update_validator_set_handler),
            store_snapshot_handlers: handlers(log_events, store_snapshot_handler),
        }
    }

    /// Whether no handler at all is registered, in which case the event bus need not run.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.lock_hash_handlers.is_empty()
            && self.unlock_hash_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.commit_handlers.is_empty()
            && self.round_change_handlers.is_empty()
            && self.receive_preprepare_handlers.is_empty()
            && self.receive_round_change_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.update_validator_set_handlers.is_empty()
            && self.store_snapshot_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartRound(start_round_event) =>
                self.start_round_handlers.iter().for_each(|handler| handler(&start_round_event)),

            Event::LockHash(lock_hash_event) =>
                self.lock_hash_handlers.iter().for_each(|handler| handler(&lock_hash_event)),

            Event::UnlockHash(unlock_hash_event) =>
                self.unlock_hash_handlers.iter().for_each(|handler| handler(&unlock_hash_event)),

            Event::RoundTimeout(round_timeout_event) =>
                self.round_timeout_handlers.iter().for_each(|handler| handler(&round_timeout_event)),

            Event::Propose(propose_event) =>
                self.propose_handlers.iter().for_each(|handler| handler(&propose_event)),

            Event::Prepare(prepare_event) =>
                self.prepare_handlers.iter().for_each(|handler| handler(&prepare_event)),

            Event::Commit(commit_event) =>
                self.commit_handlers.iter().for_each(|handler| handler(&commit_event)),

            Event::RoundChange(round_change_event) =>
                self.round_change_handlers.iter().for_each(|handler| handler(&round_change_event)),

            Event::ReceivePreprepare(receive_preprepare_event) =>
                self.receive_preprepare_handlers.iter().for_each(|handler| handler(&receive_preprepare_event)),

            Event::ReceiveRoundChange(receive_round_change_event) =>
                self.receive_round_change_handlers.iter().for_each(|handler| handler(&receive_round_change_event)),

            Event::CommitBlock(commit_block_event) =>
                self.commit_block_handlers.iter().for_each(|handler| handler(&commit_block_event)),

            Event::UpdateValidatorSet(update_validator_set_event) =>
                self.update_validator_set_handlers.iter().for_each(|handler| handler(&update_validator_set_event)),

            Event::StoreSnapshot(store_snapshot_event) =>
                self.store_snapshot_handlers.iter().for_each(|handler| handler(&store_snapshot_event)),
        }
    }
}

/// Spawn the event bus thread. The thread exits when `shutdown_signal` receives a message or its
/// sender is dropped, or when every publisher of `event_subscriber` is gone.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
