/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The engine thread: the single owner of a [`Core`], fed by one event queue.
//!
//! Everything that can change consensus state arrives as an [`EngineEvent`]: requests to propose from
//! the sealing path, messages from the network poller, messages the core itself released from its
//! backlog, and notifications from the host. Between events the thread sleeps until the next event or
//! the core's next timer deadline, whichever comes first.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::Instant,
};

use crate::backend::Backend;

use super::{
    implementation::{Core, CoreError},
    messages::ConsensusMessage,
};

/// An input to the engine thread.
pub enum EngineEvent<P> {
    /// Propose `P` if this node is the proposer for its height.
    Request(P),
    /// A consensus message payload, from the network or from this node's own broadcast.
    Message(Vec<u8>),
    /// A message from the backlog whose view has come. Its signature was checked when it first
    /// arrived.
    Backlog(ConsensusMessage),
    /// The round change timer fired.
    Timeout,
    /// The host inserted a new chain head.
    FinalCommitted,
    /// Shut the engine thread down.
    Stop,
}

/// Spawn the engine thread. The thread starts `core` and then handles `events` until it receives
/// [`EngineEvent::Stop`] or every sender is dropped.
pub(crate) fn start_engine<B: Backend>(
    mut core: Core<B>,
    events: Receiver<EngineEvent<B::Proposal>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        core.start();
        loop {
            let event = match core.next_deadline() {
                Some(deadline) => {
                    match events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            match event {
                Some(EngineEvent::Stop) => break,
                Some(event) => log_result(core.handle_event(event)),
                None => (),
            }
            core.handle_expired_timers(Instant::now());
        }
        core.stop();
        log::debug!("Engine thread stopped, address: {}", core.address());
    })
}

fn log_result(result: Result<(), CoreError>) {
    match result {
        Ok(()) => (),
        Err(CoreError::FutureMessage) | Err(CoreError::OldMessage) | Err(CoreError::Ignored) => {
            log::trace!("Event not handled now: {:?}", result)
        }
        Err(err) => log::debug!("Failed to handle event: {:?}", err),
    }
}
