/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for receiving messages from the P2P network.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::types::data_types::Address;

use super::{messages::Message, network::Network};

/// Spawn the poller thread, which polls the [`Network`] for frames and passes each one to `handler`
/// together with the address of the peer that sent it.
///
/// The thread exits when `shutdown_signal` receives a message or its sender is dropped.
pub(crate) fn start_polling<N: Network>(
    mut network: N,
    shutdown_signal: Receiver<()>,
    handler: impl Fn(Address, Message) + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, msg)) = network.recv() {
            handler(origin, msg);
        } else {
            thread::yield_now()
        }
    })
}
