/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable peer-to-peer transport.

use crate::types::data_types::Address;

use super::messages::Message;

/// The node's connections to its peers, identified by their validator addresses.
///
/// Implementations must not block in [`send`](Network::send) or [`recv`](Network::recv). A clone shares
/// its connections with the original: the engine sends through one clone while the poller thread
/// receives through another.
pub trait Network: Clone + Send + 'static {
    /// Return the addresses in `targets` that are currently connected peers.
    fn find_peers(&self, targets: &[Address]) -> Vec<Address>;

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: Address, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(Address, Message)>;
}
