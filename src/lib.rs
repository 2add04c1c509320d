/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the Sport Byzantine Fault Tolerant consensus engine for permissioned
//! blockchains.
//!
//! Sport is a three-phase (PRE-PREPARE, PREPARE, COMMIT) BFT protocol with round changes and hash
//! locking, run once per block height by a set of `n` equally weighted validators. It stays safe and
//! live with up to `f = floor((n - 1) / 3)` faulty validators. Validators join and leave the set by
//! voting in the headers of the blocks they produce.
//!
//! The engine does not store blocks or execute transactions. The host node provides those through the
//! pluggable traits:
//! - [`ChainReader`](chain::ChainReader): header lookup, block import and state roots.
//! - [`Network`](networking::network::Network): sending and receiving frames to and from peers.
//! - [`KVStore`](snapshot::pluggables::KVStore): persistence of validator set snapshots.
//!
//! To run a node, build and start a [replica](replica::ReplicaSpec).

pub mod backend;

pub mod chain;

pub mod config;

pub mod consensus;

pub mod events;

pub(crate) mod event_bus;

pub mod logging;

pub mod networking;

pub mod replica;

pub mod snapshot;

pub mod types;
