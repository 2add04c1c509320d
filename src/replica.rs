/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one node's instance of the engine: a [`SportBackend`] with its engine thread running,
//! a poller thread feeding it frames from the network, and optionally an event bus thread running
//! event handlers.
//!
//! They key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .keypair(keypair)
//!     .chain(chain)
//!     .network(network)
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_commit_block(commit_block_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the node's identity and the trait implementations required
//! to run a replica:
//! - `.keypair(...)`
//! - `.chain(...)`
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_start_round(...)`
//! - `.on_lock_hash(...)`
//! - `.on_unlock_hash(...)`
//! - `.on_round_timeout(...)`
//! - `.on_propose(...)`
//! - `.on_prepare(...)`
//! - `.on_commit(...)`
//! - `.on_round_change(...)`
//! - `.on_receive_preprepare(...)`
//! - `.on_receive_round_change(...)`
//! - `.on_commit_block(...)`
//! - `.on_update_validator_set(...)`
//! - `.on_store_snapshot(...)`
//!
//! ## Producing blocks
//!
//! The host drives block production through the backend returned by [`Replica::backend`]:
//! [`prepare`](SportBackend::prepare), [`finalize`](SportBackend::finalize) and
//! [`seal`](SportBackend::seal). After importing any block, the host calls
//! [`new_chain_head`](SportBackend::new_chain_head).

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::{
    backend::sport_backend::SportBackend,
    chain::ChainReader,
    config::Configuration,
    event_bus::*,
    events::*,
    networking::{network::Network, receiving::start_polling},
    snapshot::pluggables::KVStore,
    types::crypto_primitives::Keypair,
};

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.keypair(...)`
    - `.chain(...)`
    - `.network(...)`
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_start_round(...)`
    - `.on_lock_hash(...)`
    - `.on_unlock_hash(...)`
    - `.on_round_timeout(...)`
    - `.on_propose(...)`
    - `.on_prepare(...)`
    - `.on_commit(...)`
    - `.on_round_change(...)`
    - `.on_receive_preprepare(...)`
    - `.on_receive_round_change(...)`
    - `.on_commit_block(...)`
    - `.on_update_validator_set(...)`
    - `.on_store_snapshot(...)`
"))]
pub struct ReplicaSpec<N: Network, K: KVStore, C: ChainReader> {
    // Required parameters
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages, seals and committed seals. Required."))]
    keypair: Keypair,
    #[builder(setter(doc = "Set the host's chain. The argument must implement the [ChainReader](crate::chain::ChainReader) trait. Required."))]
    chain: C,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the replica's Key-Value store. The argument must implement the [KVStore](crate::snapshot::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LockHashEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LockHashEvent>),
    doc = "Register a handler closure to be invoked after the replica locks on a proposal. Optional."))]
    on_lock_hash: Option<HandlerPtr<LockHashEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UnlockHashEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UnlockHashEvent>),
    doc = "Register a handler closure to be invoked after the replica releases its lock. Optional."))]
    on_unlock_hash: Option<HandlerPtr<UnlockHashEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica's round change timer fires. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a PRE-PREPARE. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a PREPARE. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a COMMIT. Optional."))]
    on_commit: Option<HandlerPtr<CommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a ROUND-CHANGE. Optional."))]
    on_round_change: Option<HandlerPtr<RoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePreprepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePreprepareEvent>),
    doc = "Register a handler closure to be invoked after the replica accepts a PRE-PREPARE. Optional."))]
    on_receive_preprepare: Option<HandlerPtr<ReceivePreprepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveRoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveRoundChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica records a ROUND-CHANGE. Optional."))]
    on_receive_round_change: Option<HandlerPtr<ReceiveRoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is decided. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateValidatorSetEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateValidatorSetEvent>),
    doc = "Register a handler closure to be invoked after a snapshot with a changed validator set is resolved. Optional."))]
    on_update_validator_set: Option<HandlerPtr<UpdateValidatorSetEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StoreSnapshotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StoreSnapshotEvent>),
    doc = "Register a handler closure to be invoked after a snapshot is checkpointed to the Key-Value store. Optional."))]
    on_store_snapshot: Option<HandlerPtr<StoreSnapshotEvent>>,
}

impl<N: Network, K: KVStore, C: ChainReader> ReplicaSpec<N, K, C> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    pub fn start(self) -> Replica<N, K, C> {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_start_round,
            self.on_lock_hash,
            self.on_unlock_hash,
            self.on_round_timeout,
            self.on_propose,
            self.on_prepare,
            self.on_commit,
            self.on_round_change,
            self.on_receive_preprepare,
            self.on_receive_round_change,
            self.on_commit_block,
            self.on_update_validator_set,
            self.on_store_snapshot,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let backend = SportBackend::new(
            self.configuration,
            self.keypair,
            self.chain,
            self.network.clone(),
            self.kv_store,
            event_publisher,
        );

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller_backend = backend.clone();
        let poller = start_polling(
            self.network,
            poller_shutdown_receiver,
            move |origin, msg| {
                if let Err(err) = poller_backend.handle_message(origin, msg) {
                    log::trace!("Dropped a frame, origin: {}, err: {:?}", origin, err);
                }
            },
        );

        if let Err(err) = backend.start() {
            log::error!("Failed to start the engine: {:?}", err);
        }

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Replica {
            backend,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<N: Network, K: KVStore, C: ChainReader> {
    backend: SportBackend<N, K, C>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network, K: KVStore, C: ChainReader> Replica<N, K, C> {
    /// Returns the replica's backend, through which the host produces and verifies blocks and reads
    /// snapshots.
    pub fn backend(&self) -> &SportBackend<N, K, C> {
        &self.backend
    }
}

impl<N: Network, K: KVStore, C: ChainReader> Drop for Replica<N, K, C> {
    fn drop(&mut self) {
        // The engine goes first, so that the event bus outlives every event it publishes.
        if self.backend.is_running() {
            if let Err(err) = self.backend.stop() {
                log::error!("Failed to stop the engine: {:?}", err);
            }
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            if poller.join().is_err() {
                log::error!("Poller thread panicked");
            }
        }

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }
    }
}
