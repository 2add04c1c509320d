/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the engine.
//!
//! Types specific to a single component live in that component's module, e.g., the consensus
//! messages in [`crate::consensus::messages`].

pub mod data_types;

pub mod crypto_primitives;

pub mod block;

pub mod extra;

pub mod validator_set;
