/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus engine: the per-height PRE-PREPARE, PREPARE, COMMIT state machine with round
//! changes and hash locking.
//!
//! [`implementation::Core`] holds the protocol logic and [`engine`] runs it on its own thread. The
//! remaining modules hold the data the core works on: the wire [`messages`], the [`round_state`] of the
//! current view, the message sets in [`types`], the [`backlog`] of early input, and the [`timers`].

pub mod backlog;

pub mod engine;

pub mod implementation;

pub mod messages;

pub mod round_state;

pub mod timers;

pub mod types;
