/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::config::Configuration).
//!
//! The engine logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceivePreprepare](crate::events::ReceivePreprepareEvent) is printed:
//!
//! ```text
//! ReceivePreprepare, 1701329264, Id5u7f6, 12, 0, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the address of the
//!   proposer.
//! - The fourth and fifth values are the sequence and round of the PRE-PREPARE.
//! - The sixth value is the first seven characters of the Base64 encoding of the proposal's hash.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const START_ROUND: &str = "StartRound";
pub const LOCK_HASH: &str = "LockHash";
pub const UNLOCK_HASH: &str = "UnlockHash";
pub const ROUND_TIMEOUT: &str = "RoundTimeout";

pub const PROPOSE: &str = "Propose";
pub const PREPARE: &str = "Prepare";
pub const COMMIT: &str = "Commit";
pub const ROUND_CHANGE: &str = "RoundChange";

pub const RECEIVE_PREPREPARE: &str = "ReceivePreprepare";
pub const RECEIVE_ROUND_CHANGE: &str = "ReceiveRoundChange";

pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const UPDATE_VALIDATOR_SET: &str = "UpdateValidatorSet";
pub const STORE_SNAPSHOT: &str = "StoreSnapshot";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.view.sequence,
                start_round_event.view.round,
                first_seven_base64_chars(start_round_event.proposer.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for LockHashEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |lock_hash_event: &LockHashEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                LOCK_HASH,
                secs_since_unix_epoch(lock_hash_event.timestamp),
                lock_hash_event.view.sequence,
                lock_hash_event.view.round,
                first_seven_base64_chars(lock_hash_event.hash.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UnlockHashEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |unlock_hash_event: &UnlockHashEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UNLOCK_HASH,
                secs_since_unix_epoch(unlock_hash_event.timestamp),
                unlock_hash_event.view.sequence,
                unlock_hash_event.view.round,
                first_seven_base64_chars(unlock_hash_event.hash.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_timeout_event: &RoundTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ROUND_TIMEOUT,
                secs_since_unix_epoch(round_timeout_event.timestamp),
                round_timeout_event.view.sequence,
                round_timeout_event.view.round,
                round_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.view.sequence,
                propose_event.view.round,
                first_seven_base64_chars(propose_event.proposal.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                prepare_event.view.sequence,
                prepare_event.view.round,
                first_seven_base64_chars(prepare_event.digest.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT,
                secs_since_unix_epoch(commit_event.timestamp),
                commit_event.view.sequence,
                commit_event.view.round,
                first_seven_base64_chars(commit_event.digest.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_change_event: &RoundChangeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ROUND_CHANGE,
                secs_since_unix_epoch(round_change_event.timestamp),
                round_change_event.view.sequence,
                round_change_event.view.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePreprepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_preprepare_event: &ReceivePreprepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PREPREPARE,
                secs_since_unix_epoch(receive_preprepare_event.timestamp),
                first_seven_base64_chars(receive_preprepare_event.origin.as_slice()),
                receive_preprepare_event.view.sequence,
                receive_preprepare_event.view.round,
                first_seven_base64_chars(receive_preprepare_event.proposal.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveRoundChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_round_change_event: &ReceiveRoundChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_ROUND_CHANGE,
                secs_since_unix_epoch(receive_round_change_event.timestamp),
                first_seven_base64_chars(receive_round_change_event.origin.as_slice()),
                receive_round_change_event.view.sequence,
                receive_round_change_event.view.round,
                receive_round_change_event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.number,
                first_seven_base64_chars(commit_block_event.block.as_slice()),
                commit_block_event.committed_seals
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateValidatorSetEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_validator_set_event: &UpdateValidatorSetEvent| {
            let validators: Vec<String> = update_validator_set_event
                .validators
                .iter()
                .map(|validator| first_seven_base64_chars(validator.as_slice()))
                .collect();
            log::info!(
                "{}, {}, {}, {}, [{}]",
                UPDATE_VALIDATOR_SET,
                secs_since_unix_epoch(update_validator_set_event.timestamp),
                update_validator_set_event.number,
                first_seven_base64_chars(update_validator_set_event.block.as_slice()),
                validators.join(" ")
            )
        };
        Box::new(logger)
    }
}

impl Logger for StoreSnapshotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |store_snapshot_event: &StoreSnapshotEvent| {
            log::info!(
                "{}, {}, {}, {}",
                STORE_SNAPSHOT,
                secs_since_unix_epoch(store_snapshot_event.timestamp),
                store_snapshot_event.number,
                first_seven_base64_chars(store_snapshot_event.block.as_slice())
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
