/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable snapshot persistence.
//!
//! The engine persists nothing but checkpoint [`Snapshot`]s. Each is stored as a JSON document under
//! the key `SNAPSHOT_PREFIX || block hash`.

use std::fmt::Display;

use crate::types::data_types::CryptoHash;

use super::Snapshot;

/// Prefix of the key under which the snapshot at a block is stored.
pub const SNAPSHOT_PREFIX: &[u8] = b"sportbft-snapshot";

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Snapshot ↓↓↓ */

    /// Load the checkpoint snapshot stored for `block`, if any. The stored epoch is replaced with
    /// `epoch`, the epoch length currently configured.
    fn snapshot(&self, block: &CryptoHash, epoch: u64) -> Result<Option<Snapshot>, KVGetError> {
        match self.get(&snapshot_key(block)) {
            None => Ok(None),
            Some(bytes) => {
                let mut snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|err| {
                    KVGetError::DeserializeValueError {
                        key: Key::Snapshot { block: *block },
                        source: err,
                    }
                })?;
                snapshot.epoch = epoch;
                Ok(Some(snapshot))
            }
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
}

/// A [`WriteBatch`] that knows how to lay out snapshots in the key-value store.
pub(crate) struct SnapshotWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> SnapshotWriteBatch<W> {
    pub(crate) fn new() -> SnapshotWriteBatch<W> {
        SnapshotWriteBatch(W::new())
    }

    /// Stage `snapshot` for writing. Writing the same snapshot twice leaves the store unchanged.
    pub(crate) fn set_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), serde_json::Error> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.0.set(&snapshot_key(&snapshot.hash), &bytes);
        Ok(())
    }
}

pub(crate) fn snapshot_key(block: &CryptoHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(SNAPSHOT_PREFIX.len() + CryptoHash::LEN);
    key.extend_from_slice(SNAPSHOT_PREFIX);
    key.extend_from_slice(block.as_slice());
    key
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError {
        key: Key,
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub enum Key {
    Snapshot { block: CryptoHash },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Snapshot { block } => write!(f, "Snapshot for block {}", block),
        }
    }
}
