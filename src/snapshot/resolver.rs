/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Resolution of the [`Snapshot`] at an arbitrary block.
//!
//! To find the snapshot at `(number, hash)`, [`SnapshotStore::snapshot`] walks back from that block,
//! collecting headers, until it reaches a block whose snapshot is already known: one in the in-memory
//! LRU, a checkpoint in the key-value store (only looked up at multiples of [`CHECKPOINT_INTERVAL`]),
//! or genesis, whose snapshot is built from the validator list in its extra-data. It then replays the
//! collected headers onto the known snapshot.

use std::{num::NonZeroUsize, sync::mpsc::Sender, time::SystemTime};

use lru::LruCache;
use parking_lot::Mutex;

use crate::{
    chain::ChainReader,
    events::{Event, StoreSnapshotEvent, UpdateValidatorSetEvent},
    types::{
        block::Header,
        data_types::CryptoHash,
        extra,
        validator_set::{ProposerPolicy, ValidatorSet},
    },
};

use super::{
    pluggables::{KVStore, SnapshotWriteBatch},
    Snapshot, SnapshotError, CHECKPOINT_INTERVAL, INMEMORY_SNAPSHOTS,
};

pub struct SnapshotStore<K: KVStore> {
    epoch: u64,
    policy: ProposerPolicy,
    recents: Mutex<LruCache<CryptoHash, Snapshot>>,
    kv_store: Mutex<K>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore> SnapshotStore<K> {
    pub fn new(
        kv_store: K,
        epoch: u64,
        policy: ProposerPolicy,
        event_publisher: Option<Sender<Event>>,
    ) -> SnapshotStore<K> {
        let capacity = NonZeroUsize::new(INMEMORY_SNAPSHOTS).unwrap_or(NonZeroUsize::MIN);
        SnapshotStore {
            epoch,
            policy,
            recents: Mutex::new(LruCache::new(capacity)),
            kv_store: Mutex::new(kv_store),
            event_publisher,
        }
    }

    /// Get the snapshot at block `(number, hash)`.
    ///
    /// `parents` are headers that may not be in `chain` yet (e.g., the earlier part of a batch being
    /// verified), in ascending order, ending with the block's own header if it is not in `chain`. They
    /// are consumed from the back before `chain` is consulted.
    pub fn snapshot<C: ChainReader>(
        &self,
        chain: &C,
        mut number: u64,
        mut hash: CryptoHash,
        mut parents: &[Header],
    ) -> Result<Snapshot, SnapshotError> {
        let mut headers = Vec::new();

        // 1. Walk back to the nearest known snapshot.
        let base = loop {
            if let Some(snapshot) = self.recents.lock().get(&hash) {
                break snapshot.clone();
            }

            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(snapshot) = self.kv_store.lock().snapshot(&hash, self.epoch)? {
                    log::trace!("Loaded voting snapshot from disk, number: {}, hash: {}", number, hash);
                    break snapshot;
                }
            }

            if number == 0 {
                let genesis = chain
                    .get_header_by_number(0)
                    .ok_or(SnapshotError::UnknownAncestor)?;
                let bft_extra = extra::extract(&genesis)?;
                let snapshot = Snapshot::new(
                    self.epoch,
                    0,
                    genesis.hash(),
                    ValidatorSet::new(&bft_extra.validators, self.policy),
                );
                self.store(&snapshot)?;
                log::trace!("Stored genesis voting snapshot to disk");
                break snapshot;
            }

            let header = match parents.split_last() {
                Some((last, rest)) => {
                    if last.hash() != hash || last.number != number {
                        return Err(SnapshotError::UnknownAncestor);
                    }
                    parents = rest;
                    last.clone()
                }
                None => chain
                    .get_header(&hash, number)
                    .ok_or(SnapshotError::UnknownAncestor)?,
            };
            number -= 1;
            hash = header.parent_hash;
            headers.push(header);
        };

        // 2. Replay the collected headers, oldest first.
        headers.reverse();
        let snapshot = base.apply(&headers)?;
        if snapshot.validator_set != base.validator_set {
            Event::UpdateValidatorSet(UpdateValidatorSetEvent {
                timestamp: SystemTime::now(),
                number: snapshot.number,
                block: snapshot.hash,
                validators: snapshot.validators(),
            })
            .publish(&self.event_publisher);
        }
        self.recents.lock().put(snapshot.hash, snapshot.clone());

        // 3. Checkpoint.
        if snapshot.number % CHECKPOINT_INTERVAL == 0 && !headers.is_empty() {
            self.store(&snapshot)?;
            log::trace!(
                "Stored voting snapshot to disk, number: {}, hash: {}",
                snapshot.number,
                snapshot.hash
            );
        }

        Ok(snapshot)
    }

    fn store(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let mut wb = SnapshotWriteBatch::new();
        wb.set_snapshot(snapshot)?;
        self.kv_store.lock().write(wb.0);

        Event::StoreSnapshot(StoreSnapshotEvent {
            timestamp: SystemTime::now(),
            number: snapshot.number,
            block: snapshot.hash,
        })
        .publish(&self.event_publisher);
        Ok(())
    }
}
