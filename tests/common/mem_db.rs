//! A volatile, in-memory [`KVStore`] for snapshot checkpoints.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use sport_bft::snapshot::pluggables::{KVGet, KVStore, WriteBatch};

/// Keys are kept ordered so that a failing test prints the store in a stable order.
#[derive(Clone)]
pub(crate) struct MemDB(Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>);

impl MemDB {
    pub(crate) fn new() -> MemDB {
        MemDB(Arc::new(Mutex::new(BTreeMap::new())))
    }

    /// Number of keys currently stored.
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) {
        let mut map = self.0.lock().unwrap();
        for (key, value) in wb.0 {
            map.insert(key, value);
        }
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }
}

/// Staged writes, in order.
pub(crate) struct MemWriteBatch(Vec<(Vec<u8>, Vec<u8>)>);

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch(Vec::new())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0.push((key.to_vec(), value.to_vec()));
    }
}
