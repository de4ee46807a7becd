use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::RegistryResult;
use crate::model::{Durability, StoreValue};
use crate::RegistryStore;

#[derive(Default)]
struct MemoryState {
    live: BTreeMap<String, StoreValue>,
    durable: BTreeMap<String, StoreValue>,
}

/// In-process registry.
///
/// Tracks which writes would have reached disk so that a process kill can be
/// simulated with [`MemoryRegistryStore::simulate_crash`].
#[derive(Default)]
pub struct MemoryRegistryStore {
    state: Mutex<MemoryState>,
    deferred_writes: AtomicUsize,
    immediate_writes: AtomicUsize,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every deferred write that was not yet flushed.
    pub fn simulate_crash(&self) {
        let mut state = self.state.lock();
        state.live = state.durable.clone();
    }

    pub fn snapshot(&self) -> BTreeMap<String, StoreValue> {
        self.state.lock().live.clone()
    }

    pub fn deferred_writes(&self) -> usize {
        self.deferred_writes.load(Ordering::Relaxed)
    }

    pub fn immediate_writes(&self) -> usize {
        self.immediate_writes.load(Ordering::Relaxed)
    }

    fn commit(&self, state: &mut MemoryState, durability: Durability) {
        match durability {
            Durability::Deferred => {
                self.deferred_writes.fetch_add(1, Ordering::Relaxed);
            }
            Durability::Immediate => {
                self.immediate_writes.fetch_add(1, Ordering::Relaxed);
                // An immediate write drains everything queued before it.
                state.durable = state.live.clone();
            }
        }
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn get(&self, key: &str) -> Option<StoreValue> {
        self.state.lock().live.get(key).cloned()
    }

    fn put(&self, key: &str, value: StoreValue, durability: Durability) -> RegistryResult<()> {
        let mut state = self.state.lock();
        state.live.insert(key.to_string(), value);
        self.commit(&mut state, durability);
        Ok(())
    }

    fn remove(&self, key: &str, durability: Durability) -> RegistryResult<()> {
        let mut state = self.state.lock();
        state.live.remove(key);
        self.commit(&mut state, durability);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .live
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn flush(&self) -> RegistryResult<()> {
        let mut state = self.state.lock();
        state.durable = state.live.clone();
        Ok(())
    }
}
