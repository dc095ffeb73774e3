//! Slave Registry
//!
//! Tracks the set of known slaves and which of them have shown signs of life
//! since the last liveness sweep.
//!
//! ## Liveness
//! Registration and heartbeats add a slave to the `seen` set. A sweep keeps
//! only `registered ∩ seen`, then clears `seen`. A slave that stays silent
//! for one full sweep interval is therefore evicted by the next sweep.
//!
//! Both sets sit behind a single lock so a registration that lands while a
//! sweep is running is either fully before it (and counted as seen) or fully
//! after it (and survives until the next sweep).

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use super::types::{SlaveEndpoint, SlaveId, SlaveRecord};

#[derive(Default)]
struct RegistryState {
    registered: HashMap<SlaveEndpoint, SlaveRecord>,
    tokens: HashMap<SlaveId, SlaveEndpoint>,
    seen: HashSet<SlaveEndpoint>,
}

#[derive(Default)]
pub struct SlaveRegistry {
    state: Mutex<RegistryState>,
}

impl SlaveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `endpoint` to the registry and marks it as freshly seen.
    ///
    /// Re-registering a known endpoint is not an error: the existing identity
    /// token is returned and the control address and memory are refreshed.
    pub fn register(&self, endpoint: SlaveEndpoint, control_addr: SocketAddr, memory: u64) -> SlaveId {
        let mut state = self.state.lock();

        let id = match state.registered.get_mut(&endpoint) {
            Some(record) => {
                tracing::debug!("Slave {} re-registered (id={})", endpoint, record.id.0);
                record.control_addr = control_addr;
                record.memory = memory;
                record.id.clone()
            }
            None => {
                let record = SlaveRecord {
                    id: SlaveId::new(),
                    endpoint,
                    control_addr,
                    memory,
                };
                let id = record.id.clone();
                tracing::info!(
                    "Registered slave {} (id={}, memory={} bytes)",
                    endpoint,
                    id.0,
                    memory
                );
                state.tokens.insert(id.clone(), endpoint);
                state.registered.insert(endpoint, record);
                id
            }
        };

        state.seen.insert(endpoint);
        id
    }

    /// Marks the slave holding `id` as freshly seen.
    ///
    /// Returns `false` for a token that is not (or no longer) registered; such
    /// heartbeats never add anything to the registry.
    pub fn heartbeat(&self, id: &SlaveId) -> bool {
        let mut state = self.state.lock();

        match state.tokens.get(id).copied() {
            Some(endpoint) => {
                state.seen.insert(endpoint);
                true
            }
            None => false,
        }
    }

    /// Replaces the registered set with `registered ∩ seen`, resets `seen`
    /// and returns the evicted slaves.
    pub fn sweep(&self) -> Vec<SlaveRecord> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let silent: Vec<SlaveEndpoint> = state
            .registered
            .keys()
            .filter(|endpoint| !state.seen.contains(endpoint))
            .copied()
            .collect();

        let mut evicted = Vec::with_capacity(silent.len());
        for endpoint in silent {
            if let Some(record) = state.registered.remove(&endpoint) {
                state.tokens.remove(&record.id);
                evicted.push(record);
            }
        }

        state.seen.clear();
        evicted
    }

    /// Fixed-order snapshot of the live slaves, taken under one lock.
    pub fn live_snapshot(&self) -> Vec<SlaveEndpoint> {
        let state = self.state.lock();
        let mut endpoints: Vec<SlaveEndpoint> = state.registered.keys().copied().collect();
        endpoints.sort();
        endpoints
    }

    pub fn get(&self, endpoint: &SlaveEndpoint) -> Option<SlaveRecord> {
        self.state.lock().registered.get(endpoint).cloned()
    }

    pub fn records(&self) -> Vec<SlaveRecord> {
        let state = self.state.lock();
        let mut records: Vec<SlaveRecord> = state.registered.values().cloned().collect();
        records.sort_by_key(|record| record.endpoint);
        records
    }

    pub fn is_live(&self, endpoint: &SlaveEndpoint) -> bool {
        self.state.lock().registered.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.state.lock().registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
