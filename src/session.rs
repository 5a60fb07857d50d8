use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::analysis::Analysis;
use crate::models::ResultSet;

/// What the agent remembers about a session's previous turn.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub last_query: String,
    pub last_result: ResultSet,
    pub last_analysis: Analysis,
}

struct Entry {
    snapshot: SessionSnapshot,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, Entry>,
    /// Access tick → session id; the first key is the least recently touched session.
    by_tick: BTreeMap<u64, String>,
    clock: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, session_id: &str) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(session_id) {
            self.by_tick.remove(&entry.tick);
            entry.tick = tick;
            self.by_tick.insert(tick, session_id.to_string());
        }
    }
}

/// Bounded least-recently-used store of per-session snapshots.
pub struct SessionMemory {
    capacity: usize,
    state: Mutex<LruState>,
}

impl SessionMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn record(&self, session_id: &str, snapshot: SessionSnapshot) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("session memory lock poisoned"))?;

        if let Some(entry) = state.entries.get_mut(session_id) {
            entry.snapshot = snapshot;
            state.touch(session_id);
            return Ok(());
        }

        while state.entries.len() >= self.capacity {
            let Some((_, evicted)) = state.by_tick.pop_first() else {
                break;
            };
            state.entries.remove(&evicted);
            debug!(session_id = %evicted, "evicted session snapshot");
        }

        let tick = state.next_tick();
        state.by_tick.insert(tick, session_id.to_string());
        state
            .entries
            .insert(session_id.to_string(), Entry { snapshot, tick });
        Ok(())
    }

    /// Returns the snapshot and marks the session as recently used.
    pub fn get(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        let mut state = self.state.lock().map_err(|_| anyhow!("session memory lock poisoned"))?;
        let snapshot = state
            .entries
            .get(session_id)
            .map(|entry| entry.snapshot.clone());
        if snapshot.is_some() {
            state.touch(session_id);
        }
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
