//! Bounded, time-expiring cache of resolved DEKs, keyed by fingerprint.
//!
//! Entries expire a fixed TTL after insertion and the least-recently-used
//! entry is evicted once capacity is exceeded. DEK rows are immutable, so a
//! cached entry is never stale in content; expiry only bounds how long key
//! material stays resident.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::key::DataKey;

#[derive(Debug)]
struct Entry {
    key: Arc<DataKey>,
    inserted_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    clock: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Thread-safe LRU cache of [`DataKey`]s with per-entry expiry.
#[derive(Debug)]
pub struct KeyCache {
    state: Mutex<State>,
    capacity: usize,
    ttl: Duration,
}

impl KeyCache {
    /// Create a cache holding at most `capacity` keys (minimum 1) for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Look up a key, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, fingerprint: &str) -> Option<Arc<DataKey>> {
        let mut state = self.state.lock();
        let now = state.tick();
        let expired = match state.entries.get_mut(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_used = now;
                return Some(Arc::clone(&entry.key));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(fingerprint);
        }
        None
    }

    /// Insert or replace a key, evicting expired and then least-recently-used
    /// entries to stay within capacity.
    pub fn insert(&self, key: Arc<DataKey>) {
        let mut state = self.state.lock();
        let now = state.tick();
        let ttl = self.ttl;
        state.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        state.entries.insert(
            key.fingerprint().to_owned(),
            Entry {
                key,
                inserted_at: Instant::now(),
                last_used: now,
            },
        );
        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(fp, _)| fp.clone());
            match oldest {
                Some(fp) => {
                    state.entries.remove(&fp);
                }
                None => break,
            }
        }
    }

    /// Number of resident entries, expired ones included until next touched.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
