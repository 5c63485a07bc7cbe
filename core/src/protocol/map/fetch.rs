/*
 * fetch.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Mapsync, a Bluetooth message access backend for mail clients.
 *
 * Mapsync is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Mapsync is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Mapsync.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Fetch de-duplication: at most one fetch per key is in flight. Callers that ask for a key
//! while it is being fetched wait for that fetch and receive the same outcome.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::store::StoreError;

/// Shared result slot for one in-flight fetch.
struct Slot<V> {
    outcome: Mutex<Option<Result<V, StoreError>>>,
    ready: Condvar,
}

impl<V: Clone> Slot<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, outcome: Result<V, StoreError>) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(outcome);
        drop(slot);
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<V, StoreError> {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Map from key to the in-flight fetch for that key.
pub struct FetchDeduplicator<K, V> {
    in_flight: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> Default for FetchDeduplicator<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> FetchDeduplicator<K, V> {
    fn map(&self) -> MutexGuard<'_, HashMap<K, Arc<Slot<V>>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Publishes an error if the owner unwinds before publishing, so waiters are never stranded.
struct OwnerGuard<'a, K: Eq + Hash, V: Clone> {
    dedup: &'a FetchDeduplicator<K, V>,
    key: &'a K,
    slot: &'a Slot<V>,
    done: bool,
}

impl<K: Eq + Hash, V: Clone> OwnerGuard<'_, K, V> {
    fn finish(mut self, outcome: Result<V, StoreError>) {
        self.dedup.map().remove(self.key);
        self.slot.publish(outcome);
        self.done = true;
    }
}

impl<K: Eq + Hash, V: Clone> Drop for OwnerGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.done {
            self.dedup.map().remove(self.key);
            self.slot.publish(Err(StoreError::new("fetch abandoned")));
        }
    }
}

impl<K, V> FetchDeduplicator<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a fetch for `key` is running.
    pub fn in_flight(&self, key: &K) -> bool {
        self.map().contains_key(key)
    }

    /// Run `fetch_fn` for `key` unless a fetch for it is already running, in which case wait
    /// for that one. The entry is removed before the outcome is published, so a failure does
    /// not stick: the next call after it starts a new fetch.
    pub fn fetch<F>(&self, key: &K, fetch_fn: F) -> Result<V, StoreError>
    where
        F: FnOnce() -> Result<V, StoreError>,
    {
        let (slot, owner) = {
            let mut map = self.map();
            match map.get(key) {
                Some(slot) => (slot.clone(), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    map.insert(key.clone(), slot.clone());
                    (slot, true)
                }
            }
        };
        if !owner {
            debug!("waiting for in-flight fetch of {:?}", key);
            return slot.wait();
        }
        let guard = OwnerGuard {
            dedup: self,
            key,
            slot: &slot,
            done: false,
        };
        let outcome = fetch_fn();
        guard.finish(outcome.clone());
        outcome
    }
}
