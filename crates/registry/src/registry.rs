//! Match registry

use common::MatchAddress;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::match_state::{LifecycleState, Match};
use crate::retired::RetiredSet;

/// Number of tracked matches per lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleCounts {
    pub active: usize,
    pub settlement_pending: usize,
    pub concluded: usize,
}

impl LifecycleCounts {
    pub fn total(&self) -> usize {
        self.active + self.settlement_pending + self.concluded
    }
}

/// Tracked matches keyed by address
///
/// The outer lock guards membership; every match has its own mutex so that
/// updates to different addresses do not contend. Lock order is always
/// `matches` then `retired`.
pub struct MatchRegistry {
    matches: RwLock<HashMap<MatchAddress, Mutex<Match>>>,
    retired: Mutex<RetiredSet>,
}

impl MatchRegistry {
    /// Create an empty registry remembering up to `retired_capacity` evicted addresses
    pub fn new(retired_capacity: usize) -> Self {
        Self {
            matches: RwLock::new(HashMap::new()),
            retired: Mutex::new(RetiredSet::new(retired_capacity)),
        }
    }

    /// Track a match
    ///
    /// Returns `false` without changing anything if the address is already
    /// tracked or has been retired.
    pub fn insert(&self, m: Match) -> bool {
        let mut matches = self.matches.write();
        if matches.contains_key(&m.address) {
            return false;
        }
        if self.retired.lock().contains(&m.address) {
            debug!(address = %m.address, "Ignoring retired match");
            return false;
        }
        matches.insert(m.address.clone(), Mutex::new(m));
        true
    }

    /// Point-in-time copy of every tracked match, ordered by address
    pub fn snapshot_all(&self) -> Vec<Match> {
        let matches = self.matches.read();
        let mut snapshot: Vec<Match> = matches.values().map(|m| m.lock().clone()).collect();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));
        snapshot
    }

    /// Apply `mutator` to one match under its lock
    pub fn update<F, R>(&self, address: &MatchAddress, mutator: F) -> RegistryResult<R>
    where
        F: FnOnce(&mut Match) -> R,
    {
        let matches = self.matches.read();
        let entry = matches
            .get(address)
            .ok_or_else(|| RegistryError::NotFound(address.clone()))?;
        let mut m = entry.lock();
        Ok(mutator(&mut m))
    }

    /// Stop tracking a match and retire its address
    ///
    /// Idempotent; returns whether the match was tracked.
    pub fn evict(&self, address: &MatchAddress) -> bool {
        let mut matches = self.matches.write();
        let removed = matches.remove(address).is_some();
        self.retired.lock().retire(address.clone());
        removed
    }

    /// Retire an address that was never tracked
    pub fn retire(&self, address: &MatchAddress) {
        let _matches = self.matches.write();
        self.retired.lock().retire(address.clone());
    }

    pub fn is_retired(&self, address: &MatchAddress) -> bool {
        self.retired.lock().contains(address)
    }

    pub fn get(&self, address: &MatchAddress) -> Option<Match> {
        self.matches.read().get(address).map(|m| m.lock().clone())
    }

    pub fn contains(&self, address: &MatchAddress) -> bool {
        self.matches.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.matches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.read().is_empty()
    }

    pub fn counts(&self) -> LifecycleCounts {
        let matches = self.matches.read();
        let mut counts = LifecycleCounts::default();
        for m in matches.values() {
            match m.lock().lifecycle_state {
                LifecycleState::Active => counts.active += 1,
                LifecycleState::SettlementPending => counts.settlement_pending += 1,
                LifecycleState::Concluded => counts.concluded += 1,
            }
        }
        counts
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new(10_000)
    }
}
