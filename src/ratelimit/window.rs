//! Sliding-window records and the pure operations over them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Recorded activity for one identifier within one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindowEntry {
    /// Millisecond timestamps of allowed events, oldest first
    #[serde(default)]
    pub timestamps: Vec<u64>,
    /// Millisecond timestamp of the last write to this entry
    #[serde(default)]
    pub last_updated: u64,
}

/// Every identifier's entry for one namespace, persisted as one document.
pub type RateLimitStore = BTreeMap<String, RateWindowEntry>;

/// Start of the window ending at `now`. Timestamps strictly after this are
/// still counted.
pub fn window_start(now: u64, window_ms: u64) -> u64 {
    now.saturating_sub(window_ms)
}

/// The timestamps still inside the window.
pub fn valid_timestamps(timestamps: &[u64], window_start: u64) -> Vec<u64> {
    timestamps
        .iter()
        .copied()
        .filter(|&t| t > window_start)
        .collect()
}

/// Quota left given the number of valid events.
pub fn remaining(max_requests: u64, valid_count: usize) -> u64 {
    max_requests.saturating_sub(valid_count as u64)
}

/// Milliseconds until the oldest valid event leaves the window.
pub fn reset_time(oldest_valid: Option<u64>, window_ms: u64, now: u64) -> u64 {
    oldest_valid
        .map(|oldest| oldest.saturating_add(window_ms).saturating_sub(now))
        .unwrap_or(0)
}

impl RateWindowEntry {
    pub fn new(timestamps: Vec<u64>, last_updated: u64) -> Self {
        Self {
            timestamps,
            last_updated,
        }
    }

    pub fn valid(&self, window_start: u64) -> Vec<u64> {
        valid_timestamps(&self.timestamps, window_start)
    }

    pub fn valid_count(&self, window_start: u64) -> usize {
        self.timestamps.iter().filter(|&&t| t > window_start).count()
    }

    pub fn oldest_valid(&self, window_start: u64) -> Option<u64> {
        self.timestamps.iter().copied().filter(|&t| t > window_start).min()
    }
}

/// Drop expired timestamps from every entry.
///
/// Entries left empty are removed; entries that shrank are rewritten with
/// `last_updated = now`. Returns `(removed, rewritten)`.
pub fn prune_store(store: &mut RateLimitStore, window_start: u64, now: u64) -> (usize, usize) {
    let mut removed = 0;
    let mut rewritten = 0;

    store.retain(|_, entry| {
        let valid = entry.valid(window_start);
        if valid.is_empty() {
            removed += 1;
            return false;
        }
        if valid.len() != entry.timestamps.len() {
            entry.timestamps = valid;
            entry.last_updated = now;
            rewritten += 1;
        }
        true
    });

    (removed, rewritten)
}

/// Evict least recently updated identifiers until at most `max_identifiers`
/// remain. `keep` is the identifier just written and is never evicted. Ties
/// on `last_updated` go by identifier order. Returns the evicted identifiers.
pub fn enforce_capacity(
    store: &mut RateLimitStore,
    max_identifiers: usize,
    keep: &str,
) -> Vec<String> {
    if store.len() <= max_identifiers {
        return Vec::new();
    }

    let mut by_age: Vec<(u64, String)> = store
        .iter()
        .filter(|(id, _)| id.as_str() != keep)
        .map(|(id, entry)| (entry.last_updated, id.clone()))
        .collect();
    by_age.sort();

    let excess = store.len() - max_identifiers;
    by_age
        .into_iter()
        .take(excess)
        .map(|(_, id)| {
            store.remove(&id);
            id
        })
        .collect()
}
