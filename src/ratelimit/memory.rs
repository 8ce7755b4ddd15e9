//! Process-local sliding windows used when the durable store is unreachable.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::window::valid_timestamps;

/// Per-identifier event timestamps kept in process memory.
///
/// Lost on restart and invisible to other processes. The lock is only held
/// for the duration of each call, never across an await point.
#[derive(Debug, Default)]
pub struct MemoryWindows {
    windows: Mutex<HashMap<String, Vec<u64>>>,
}

impl MemoryWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `identifier`'s window and record `now` if fewer than
    /// `max_requests` events remain. Returns whether the event was allowed.
    pub fn check_and_record(
        &self,
        identifier: &str,
        now: u64,
        window_start: u64,
        max_requests: u64,
    ) -> bool {
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(identifier.to_string()).or_default();
        timestamps.retain(|&t| t > window_start);

        if timestamps.len() as u64 >= max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }

    /// The valid timestamps for `identifier` without mutating anything.
    pub fn valid(&self, identifier: &str, window_start: u64) -> Vec<u64> {
        self.windows
            .lock()
            .get(identifier)
            .map(|ts| valid_timestamps(ts, window_start))
            .unwrap_or_default()
    }

    pub fn remove(&self, identifier: &str) -> bool {
        self.windows.lock().remove(identifier).is_some()
    }

    pub fn clear(&self) {
        self.windows.lock().clear();
    }

    /// Drop expired timestamps and identifiers left with none. Returns the
    /// number of identifiers removed.
    pub fn prune(&self, window_start: u64) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            timestamps.retain(|&t| t > window_start);
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }
}
