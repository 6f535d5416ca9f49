//! Device-State Tracker (C4).
//!
//! Pure data structure: a mapping from device uid to the last-accepted `(timestamp, lat, lon)`.
//! Every operation here is a pure function of the map plus its arguments — no I/O, no locking of
//! its own (the owning [`crate::queue::QueueManager`] serializes access behind its per-destination
//! lock).

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Last-accepted state for one device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceState {
    pub last_time: DateTime<Utc>,
    pub last_lat: f64,
    pub last_lon: f64,
}

/// Per-destination map from device uid to its last-accepted state.
///
/// One of these per destination server, never shared: accepting an event for destination A
/// must not affect the admit decision for destination B.
#[derive(Default, Debug)]
pub struct DeviceStateTracker {
    states: HashMap<String, DeviceState>,
}

impl DeviceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff no entry for `uid` exists yet, or `t` is *strictly* newer than the
    /// stored timestamp; equal timestamps are rejected as duplicates.
    pub fn should_accept(&self, uid: &str, t: DateTime<Utc>) -> bool {
        match self.states.get(uid) {
            None => true,
            Some(state) => t > state.last_time,
        }
    }

    /// Records the accepted state for `uid`, overwriting any prior entry.
    pub fn record(&mut self, uid: &str, t: DateTime<Utc>, lat: f64, lon: f64) {
        self.states.insert(
            uid.to_string(),
            DeviceState {
                last_time: t,
                last_lat: lat,
                last_lon: lon,
            },
        );
    }

    /// Removes the recorded state for `uid`, if any. Used to revert a state update when
    /// `overflow_strategy == drop_newest` refuses the event it was recorded for.
    pub fn remove(&mut self, uid: &str) {
        self.states.remove(uid);
    }

    pub fn get(&self, uid: &str) -> Option<DeviceState> {
        self.states.get(uid).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns, and removes, all uids whose last-accepted timestamp is older than `horizon`
    /// relative to `now`. Each [`crate::queue::QueueManager`] calls this from its own periodic
    /// sweep task.
    pub fn evict_older_than(&mut self, now: DateTime<Utc>, horizon: chrono::Duration) -> Vec<String> {
        let cutoff = now - horizon;
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| state.last_time < cutoff)
            .map(|(uid, _)| uid.clone())
            .collect();
        for uid in &stale {
            self.states.remove(uid);
        }
        stale
    }

    /// Clears all state. Used on a hard reset triggered by a configuration change.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
