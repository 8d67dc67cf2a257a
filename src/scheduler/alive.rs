//! # Device liveness tracker with sequence-based ordering.
//!
//! Knows which device tasks are currently running, so a forced abort after the
//! grace period can name the stuck ones.
//!
//! ## Rules
//! - `DeviceStarting` marks a device alive; `DeviceStopped` / `DeviceFailed` mark it dead
//! - events with `seq <= last_seq` for that device are rejected (stale)
//! - other events only advance `last_seq`

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::events::{Event, EventKind};

#[derive(Debug, Clone, Copy)]
struct DeviceState {
    last_seq: u64,
    alive: bool,
}

/// Thread-safe map of device label → alive.
#[derive(Debug, Default)]
pub struct AliveTracker {
    state: Mutex<HashMap<String, DeviceState>>,
}

impl AliveTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, DeviceState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `ev` if it is newer than the last event seen for its device.
    ///
    /// Returns `true` if the alive flag was written.
    pub fn update(&self, ev: &Event) -> bool {
        let Some(name) = ev.device.as_deref() else {
            return false;
        };
        let mut state = self.state();
        let entry = state.entry(name.to_string()).or_insert(DeviceState {
            last_seq: 0,
            alive: false,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        match ev.kind {
            EventKind::DeviceStarting => {
                entry.alive = true;
                true
            }
            EventKind::DeviceStopped | EventKind::DeviceFailed => {
                entry.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Sorted labels of devices still running.
    pub fn snapshot(&self) -> Vec<String> {
        let mut alive: Vec<String> = self
            .state()
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(name, _)| name.clone())
            .collect();
        alive.sort_unstable();
        alive
    }

    /// True if the device is running.
    pub fn is_alive(&self, name: &str) -> bool {
        self.state().get(name).is_some_and(|s| s.alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_events_are_rejected() {
        let tracker = AliveTracker::new();
        let start = Event::new(EventKind::DeviceStarting).with_device("pump");
        let stop = Event::new(EventKind::DeviceStopped).with_device("pump");

        assert!(tracker.update(&stop));
        assert!(!tracker.update(&start));
        assert!(!tracker.is_alive("pump"));
    }

    #[test]
    fn snapshot_lists_running_devices() {
        let tracker = AliveTracker::new();
        for name in ["b", "a", "c"] {
            tracker.update(&Event::new(EventKind::DeviceStarting).with_device(name));
        }
        tracker.update(&Event::new(EventKind::DeviceFailed).with_device("c"));
        assert_eq!(tracker.snapshot(), vec!["a", "b"]);
    }
}
