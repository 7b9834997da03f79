//! Snapshot differencing
//!
//! A [`Delta`] holds what changed between two snapshots: controls that are
//! new or differ, plus devices/controls that disappeared. Everything in
//! `changed` is taken verbatim from the current snapshot.

use serde::{Deserialize, Serialize};

use super::snapshot::Snapshot;
use crate::mixer::DeviceId;

/// A device or control that was present before and is gone now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    pub device: DeviceId,
    /// `None` when the whole device vanished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
}

impl Removal {
    pub fn device(device: DeviceId) -> Self {
        Self { device, control: None }
    }

    pub fn control(device: DeviceId, control: impl Into<String>) -> Self {
        Self {
            device,
            control: Some(control.into()),
        }
    }
}

/// Changes between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// New or modified controls, shaped like a snapshot
    pub changed: Snapshot,
    /// Disappeared devices/controls
    pub removed: Vec<Removal>,
}

impl Delta {
    /// No change: nothing to broadcast
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Compute what changed from `previous` to `current`
    ///
    /// With no previous observation the whole current snapshot is the delta.
    pub fn compute(previous: Option<&Snapshot>, current: &Snapshot) -> Delta {
        let previous = match previous {
            Some(prev) => prev,
            None => {
                return Delta {
                    changed: current.clone(),
                    removed: Vec::new(),
                }
            }
        };

        let mut delta = Delta::default();

        for (device, controls) in &current.devices {
            let prev_controls = match previous.devices.get(device) {
                Some(prev) => prev,
                None => {
                    // New device: include wholesale
                    delta.changed.devices.insert(*device, controls.clone());
                    continue;
                }
            };

            for (name, state) in controls {
                if prev_controls.get(name) != Some(state) {
                    delta.changed.insert(*device, name.clone(), state.clone());
                }
            }

            for name in prev_controls.keys() {
                if !controls.contains_key(name) {
                    delta.removed.push(Removal::control(*device, name.clone()));
                }
            }
        }

        for device in previous.devices.keys() {
            if !current.devices.contains_key(device) {
                delta.removed.push(Removal::device(*device));
            }
        }

        delta
    }
}
