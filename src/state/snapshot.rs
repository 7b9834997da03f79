//! Point-in-time mixer state
//!
//! A [`Snapshot`] is the tree device -> control -> {volume, mute} observed at
//! one instant. It is rebuilt from scratch every poll tick and never mutated
//! afterwards (the reconciler keeps its own mutable view, see
//! `reconcile::Reconciler`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::mixer::{pair_controls, AudioBackend, BackendError, ControlPair, DeviceId};

/// Observed state of one control pair
///
/// Wire keys are capitalised for compatibility with existing web clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    /// Percent per channel; empty for switch-only controls
    #[serde(rename = "Volume", default)]
    pub volume: Vec<u8>,
    #[serde(rename = "Mute", default)]
    pub mute: bool,
}

impl ControlState {
    pub fn new(volume: Vec<u8>, mute: bool) -> Self {
        Self { volume, mute }
    }
}

/// Control key -> state for one device
pub type DeviceState = BTreeMap<String, ControlState>;

/// Device -> control -> state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub devices: BTreeMap<DeviceId, DeviceState>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, device: DeviceId) -> Option<&DeviceState> {
        self.devices.get(&device)
    }

    pub fn control(&self, device: DeviceId, control: &str) -> Option<&ControlState> {
        self.devices.get(&device).and_then(|d| d.get(control))
    }

    /// Insert or replace one control
    pub fn insert(&mut self, device: DeviceId, control: impl Into<String>, state: ControlState) {
        self.devices
            .entry(device)
            .or_default()
            .insert(control.into(), state);
    }

    /// Total number of controls across all devices
    pub fn control_count(&self) -> usize {
        self.devices.values().map(|d| d.len()).sum()
    }

    /// Snapshot holding a single control, as published by the write path
    pub fn single(device: DeviceId, control: impl Into<String>, state: ControlState) -> Self {
        let mut snapshot = Self::new();
        snapshot.insert(device, control, state);
        snapshot
    }

    /// Observe the backend
    ///
    /// Fails only when devices cannot be enumerated. A device whose controls
    /// cannot be listed, or a control that cannot be read, keeps its state
    /// from `previous` (if any) so a transient read error is never mistaken
    /// for the hardware disappearing.
    pub async fn capture(
        backend: &dyn AudioBackend,
        previous: Option<&Snapshot>,
    ) -> Result<Snapshot, BackendError> {
        let devices = backend.list_devices().await?;
        let mut snapshot = Snapshot::new();

        for device in devices {
            let controls = match backend.list_controls(device.id).await {
                Ok(controls) => controls,
                Err(e) => {
                    warn!(device = device.id, "Failed to list controls: {}", e);
                    if let Some(prev) = previous.and_then(|p| p.device(device.id)) {
                        snapshot.devices.insert(device.id, prev.clone());
                    }
                    continue;
                }
            };

            let mut device_state = DeviceState::new();
            for pair in pair_controls(device.id, &controls) {
                let key = pair.key().to_string();
                match read_pair(backend, &pair).await {
                    Ok(state) => {
                        device_state.insert(key, state);
                    }
                    Err(e) => {
                        debug!(device = device.id, control = %key, "Failed to read control: {}", e);
                        if let Some(prev) = previous.and_then(|p| p.control(device.id, &key)) {
                            device_state.insert(key, prev.clone());
                        }
                    }
                }
            }

            snapshot.devices.insert(device.id, device_state);
        }

        Ok(snapshot)
    }
}

/// Read volume and mute for one pair
pub async fn read_pair(backend: &dyn AudioBackend, pair: &ControlPair) -> Result<ControlState, BackendError> {
    let volume = match &pair.volume {
        Some(name) => backend.get_volume(pair.device, name).await?,
        None => Vec::new(),
    };
    let mute = match &pair.switch {
        Some(name) => backend.get_mute(pair.device, name).await?,
        None => false,
    };
    Ok(ControlState { volume, mute })
}
