//! Mixer backend contract
//!
//! The sync engine never talks to sound hardware directly. Everything it needs
//! goes through [`AudioBackend`]: enumerate devices and controls, read and
//! write volume and mute. Controls carry an explicit structured identity so a
//! volume control and its mute switch are paired by base name, not by editing
//! one control's name into the other's.

pub mod default_device;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use default_device::{configured_default_device, resolve_default_device};
pub use simulated::SimulatedMixer;

/// Sound card index
pub type DeviceId = u32;

/// A sound card as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
}

/// What a control adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Per-channel level, reported in percent
    Volume,
    /// On/off switch; "off" means muted
    Switch,
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlKind::Volume => write!(f, "volume"),
            ControlKind::Switch => write!(f, "switch"),
        }
    }
}

/// Signal direction of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Playback,
    Capture,
}

/// One mixer control as enumerated by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    /// Full control name (e.g. "Master Playback Volume")
    pub name: String,
    /// Name shared by a volume control and its switch (e.g. "Master")
    pub base_name: String,
    pub kind: ControlKind,
    pub direction: Direction,
    /// Number of channels
    pub channels: usize,
    /// Raw range reported by the driver
    pub min: i64,
    pub max: i64,
}

/// A volume control and its switch, correlated by base name
///
/// Either side may be missing: some controls are switch-only (e.g. "Auto-Mute
/// Mode") and some volumes have no switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPair {
    pub device: DeviceId,
    pub base_name: String,
    pub direction: Direction,
    /// Full name of the volume control, if any
    pub volume: Option<String>,
    /// Full name of the switch control, if any
    pub switch: Option<String>,
}

impl ControlPair {
    /// Key under which this pair appears in snapshots and events
    ///
    /// The volume control name when there is one, otherwise the switch name.
    pub fn key(&self) -> &str {
        self.volume
            .as_deref()
            .or(self.switch.as_deref())
            .unwrap_or(&self.base_name)
    }

    /// Whether `name` addresses this pair (base name or either full name)
    pub fn matches(&self, name: &str) -> bool {
        self.base_name == name
            || self.volume.as_deref() == Some(name)
            || self.switch.as_deref() == Some(name)
    }
}

/// Group a device's controls into volume/switch pairs
///
/// Pairs are keyed by (base name, direction) and returned in enumeration order
/// of their first member.
pub fn pair_controls(device: DeviceId, controls: &[ControlInfo]) -> Vec<ControlPair> {
    let mut pairs: Vec<ControlPair> = Vec::new();

    for control in controls {
        let existing = pairs
            .iter_mut()
            .find(|p| p.base_name == control.base_name && p.direction == control.direction);

        let pair = match existing {
            Some(pair) => pair,
            None => {
                pairs.push(ControlPair {
                    device,
                    base_name: control.base_name.clone(),
                    direction: control.direction,
                    volume: None,
                    switch: None,
                });
                let last = pairs.len() - 1;
                &mut pairs[last]
            }
        };

        match control.kind {
            ControlKind::Volume => pair.volume = Some(control.name.clone()),
            ControlKind::Switch => pair.switch = Some(control.name.clone()),
        }
    }

    pairs
}

/// Find the pair addressed by `name` among a device's controls
///
/// Exact full-name matches win over base-name matches, so "Mic Capture Volume"
/// never resolves to the playback "Mic" pair.
pub fn resolve_pair(device: DeviceId, controls: &[ControlInfo], name: &str) -> Option<ControlPair> {
    let pairs = pair_controls(device, controls);

    let exact = pairs
        .iter()
        .position(|p| p.volume.as_deref() == Some(name) || p.switch.as_deref() == Some(name));

    match exact {
        Some(idx) => pairs.into_iter().nth(idx),
        None => pairs.into_iter().find(|p| p.matches(name)),
    }
}

/// Errors reported by an [`AudioBackend`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The mixer cannot be reached at all (driver gone, not supported, ...)
    #[error("mixer backend unavailable: {0}")]
    Unavailable(String),

    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("control '{control}' not found on device {device}")]
    ControlNotFound { device: DeviceId, control: String },

    #[error("control '{control}' is not a {expected} control")]
    WrongKind {
        control: String,
        expected: ControlKind,
    },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("backend operation failed: {0}")]
    Failed(String),
}

impl BackendError {
    /// Whether the error means the whole backend is down
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Access to the sound hardware
///
/// Note: All methods take &self so backends can be shared as
/// `Arc<dyn AudioBackend>` between the poller and HTTP handlers.
/// Implementations use interior mutability.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Backend name for logs (e.g. "simulated", "alsa")
    fn name(&self) -> &str;

    /// Enumerate sound cards
    async fn list_devices(&self) -> Result<Vec<Device>, BackendError>;

    /// Enumerate the mixer controls of one card
    async fn list_controls(&self, device: DeviceId) -> Result<Vec<ControlInfo>, BackendError>;

    /// Read a volume control, one percentage per channel
    async fn get_volume(&self, device: DeviceId, control: &str) -> Result<Vec<u8>, BackendError>;

    /// Write a volume control
    ///
    /// A single value applies to every channel; several values apply to the
    /// corresponding channels.
    async fn set_volume(
        &self,
        device: DeviceId,
        control: &str,
        values: &[u8],
    ) -> Result<(), BackendError>;

    /// Read a switch control; `true` when every channel is off
    async fn get_mute(&self, device: DeviceId, control: &str) -> Result<bool, BackendError>;

    /// Write a switch control on every channel
    async fn set_mute(&self, device: DeviceId, control: &str, muted: bool)
        -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(name: &str, base: &str, kind: ControlKind, direction: Direction) -> ControlInfo {
        ControlInfo {
            name: name.to_string(),
            base_name: base.to_string(),
            kind,
            direction,
            channels: 2,
            min: 0,
            max: 87,
        }
    }

    fn sample_controls() -> Vec<ControlInfo> {
        vec![
            control("Master Playback Volume", "Master", ControlKind::Volume, Direction::Playback),
            control("Master Playback Switch", "Master", ControlKind::Switch, Direction::Playback),
            control("Mic Playback Volume", "Mic", ControlKind::Volume, Direction::Playback),
            control("Mic Capture Volume", "Mic", ControlKind::Volume, Direction::Capture),
            control("Mic Capture Switch", "Mic", ControlKind::Switch, Direction::Capture),
            control("Auto-Mute Mode", "Auto-Mute Mode", ControlKind::Switch, Direction::Playback),
        ]
    }

    #[test]
    fn test_pairing_by_base_name() {
        let pairs = pair_controls(0, &sample_controls());
        assert_eq!(pairs.len(), 4);

        let master = &pairs[0];
        assert_eq!(master.volume.as_deref(), Some("Master Playback Volume"));
        assert_eq!(master.switch.as_deref(), Some("Master Playback Switch"));
        assert_eq!(master.key(), "Master Playback Volume");

        // Playback and capture sides of "Mic" stay separate
        assert_eq!(pairs[1].switch, None);
        assert_eq!(pairs[2].switch.as_deref(), Some("Mic Capture Switch"));

        // Switch-only control is keyed by its own name
        assert_eq!(pairs[3].volume, None);
        assert_eq!(pairs[3].key(), "Auto-Mute Mode");
    }

    #[test]
    fn test_resolve_prefers_exact_name() {
        let controls = sample_controls();

        let pair = resolve_pair(0, &controls, "Mic Capture Volume").unwrap();
        assert_eq!(pair.direction, Direction::Capture);

        let pair = resolve_pair(0, &controls, "Mic").unwrap();
        assert_eq!(pair.direction, Direction::Playback);

        let pair = resolve_pair(0, &controls, "Master Playback Switch").unwrap();
        assert_eq!(pair.key(), "Master Playback Volume");

        assert!(resolve_pair(0, &controls, "Headphone").is_none());
    }
}
