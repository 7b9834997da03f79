//! In-process mixer used when no sound hardware binding is available
//!
//! Behaves like a small ALSA card set: volumes are stored per channel, writes
//! with a single value fan out to every channel, switches are on/off. Tests
//! use it to drive "out-of-band" changes (calling the setters directly, as
//! another program would) and to simulate a backend outage.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{AudioBackend, BackendError, ControlInfo, ControlKind, Device, DeviceId, Direction};

struct SimControl {
    info: ControlInfo,
    /// Percent per channel (volume controls)
    levels: Vec<u8>,
    /// Switch state (switch controls)
    muted: bool,
}

struct SimDevice {
    name: String,
    controls: Vec<SimControl>,
}

/// Simulated sound cards
pub struct SimulatedMixer {
    devices: RwLock<BTreeMap<DeviceId, SimDevice>>,
    available: AtomicBool,
    writes: AtomicU64,
    /// Controls whose reads fail while writes still succeed
    unreadable: RwLock<HashSet<(DeviceId, String)>>,
}

impl SimulatedMixer {
    /// Create an empty mixer with no devices
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
            unreadable: RwLock::new(HashSet::new()),
        }
    }

    /// A typical onboard card plus a USB headset
    pub fn demo() -> Self {
        let mixer = Self::new();

        mixer.add_device(0, "HDA Intel PCH");
        mixer.add_volume(0, "Master", Direction::Playback, 2, 74);
        mixer.add_switch(0, "Master", Direction::Playback, false);
        mixer.add_volume(0, "Headphone", Direction::Playback, 2, 100);
        mixer.add_switch(0, "Headphone", Direction::Playback, true);
        mixer.add_volume(0, "Speaker", Direction::Playback, 2, 100);
        mixer.add_switch(0, "Speaker", Direction::Playback, false);
        mixer.add_volume(0, "PCM", Direction::Playback, 2, 100);
        mixer.add_volume(0, "Capture", Direction::Capture, 2, 40);
        mixer.add_switch(0, "Capture", Direction::Capture, false);
        mixer.add_switch(0, "Auto-Mute Mode", Direction::Playback, false);

        mixer.add_device(1, "USB Headset");
        mixer.add_volume(1, "Speaker", Direction::Playback, 2, 60);
        mixer.add_switch(1, "Speaker", Direction::Playback, false);
        mixer.add_volume(1, "Mic", Direction::Capture, 1, 50);
        mixer.add_switch(1, "Mic", Direction::Capture, false);

        mixer
    }

    /// Add (or rename) a card
    pub fn add_device(&self, id: DeviceId, name: &str) {
        let mut devices = self.devices.write();
        devices
            .entry(id)
            .and_modify(|d| d.name = name.to_string())
            .or_insert_with(|| SimDevice {
                name: name.to_string(),
                controls: Vec::new(),
            });
    }

    /// Remove a card, as if it was unplugged
    pub fn remove_device(&self, id: DeviceId) -> bool {
        self.devices.write().remove(&id).is_some()
    }

    /// Add a volume control named "{base} {Playback|Capture} Volume"
    pub fn add_volume(&self, device: DeviceId, base: &str, direction: Direction, channels: usize, level: u8) {
        let info = ControlInfo {
            name: control_name(base, direction, ControlKind::Volume),
            base_name: base.to_string(),
            kind: ControlKind::Volume,
            direction,
            channels: channels.max(1),
            min: 0,
            max: 87,
        };
        self.insert_control(device, info, vec![level.min(100); channels.max(1)], false);
    }

    /// Add a switch control
    ///
    /// Switches named after a volume get the matching "... Switch" name;
    /// a bare base name with no volume sibling keeps its own name.
    pub fn add_switch(&self, device: DeviceId, base: &str, direction: Direction, muted: bool) {
        let has_volume = self
            .devices
            .read()
            .get(&device)
            .map(|d| {
                d.controls.iter().any(|c| {
                    c.info.base_name == base
                        && c.info.direction == direction
                        && c.info.kind == ControlKind::Volume
                })
            })
            .unwrap_or(false);

        let name = if has_volume {
            control_name(base, direction, ControlKind::Switch)
        } else {
            base.to_string()
        };

        let info = ControlInfo {
            name,
            base_name: base.to_string(),
            kind: ControlKind::Switch,
            direction,
            channels: 2,
            min: 0,
            max: 1,
        };
        self.insert_control(device, info, Vec::new(), muted);
    }

    /// Remove a control by full name
    pub fn remove_control(&self, device: DeviceId, name: &str) -> bool {
        let mut devices = self.devices.write();
        match devices.get_mut(&device) {
            Some(d) => {
                let before = d.controls.len();
                d.controls.retain(|c| c.info.name != name);
                d.controls.len() != before
            }
            None => false,
        }
    }

    /// Toggle total backend availability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make reads of one control fail (a flaky driver), leaving writes alone
    pub fn set_read_failure(&self, device: DeviceId, control: &str, failing: bool) {
        let key = (device, control.to_string());
        if failing {
            self.unreadable.write().insert(key);
        } else {
            self.unreadable.write().remove(&key);
        }
    }

    /// Number of successful writes (volume or mute)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn insert_control(&self, device: DeviceId, info: ControlInfo, levels: Vec<u8>, muted: bool) {
        let mut devices = self.devices.write();
        let dev = devices.entry(device).or_insert_with(|| SimDevice {
            name: format!("card{}", device),
            controls: Vec::new(),
        });
        dev.controls.retain(|c| c.info.name != info.name);
        dev.controls.push(SimControl { info, levels, muted });
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("simulated outage".to_string()))
        }
    }

    fn check_readable(&self, device: DeviceId, control: &str) -> Result<(), BackendError> {
        if self.unreadable.read().contains(&(device, control.to_string())) {
            Err(BackendError::Failed(format!("cannot read {}", control)))
        } else {
            Ok(())
        }
    }

    fn with_control<T>(
        &self,
        device: DeviceId,
        control: &str,
        f: impl FnOnce(&mut SimControl) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        self.check_available()?;
        let mut devices = self.devices.write();
        let dev = devices
            .get_mut(&device)
            .ok_or(BackendError::DeviceNotFound(device))?;
        let ctl = dev
            .controls
            .iter_mut()
            .find(|c| c.info.name == control)
            .ok_or_else(|| BackendError::ControlNotFound {
                device,
                control: control.to_string(),
            })?;
        f(ctl)
    }
}

impl Default for SimulatedMixer {
    fn default() -> Self {
        Self::new()
    }
}

fn control_name(base: &str, direction: Direction, kind: ControlKind) -> String {
    let dir = match direction {
        Direction::Playback => "Playback",
        Direction::Capture => "Capture",
    };
    let suffix = match kind {
        ControlKind::Volume => "Volume",
        ControlKind::Switch => "Switch",
    };
    if base == dir {
        format!("{} {}", base, suffix)
    } else {
        format!("{} {} {}", base, dir, suffix)
    }
}

#[async_trait]
impl AudioBackend for SimulatedMixer {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn list_devices(&self) -> Result<Vec<Device>, BackendError> {
        self.check_available()?;
        let devices = self.devices.read();
        if devices.is_empty() {
            return Err(BackendError::Unavailable("no sound cards found".to_string()));
        }
        Ok(devices
            .iter()
            .map(|(id, d)| Device {
                id: *id,
                name: d.name.clone(),
            })
            .collect())
    }

    async fn list_controls(&self, device: DeviceId) -> Result<Vec<ControlInfo>, BackendError> {
        self.check_available()?;
        let devices = self.devices.read();
        let dev = devices.get(&device).ok_or(BackendError::DeviceNotFound(device))?;
        Ok(dev.controls.iter().map(|c| c.info.clone()).collect())
    }

    async fn get_volume(&self, device: DeviceId, control: &str) -> Result<Vec<u8>, BackendError> {
        self.check_readable(device, control)?;
        self.with_control(device, control, |c| match c.info.kind {
            ControlKind::Volume => Ok(c.levels.clone()),
            ControlKind::Switch => Err(BackendError::WrongKind {
                control: c.info.name.clone(),
                expected: ControlKind::Volume,
            }),
        })
    }

    async fn set_volume(&self, device: DeviceId, control: &str, values: &[u8]) -> Result<(), BackendError> {
        if values.is_empty() {
            return Err(BackendError::InvalidValue("no volume values provided".to_string()));
        }
        if let Some(v) = values.iter().find(|v| **v > 100) {
            return Err(BackendError::InvalidValue(format!("volume {} out of range 0-100", v)));
        }

        self.with_control(device, control, |c| {
            if c.info.kind != ControlKind::Volume {
                return Err(BackendError::WrongKind {
                    control: c.info.name.clone(),
                    expected: ControlKind::Volume,
                });
            }
            if values.len() == 1 {
                c.levels.iter_mut().for_each(|l| *l = values[0]);
            } else {
                for (level, value) in c.levels.iter_mut().zip(values) {
                    *level = *value;
                }
            }
            Ok(())
        })?;

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_mute(&self, device: DeviceId, control: &str) -> Result<bool, BackendError> {
        self.check_readable(device, control)?;
        self.with_control(device, control, |c| match c.info.kind {
            ControlKind::Switch => Ok(c.muted),
            ControlKind::Volume => Err(BackendError::WrongKind {
                control: c.info.name.clone(),
                expected: ControlKind::Switch,
            }),
        })
    }

    async fn set_mute(&self, device: DeviceId, control: &str, muted: bool) -> Result<(), BackendError> {
        self.with_control(device, control, |c| match c.info.kind {
            ControlKind::Switch => {
                c.muted = muted;
                Ok(())
            }
            ControlKind::Volume => Err(BackendError::WrongKind {
                control: c.info.name.clone(),
                expected: ControlKind::Switch,
            }),
        })?;

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_value_applies_to_all_channels() {
        let mixer = SimulatedMixer::demo();
        mixer.set_volume(0, "Master Playback Volume", &[30]).await.unwrap();
        assert_eq!(mixer.get_volume(0, "Master Playback Volume").await.unwrap(), vec![30, 30]);

        mixer.set_volume(0, "Master Playback Volume", &[10, 20]).await.unwrap();
        assert_eq!(mixer.get_volume(0, "Master Playback Volume").await.unwrap(), vec![10, 20]);
        assert_eq!(mixer.write_count(), 2);
    }

    #[tokio::test]
    async fn test_switch_naming() {
        let mixer = SimulatedMixer::demo();
        let controls = mixer.list_controls(0).await.unwrap();
        let names: Vec<_> = controls.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Master Playback Switch"));
        assert!(names.contains(&"Auto-Mute Mode"));
        assert!(names.contains(&"Capture Volume"));
    }

    #[tokio::test]
    async fn test_wrong_kind_and_range() {
        let mixer = SimulatedMixer::demo();
        let err = mixer.get_mute(0, "Master Playback Volume").await.unwrap_err();
        assert!(matches!(err, BackendError::WrongKind { .. }));

        let err = mixer.set_volume(0, "Master Playback Volume", &[101]).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidValue(_)));

        let err = mixer.get_volume(7, "Master Playback Volume").await.unwrap_err();
        assert_eq!(err, BackendError::DeviceNotFound(7));
    }

    #[tokio::test]
    async fn test_read_failure_leaves_writes_working() {
        let mixer = SimulatedMixer::demo();
        mixer.set_read_failure(0, "Master Playback Volume", true);
        assert!(mixer.get_volume(0, "Master Playback Volume").await.is_err());
        mixer.set_volume(0, "Master Playback Volume", &[12]).await.unwrap();
        assert!(!mixer.get_mute(0, "Master Playback Switch").await.unwrap());

        mixer.set_read_failure(0, "Master Playback Volume", false);
        assert_eq!(mixer.get_volume(0, "Master Playback Volume").await.unwrap(), vec![12, 12]);
    }

    #[tokio::test]
    async fn test_outage() {
        let mixer = SimulatedMixer::demo();
        mixer.set_available(false);
        assert!(mixer.list_devices().await.unwrap_err().is_unavailable());
        assert!(mixer.set_mute(0, "Master Playback Switch", true).await.is_err());

        mixer.set_available(true);
        assert_eq!(mixer.list_devices().await.unwrap().len(), 2);
    }
}
