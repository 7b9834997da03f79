//! Default sound card selection
//!
//! Priority: `ALSA_CARD` env > `~/.asoundrc` > `/etc/asound.conf` > first
//! hardware-looking card.

use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Device, DeviceId};

/// System-wide ALSA configuration file
pub const SYSTEM_ASOUND_CONF: &str = "/etc/asound.conf";

/// ALSA configuration files that can change the default card
pub fn asound_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".asoundrc"));
    }
    paths.push(PathBuf::from(SYSTEM_ASOUND_CONF));
    paths
}

/// Card index configured through the environment or ALSA config files
pub fn configured_default_device() -> Option<DeviceId> {
    if let Ok(value) = std::env::var("ALSA_CARD") {
        if let Ok(card) = value.trim().parse::<DeviceId>() {
            debug!(card, "Default card from ALSA_CARD");
            return Some(card);
        }
    }

    asound_config_paths()
        .iter()
        .find_map(|path| read_asound_default(path))
}

fn read_asound_default(path: &Path) -> Option<DeviceId> {
    let contents = std::fs::read_to_string(path).ok()?;
    let card = parse_asound_default(&contents)?;
    debug!(card, path = %path.display(), "Default card from ALSA config");
    Some(card)
}

/// Extract `defaults.pcm.card N` / `defaults.ctl.card N` from ALSA config text
///
/// Named card references ("PCH") are not resolved.
pub fn parse_asound_default(contents: &str) -> Option<DeviceId> {
    contents.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        let key = words.next()?;
        if key != "defaults.pcm.card" && key != "defaults.ctl.card" {
            return None;
        }
        words.next()?.trim_matches('"').parse().ok()
    })
}

/// Pick the card to present by default
///
/// An explicit preference wins if that card exists. Otherwise the first card
/// that is not a loopback/null/dummy device, falling back to the first card.
pub fn resolve_default_device(devices: &[Device], preferred: Option<DeviceId>) -> Option<DeviceId> {
    if let Some(card) = preferred {
        if devices.iter().any(|d| d.id == card) {
            return Some(card);
        }
    }

    devices
        .iter()
        .find(|d| {
            let name = d.name.to_lowercase();
            !name.contains("loopback") && !name.contains("null") && !name.contains("dummy")
        })
        .or_else(|| devices.first())
        .map(|d| d.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<Device> {
        vec![
            Device { id: 0, name: "Loopback".to_string() },
            Device { id: 1, name: "HDA Intel PCH".to_string() },
            Device { id: 2, name: "USB Audio".to_string() },
        ]
    }

    #[test]
    fn test_parse_asound_default() {
        let conf = "# comment\npcm.!default { type hw }\n  defaults.pcm.card 2\ndefaults.ctl.card 3\n";
        assert_eq!(parse_asound_default(conf), Some(2));
        assert_eq!(parse_asound_default("defaults.ctl.card \"1\""), Some(1));
        assert_eq!(parse_asound_default("defaults.pcm.card PCH"), None);
        assert_eq!(parse_asound_default(""), None);
    }

    #[test]
    fn test_resolve_default_device() {
        assert_eq!(resolve_default_device(&devices(), Some(2)), Some(2));
        // Unknown preference falls back to heuristics
        assert_eq!(resolve_default_device(&devices(), Some(9)), Some(1));
        assert_eq!(resolve_default_device(&devices(), None), Some(1));

        let only_virtual = vec![Device { id: 4, name: "Dummy".to_string() }];
        assert_eq!(resolve_default_device(&only_virtual, None), Some(4));
        assert_eq!(resolve_default_device(&[], None), None);
    }
}
