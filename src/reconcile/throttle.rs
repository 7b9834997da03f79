//! Per-control write throttling during a drag

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::ControlKey;

/// Default minimum spacing between writes for one control
pub const DEFAULT_WRITE_THROTTLE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct WriteThrottle {
    min_spacing: Duration,
    last_sent: HashMap<ControlKey, Instant>,
}

impl WriteThrottle {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_sent: HashMap::new(),
        }
    }

    /// Returns true (and records the send) when a write may go out now
    pub fn allow(&mut self, key: &ControlKey, now: Instant) -> bool {
        match self.last_sent.get(key) {
            Some(last) if now.saturating_duration_since(*last) < self.min_spacing => false,
            _ => {
                self.last_sent.insert(key.clone(), now);
                true
            }
        }
    }

    /// Forget a control, e.g. after its final write
    pub fn reset(&mut self, key: &ControlKey) {
        self.last_sent.remove(key);
    }
}

impl Default for WriteThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing() {
        let mut throttle = WriteThrottle::new(Duration::from_millis(100));
        let key = ControlKey::new(0, "Master Playback Volume");
        let t0 = Instant::now();

        assert!(throttle.allow(&key, t0));
        assert!(!throttle.allow(&key, t0 + Duration::from_millis(40)));
        assert!(!throttle.allow(&key, t0 + Duration::from_millis(99)));
        assert!(throttle.allow(&key, t0 + Duration::from_millis(100)));

        // Other controls are not affected
        let other = ControlKey::new(1, "Mic Capture Volume");
        assert!(throttle.allow(&other, t0 + Duration::from_millis(101)));

        throttle.reset(&key);
        assert!(throttle.allow(&key, t0 + Duration::from_millis(101)));
    }
}
