//! Per-control interaction state
//!
//! `Idle -> Dragging -> Cooldown{until} -> Idle`. Expiry is evaluated lazily
//! against the `now` passed in, so the tracker needs no timers and tests can
//! drive the clock directly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::ControlKey;
use crate::sse::EventSource;

/// Default window after release during which hardware echoes are ignored
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Idle,
    Dragging,
    Cooldown { until: Instant },
}

/// Whether an incoming entry may replace the rendered value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    SuppressDragging,
    SuppressCooldown,
}

impl Verdict {
    pub fn is_apply(self) -> bool {
        self == Verdict::Apply
    }
}

#[derive(Debug)]
pub struct InteractionTracker {
    cooldown: Duration,
    states: HashMap<ControlKey, Interaction>,
}

impl InteractionTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            states: HashMap::new(),
        }
    }

    /// Current state, with an expired cooldown reported as idle
    pub fn state(&self, key: &ControlKey, now: Instant) -> Interaction {
        match self.states.get(key) {
            Some(Interaction::Cooldown { until }) if now >= *until => Interaction::Idle,
            Some(state) => *state,
            None => Interaction::Idle,
        }
    }

    pub fn is_dragging(&self, key: &ControlKey) -> bool {
        matches!(self.states.get(key), Some(Interaction::Dragging))
    }

    /// Interaction started (pointer down, key repeat); supersedes a cooldown
    pub fn begin(&mut self, key: &ControlKey) {
        self.states.insert(key.clone(), Interaction::Dragging);
    }

    /// Interaction ended; the cooldown window starts now
    pub fn end(&mut self, key: &ControlKey, now: Instant) {
        let until = now + self.cooldown;
        self.states.insert(key.clone(), Interaction::Cooldown { until });
    }

    /// Start a cooldown without a drag (discrete actions such as a toggle)
    ///
    /// Never shortens an ongoing drag.
    pub fn cooldown_from(&mut self, key: &ControlKey, now: Instant) {
        let until = now + self.cooldown;
        match self.states.get_mut(key) {
            Some(Interaction::Dragging) => {}
            Some(Interaction::Cooldown { until: current }) => {
                *current = (*current).max(until);
            }
            _ => {
                self.states.insert(key.clone(), Interaction::Cooldown { until });
            }
        }
    }

    /// Decide for one incoming entry
    pub fn admits(&mut self, key: &ControlKey, source: EventSource, now: Instant) -> Verdict {
        match self.state(key, now) {
            Interaction::Dragging => Verdict::SuppressDragging,
            Interaction::Cooldown { .. } if source == EventSource::Monitor => {
                Verdict::SuppressCooldown
            }
            Interaction::Cooldown { .. } => Verdict::Apply,
            Interaction::Idle => {
                // Drop expired records so the map does not grow unbounded
                if matches!(self.states.get(key), Some(Interaction::Cooldown { .. })) {
                    self.states.remove(key);
                }
                Verdict::Apply
            }
        }
    }
}

impl Default for InteractionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ControlKey {
        ControlKey::new(0, "Master Playback Volume")
    }

    #[test]
    fn test_idle_applies_everything() {
        let mut tracker = InteractionTracker::default();
        let now = Instant::now();
        assert_eq!(tracker.admits(&key(), EventSource::Monitor, now), Verdict::Apply);
        assert_eq!(tracker.admits(&key(), EventSource::Handler, now), Verdict::Apply);
    }

    #[test]
    fn test_dragging_suppresses_both_sources() {
        let mut tracker = InteractionTracker::default();
        let now = Instant::now();
        tracker.begin(&key());

        assert_eq!(
            tracker.admits(&key(), EventSource::Monitor, now),
            Verdict::SuppressDragging
        );
        assert_eq!(
            tracker.admits(&key(), EventSource::Handler, now + Duration::from_secs(60)),
            Verdict::SuppressDragging
        );
    }

    #[test]
    fn test_cooldown_is_asymmetric() {
        let mut tracker = InteractionTracker::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        tracker.begin(&key());
        tracker.end(&key(), t0);

        let t1 = t0 + Duration::from_millis(500);
        assert_eq!(tracker.admits(&key(), EventSource::Monitor, t1), Verdict::SuppressCooldown);
        assert_eq!(tracker.admits(&key(), EventSource::Handler, t1), Verdict::Apply);

        let t2 = t0 + Duration::from_millis(1000);
        assert_eq!(tracker.state(&key(), t2), Interaction::Idle);
        assert_eq!(tracker.admits(&key(), EventSource::Monitor, t2), Verdict::Apply);
    }

    #[test]
    fn test_release_leaves_dragging() {
        let mut tracker = InteractionTracker::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        tracker.begin(&key());
        tracker.end(&key(), t0);

        assert!(!tracker.is_dragging(&key()));
        assert_eq!(
            tracker.state(&key(), t0),
            Interaction::Cooldown {
                until: t0 + Duration::from_millis(1000)
            }
        );
        assert_eq!(
            tracker.admits(&key(), EventSource::Handler, t0 + Duration::from_millis(300)),
            Verdict::Apply
        );
        assert_eq!(tracker.state(&key(), t0 + Duration::from_secs(3600)), Interaction::Idle);
    }

    #[test]
    fn test_new_drag_supersedes_cooldown() {
        let mut tracker = InteractionTracker::default();
        let t0 = Instant::now();
        tracker.end(&key(), t0);
        tracker.begin(&key());
        assert_eq!(tracker.state(&key(), t0), Interaction::Dragging);
    }

    #[test]
    fn test_cooldown_never_shortened() {
        let mut tracker = InteractionTracker::new(Duration::from_millis(100));
        let t0 = Instant::now();
        tracker.cooldown_from(&key(), t0 + Duration::from_millis(50));
        tracker.cooldown_from(&key(), t0);
        assert_eq!(
            tracker.state(&key(), t0),
            Interaction::Cooldown {
                until: t0 + Duration::from_millis(150)
            }
        );

        // A toggle during a drag leaves the drag alone
        let other = ControlKey::new(1, "Mic Capture Volume");
        tracker.begin(&other);
        tracker.cooldown_from(&other, t0);
        assert!(tracker.is_dragging(&other));
    }

    #[test]
    fn test_controls_are_independent() {
        let mut tracker = InteractionTracker::default();
        let now = Instant::now();
        tracker.begin(&key());
        let other = ControlKey::new(0, "PCM Playback Volume");
        assert_eq!(tracker.admits(&other, EventSource::Monitor, now), Verdict::Apply);
    }
}
