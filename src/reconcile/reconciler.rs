//! Reconciler - the rendered view of one web client
//!
//! Owns the values a user sees and merges three inputs into them:
//! - local interaction (drag, release, toggle), which updates the view
//!   immediately and yields [`WriteRequest`]s for the caller to send
//! - decoded event-stream frames, filtered per control by the
//!   [`InteractionTracker`]
//! - full state loads (initial page load or resync)

use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::interaction::{InteractionTracker, Verdict, DEFAULT_COOLDOWN};
use super::throttle::{WriteThrottle, DEFAULT_WRITE_THROTTLE};
use super::ControlKey;
use crate::mixer::DeviceId;
use crate::sse::event::{CONFIG_CHANGE, MIXER_UPDATE};
use crate::sse::{ConfigChange, EventSource, Frame, MixerUpdate};
use crate::state::{ControlState, Removal, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// How long after release hardware echoes are ignored
    pub cooldown: Duration,
    /// Minimum spacing between writes for one control while dragging
    pub write_throttle: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            write_throttle: DEFAULT_WRITE_THROTTLE,
        }
    }
}

/// What a write request does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Set every channel to this percentage
    Volume(u8),
    /// Flip a playback switch
    ToggleMute,
    /// Flip a capture switch
    ToggleCapture,
}

/// A write the caller should send to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub device: DeviceId,
    pub control: String,
    pub action: WriteAction,
}

impl WriteRequest {
    /// Endpoint accepting this request as a form post
    pub fn path(&self) -> &'static str {
        match self.action {
            WriteAction::Volume(_) => "/control/volume",
            WriteAction::ToggleMute => "/control/mute",
            WriteAction::ToggleCapture => "/control/capture",
        }
    }

    /// Form fields for [`WriteRequest::path`]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("card", self.device.to_string()),
            ("control", self.control.clone()),
        ];
        if let WriteAction::Volume(volume) = self.action {
            fields.push(("volume", volume.to_string()));
        }
        fields
    }

    /// `application/x-www-form-urlencoded` body for [`WriteRequest::path`]
    pub fn form_body(&self) -> String {
        self.form_fields()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, form_escape(&v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn form_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'*' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Result of applying one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub suppressed: usize,
}

impl ApplyReport {
    fn record(&mut self, verdict: Verdict) {
        if verdict.is_apply() {
            self.applied += 1;
        } else {
            self.suppressed += 1;
        }
    }
}

/// Counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub applied: u64,
    pub suppressed_dragging: u64,
    pub suppressed_cooldown: u64,
    /// Frames with a known type whose payload could not be parsed
    pub malformed: u64,
    /// Frames with an unknown type
    pub ignored: u64,
}

pub struct Reconciler {
    view: Snapshot,
    tracker: InteractionTracker,
    throttle: WriteThrottle,
    /// Last value entered during the current drag, per control
    pending: std::collections::HashMap<ControlKey, u8>,
    config_change: Option<String>,
    stats: ReconcilerStats,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            view: Snapshot::new(),
            tracker: InteractionTracker::new(config.cooldown),
            throttle: WriteThrottle::new(config.write_throttle),
            pending: std::collections::HashMap::new(),
            config_change: None,
            stats: ReconcilerStats::default(),
        }
    }

    /// Replace the whole view (initial load or resync)
    ///
    /// Controls being dragged keep their rendered value.
    pub fn load_snapshot(&mut self, snapshot: Snapshot) {
        let mut view = snapshot;
        for (key, volume) in &self.pending {
            if let Some(state) = view
                .devices
                .get_mut(&key.device)
                .and_then(|d| d.get_mut(&key.control))
            {
                set_all_channels(state, *volume);
            }
        }
        self.view = view;
    }

    pub fn view(&self) -> &Snapshot {
        &self.view
    }

    pub fn value(&self, device: DeviceId, control: &str) -> Option<&ControlState> {
        self.view.control(device, control)
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    // =========================================================================
    // Local interaction
    // =========================================================================

    /// Pointer down / key repeat started on a control
    pub fn begin_drag(&mut self, key: &ControlKey) {
        trace!(control = %key, "Drag started");
        self.tracker.begin(key);
    }

    /// New value from the user while interacting
    ///
    /// The rendered value always follows; a write is returned only when the
    /// per-control throttle allows one. Input without a prior
    /// [`begin_drag`](Self::begin_drag) starts a drag.
    pub fn input(&mut self, key: &ControlKey, volume: u8, now: Instant) -> Option<WriteRequest> {
        let volume = volume.min(100);
        if !self.tracker.is_dragging(key) {
            self.tracker.begin(key);
        }

        self.pending.insert(key.clone(), volume);
        if let Some(state) = self.control_mut(key) {
            set_all_channels(state, volume);
        }

        if self.throttle.allow(key, now) {
            Some(volume_request(key, volume))
        } else {
            trace!(control = %key, volume, "Write throttled");
            None
        }
    }

    /// Interaction ended
    ///
    /// Always yields the final value as one write (ignoring the throttle)
    /// when a value is known, and starts the cooldown.
    pub fn release(&mut self, key: &ControlKey, now: Instant) -> Option<WriteRequest> {
        self.tracker.end(key, now);
        self.throttle.reset(key);

        let volume = self.pending.remove(key).or_else(|| {
            self.view
                .control(key.device, &key.control)
                .and_then(|s| s.volume.first().copied())
        })?;

        trace!(control = %key, volume, "Drag released");
        Some(volume_request(key, volume))
    }

    /// Flip a playback switch optimistically
    pub fn toggle_mute(&mut self, key: &ControlKey, now: Instant) -> WriteRequest {
        self.toggle(key, WriteAction::ToggleMute, now)
    }

    /// Flip a capture switch optimistically
    pub fn toggle_capture(&mut self, key: &ControlKey, now: Instant) -> WriteRequest {
        self.toggle(key, WriteAction::ToggleCapture, now)
    }

    fn toggle(&mut self, key: &ControlKey, action: WriteAction, now: Instant) -> WriteRequest {
        if let Some(state) = self.control_mut(key) {
            state.mute = !state.mute;
        }
        self.tracker.cooldown_from(key, now);
        WriteRequest {
            device: key.device,
            control: key.control.clone(),
            action,
        }
    }

    // =========================================================================
    // Incoming events
    // =========================================================================

    /// Apply one decoded frame
    ///
    /// Unknown types are ignored; malformed payloads are counted and dropped.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> ApplyReport {
        match frame.event.as_deref() {
            Some(MIXER_UPDATE) => match serde_json::from_str::<MixerUpdate>(&frame.data) {
                Ok(update) => self.apply_update(&update, now),
                Err(e) => {
                    warn!("Discarding malformed mixer update: {}", e);
                    self.stats.malformed += 1;
                    ApplyReport::default()
                }
            },
            Some(CONFIG_CHANGE) => {
                match serde_json::from_str::<ConfigChange>(&frame.data) {
                    Ok(change) => {
                        debug!(path = %change.path, "ALSA configuration changed");
                        self.config_change = Some(change.path);
                    }
                    Err(e) => {
                        warn!("Discarding malformed config change: {}", e);
                        self.stats.malformed += 1;
                    }
                }
                ApplyReport::default()
            }
            other => {
                trace!(event_type = ?other, "Ignoring event");
                self.stats.ignored += 1;
                ApplyReport::default()
            }
        }
    }

    /// Merge one mixer update into the view, entry by entry
    pub fn apply_update(&mut self, update: &MixerUpdate, now: Instant) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (device, controls) in &update.state.devices {
            for (name, state) in controls {
                let key = ControlKey::new(*device, name.clone());
                let verdict = self.verdict(&key, update.source, now);
                report.record(verdict);
                if verdict.is_apply() {
                    self.view.insert(*device, name.clone(), state.clone());
                }
            }
        }

        for removal in &update.removed {
            self.apply_removal(removal, update.source, now, &mut report);
        }

        trace!(
            source = %update.source,
            applied = report.applied,
            suppressed = report.suppressed,
            "Update reconciled"
        );
        report
    }

    /// Config change seen since the last call, if any
    pub fn take_config_change(&mut self) -> Option<String> {
        self.config_change.take()
    }

    fn apply_removal(
        &mut self,
        removal: &Removal,
        source: EventSource,
        now: Instant,
        report: &mut ApplyReport,
    ) {
        let names: Vec<String> = match (&removal.control, self.view.device(removal.device)) {
            (Some(name), _) => vec![name.clone()],
            (None, Some(controls)) => controls.keys().cloned().collect(),
            (None, None) => return,
        };

        for name in names {
            let key = ControlKey::new(removal.device, name);
            let verdict = self.verdict(&key, source, now);
            report.record(verdict);
            if verdict.is_apply() {
                if let Some(controls) = self.view.devices.get_mut(&removal.device) {
                    controls.remove(&key.control);
                }
            }
        }

        let empty = self
            .view
            .device(removal.device)
            .is_some_and(|controls| controls.is_empty());
        if empty {
            self.view.devices.remove(&removal.device);
        }
    }

    fn verdict(&mut self, key: &ControlKey, source: EventSource, now: Instant) -> Verdict {
        let verdict = self.tracker.admits(key, source, now);
        match verdict {
            Verdict::Apply => self.stats.applied += 1,
            Verdict::SuppressDragging => {
                trace!(control = %key, %source, "Suppressed while dragging");
                self.stats.suppressed_dragging += 1;
            }
            Verdict::SuppressCooldown => {
                trace!(control = %key, %source, "Suppressed during cooldown");
                self.stats.suppressed_cooldown += 1;
            }
        }
        verdict
    }

    fn control_mut(&mut self, key: &ControlKey) -> Option<&mut ControlState> {
        self.view
            .devices
            .get_mut(&key.device)
            .and_then(|d| d.get_mut(&key.control))
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

fn set_all_channels(state: &mut ControlState, volume: u8) {
    for channel in state.volume.iter_mut() {
        *channel = volume;
    }
}

fn volume_request(key: &ControlKey, volume: u8) -> WriteRequest {
    WriteRequest {
        device: key.device,
        control: key.control.clone(),
        action: WriteAction::Volume(volume),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::{Event, EventStreamDecoder};

    const MASTER: &str = "Master Playback Volume";

    fn master() -> ControlKey {
        ControlKey::new(0, MASTER)
    }

    fn reconciler() -> Reconciler {
        let mut r = Reconciler::new(ReconcilerConfig {
            cooldown: Duration::from_millis(1000),
            write_throttle: Duration::from_millis(100),
        });
        let mut snapshot = Snapshot::new();
        snapshot.insert(0, MASTER, ControlState::new(vec![50, 50], false));
        snapshot.insert(0, "PCM Playback Volume", ControlState::new(vec![100, 100], false));
        r.load_snapshot(snapshot);
        r
    }

    fn update(source: EventSource, control: &str, volume: u8) -> MixerUpdate {
        MixerUpdate {
            state: Snapshot::single(0, control, ControlState::new(vec![volume, volume], false)),
            source,
            control: None,
            removed: Vec::new(),
            timestamp: None,
        }
    }

    fn rendered(r: &Reconciler, control: &str) -> Vec<u8> {
        r.value(0, control).map(|s| s.volume.clone()).unwrap_or_default()
    }

    #[test]
    fn test_drag_suppresses_all_updates() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.begin_drag(&master());
        r.input(&master(), 70, t0);

        let report = r.apply_update(&update(EventSource::Monitor, MASTER, 50), t0);
        assert_eq!(report, ApplyReport { applied: 0, suppressed: 1 });
        r.apply_update(&update(EventSource::Handler, MASTER, 60), t0);

        assert_eq!(rendered(&r, MASTER), vec![70, 70]);
        assert_eq!(r.stats().suppressed_dragging, 2);
    }

    #[test]
    fn test_cooldown_asymmetry() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.begin_drag(&master());
        r.input(&master(), 70, t0);
        r.release(&master(), t0);

        let t1 = t0 + Duration::from_millis(300);
        r.apply_update(&update(EventSource::Monitor, MASTER, 50), t1);
        assert_eq!(rendered(&r, MASTER), vec![70, 70]);

        r.apply_update(&update(EventSource::Handler, MASTER, 72), t1);
        assert_eq!(rendered(&r, MASTER), vec![72, 72]);

        let t2 = t0 + Duration::from_millis(1001);
        r.apply_update(&update(EventSource::Monitor, MASTER, 10), t2);
        assert_eq!(rendered(&r, MASTER), vec![10, 10]);
    }

    #[test]
    fn test_other_controls_unaffected_by_drag() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.begin_drag(&master());

        let mut u = update(EventSource::Monitor, MASTER, 5);
        u.state.insert(0, "PCM Playback Volume", ControlState::new(vec![20, 20], false));
        let report = r.apply_update(&u, t0);

        assert_eq!(report, ApplyReport { applied: 1, suppressed: 1 });
        assert_eq!(rendered(&r, "PCM Playback Volume"), vec![20, 20]);
        assert_eq!(rendered(&r, MASTER), vec![50, 50]);
    }

    #[test]
    fn test_throttled_writes_and_final_release() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.begin_drag(&master());

        let mut writes = Vec::new();
        for (i, v) in [51u8, 52, 53, 54, 55, 56].iter().enumerate() {
            let now = t0 + Duration::from_millis(30 * i as u64);
            writes.extend(r.input(&master(), *v, now));
            // Rendered value follows every input
            assert_eq!(rendered(&r, MASTER), vec![*v, *v]);
        }

        // 0ms and 120ms pass the 100ms throttle
        let values: Vec<_> = writes.iter().map(|w| w.action).collect();
        assert_eq!(values, vec![WriteAction::Volume(51), WriteAction::Volume(55)]);

        let last = r.release(&master(), t0 + Duration::from_millis(151)).unwrap();
        assert_eq!(last.action, WriteAction::Volume(56));
        assert_eq!(last.path(), "/control/volume");
    }

    #[test]
    fn test_toggle_is_optimistic_and_cools_down() {
        let mut r = reconciler();
        let t0 = Instant::now();

        let req = r.toggle_mute(&master(), t0);
        assert_eq!(req.action, WriteAction::ToggleMute);
        assert_eq!(req.form_fields(), vec![("card", "0".to_string()), ("control", MASTER.to_string())]);
        assert!(r.value(0, MASTER).unwrap().mute);

        // Stale poll during cooldown does not revert the toggle
        r.apply_update(&update(EventSource::Monitor, MASTER, 50), t0 + Duration::from_millis(10));
        assert!(r.value(0, MASTER).unwrap().mute);
    }

    #[test]
    fn test_removals_follow_verdicts() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.begin_drag(&master());

        let removal = MixerUpdate {
            state: Snapshot::new(),
            source: EventSource::Monitor,
            control: None,
            removed: vec![Removal::device(0)],
            timestamp: None,
        };
        let report = r.apply_update(&removal, t0);
        assert_eq!(report, ApplyReport { applied: 1, suppressed: 1 });
        assert!(r.value(0, MASTER).is_some());
        assert!(r.value(0, "PCM Playback Volume").is_none());

        r.release(&master(), t0);
        r.apply_update(&removal, t0 + Duration::from_secs(2));
        assert!(r.view().device(0).is_none());
    }

    #[test]
    fn test_frames_from_wire() {
        let mut r = reconciler();
        let mut decoder = EventStreamDecoder::new();
        let now = Instant::now();

        let wire = format!(
            "{}{}{}{}",
            Event::mixer_update(&update(EventSource::Monitor, MASTER, 33)).encode(),
            "event: mixer-update\ndata: {not json\n\n",
            "event: something-else\ndata: 1\n\n",
            Event::config_change("/etc/asound.conf").encode(),
        );
        for frame in decoder.feed(&wire) {
            r.handle_frame(&frame, now);
        }

        assert_eq!(rendered(&r, MASTER), vec![33, 33]);
        let stats = r.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(r.take_config_change().as_deref(), Some("/etc/asound.conf"));
        assert_eq!(r.take_config_change(), None);
    }

    #[test]
    fn test_resync_keeps_dragged_value() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.input(&master(), 80, t0);

        let mut fresh = Snapshot::new();
        fresh.insert(0, MASTER, ControlState::new(vec![50, 50], false));
        r.load_snapshot(fresh);
        assert_eq!(rendered(&r, MASTER), vec![80, 80]);
    }

    #[test]
    fn test_form_body_escaping() {
        let req = WriteRequest {
            device: 1,
            control: "Mic Capture Volume".to_string(),
            action: WriteAction::Volume(40),
        };
        assert_eq!(req.form_body(), "card=1&control=Mic+Capture+Volume&volume=40");
    }
}
