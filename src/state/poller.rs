//! Background hardware poller
//!
//! Observes the backend at a fixed period, diffs each snapshot against the
//! last good one and publishes non-empty deltas as `mixer-update` events with
//! source `monitor`. Polling does not depend on whether anyone is listening.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::delta::Delta;
use super::snapshot::Snapshot;
use crate::mixer::AudioBackend;
use crate::sse::{Broadcaster, Event, MixerUpdate};

/// Default tick period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one poll tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Device enumeration failed; nothing changed
    Skipped,
    /// Hardware matches the last good snapshot
    Unchanged,
    /// One event was published
    Published {
        devices: usize,
        controls: usize,
        removed: usize,
    },
}

/// Counters since the poller started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    pub skipped: u64,
    pub published: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    skipped: AtomicU64,
    published: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &TickOutcome) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        match outcome {
            TickOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::Published { .. } => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::Unchanged => {}
        }
    }

    fn snapshot(&self) -> PollerStats {
        PollerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
        }
    }
}

pub struct Poller {
    backend: Arc<dyn AudioBackend>,
    broadcaster: Arc<dyn Broadcaster>,
    interval: Duration,
    /// Last good observation; owned by the poller alone
    last: Option<Snapshot>,
    counters: Arc<Counters>,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        broadcaster: Arc<dyn Broadcaster>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            broadcaster,
            interval,
            last: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Last good snapshot, if any tick has succeeded
    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Run one observation
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.observe().await;
        self.counters.record(&outcome);
        outcome
    }

    async fn observe(&mut self) -> TickOutcome {
        let current = match Snapshot::capture(self.backend.as_ref(), self.last.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(backend = self.backend.name(), "Mixer poll failed, skipping tick: {}", e);
                return TickOutcome::Skipped;
            }
        };

        let delta = Delta::compute(self.last.as_ref(), &current);
        if delta.is_empty() {
            trace!("No mixer changes");
            return TickOutcome::Unchanged;
        }

        let outcome = TickOutcome::Published {
            devices: delta.changed.devices.len(),
            controls: delta.changed.control_count(),
            removed: delta.removed.len(),
        };
        debug!(?outcome, "Mixer state changed");

        self.last = Some(current);
        self.broadcaster
            .broadcast(Event::mixer_update(&MixerUpdate::from_delta(delta)));

        outcome
    }

    /// Start ticking on a background task
    pub fn spawn(mut self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let counters = Arc::clone(&self.counters);

        let task = tokio::spawn(async move {
            info!(
                backend = self.backend.name(),
                interval_ms = self.interval.as_millis() as u64,
                "Mixer poller started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }

            info!(stats = ?self.counters.snapshot(), "Mixer poller stopped");
        });

        PollerHandle {
            shutdown: shutdown_tx,
            task,
            counters,
        }
    }
}

/// Handle to a running poller
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl PollerHandle {
    pub fn stats(&self) -> PollerStats {
        self.counters.snapshot()
    }

    /// Stop after the tick in progress (if any) and wait for the task
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::{AudioBackend, Direction, SimulatedMixer};
    use crate::sse::EventSource;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBroadcaster {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingBroadcaster {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast(&self, event: Event) {
            self.events.lock().push(event);
        }
    }

    fn setup() -> (Arc<SimulatedMixer>, Arc<RecordingBroadcaster>, Poller) {
        let mixer = Arc::new(SimulatedMixer::demo());
        let recorder = Arc::new(RecordingBroadcaster::default());
        let poller = Poller::new(mixer.clone(), recorder.clone(), DEFAULT_POLL_INTERVAL);
        (mixer, recorder, poller)
    }

    fn update_of(event: &Event) -> MixerUpdate {
        match &event.data {
            crate::sse::EventData::Json(value) => serde_json::from_value(value.clone()).unwrap(),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_tick_publishes_everything() {
        let (_mixer, recorder, mut poller) = setup();

        let outcome = poller.tick().await;
        assert!(matches!(outcome, TickOutcome::Published { devices: 2, removed: 0, .. }));

        let events = recorder.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "mixer-update");
        let update = update_of(&events[0]);
        assert_eq!(update.source, EventSource::Monitor);
        assert!(update.timestamp.is_some());
        assert_eq!(Some(&update.state), poller.last_snapshot());
    }

    #[tokio::test]
    async fn test_no_broadcast_without_change() {
        let (_mixer, recorder, mut poller) = setup();
        poller.tick().await;
        recorder.take();

        assert_eq!(poller.tick().await, TickOutcome::Unchanged);
        assert_eq!(poller.tick().await, TickOutcome::Unchanged);
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn test_external_change_published_alone() {
        let (mixer, recorder, mut poller) = setup();
        poller.tick().await;
        recorder.take();

        mixer.set_volume(0, "PCM Playback Volume", &[30]).await.unwrap();
        let outcome = poller.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Published {
                devices: 1,
                controls: 1,
                removed: 0
            }
        );

        let update = update_of(&recorder.take()[0]);
        assert_eq!(update.state.control_count(), 1);
        assert_eq!(
            update.state.control(0, "PCM Playback Volume").map(|c| c.volume.clone()),
            Some(vec![30, 30])
        );
    }

    #[tokio::test]
    async fn test_removal_published() {
        let (mixer, recorder, mut poller) = setup();
        poller.tick().await;
        recorder.take();

        mixer.remove_device(1);
        mixer.add_device(7, "Loopback");
        mixer.add_volume(7, "PCM", Direction::Playback, 2, 10);

        let outcome = poller.tick().await;
        assert!(matches!(outcome, TickOutcome::Published { devices: 1, removed: 1, .. }));

        let update = update_of(&recorder.take()[0]);
        assert_eq!(update.removed, vec![crate::state::Removal::device(1)]);
        assert!(update.state.device(7).is_some());
    }

    #[tokio::test]
    async fn test_unavailable_backend_skips() {
        let (mixer, recorder, mut poller) = setup();
        poller.tick().await;
        recorder.take();
        let before = poller.last_snapshot().cloned();

        mixer.set_available(false);
        assert_eq!(poller.tick().await, TickOutcome::Skipped);
        assert_eq!(poller.tick().await, TickOutcome::Skipped);
        assert!(recorder.take().is_empty());
        assert_eq!(poller.last_snapshot().cloned(), before);

        // Recovery with unchanged hardware publishes nothing
        mixer.set_available(true);
        assert_eq!(poller.tick().await, TickOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_spawned_poller_picks_up_changes() {
        let mixer = Arc::new(SimulatedMixer::demo());
        let recorder = Arc::new(RecordingBroadcaster::default());
        let handle = Poller::new(mixer.clone(), recorder.clone(), Duration::from_millis(10)).spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        mixer.set_mute(1, "Speaker Playback Switch", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = handle.stats();
        handle.stop().await;

        assert!(stats.ticks >= 2);
        assert_eq!(stats.published, 2);
        let events = recorder.take();
        assert_eq!(events.len(), 2);
        let update = update_of(&events[1]);
        assert_eq!(update.state.control(1, "Speaker Playback Volume").map(|c| c.mute), Some(true));
    }
}
