//! ALSA configuration file watcher
//!
//! Publishes a `config-change` event when `~/.asoundrc`, `/etc/asound.conf`
//! (or the configured paths) change, so web clients can offer a reload after
//! the default card was switched from outside.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::sse::{self, Broadcaster};

/// Events for one path closer together than this collapse into one
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// A watched file: the path as configured and as resolved on disk
#[derive(Debug, Clone)]
struct Target {
    configured: PathBuf,
    resolved: PathBuf,
}

/// Keeps the underlying watcher alive; dropping it stops watching
pub struct AsoundWatcher {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl AsoundWatcher {
    /// Start watching `paths`
    ///
    /// Files that do not exist are skipped. The parent directories are
    /// watched rather than the files, so editors that replace a file by
    /// renaming over it are still noticed.
    pub fn start(paths: Vec<PathBuf>, broadcaster: Arc<dyn Broadcaster>) -> Result<Self> {
        let targets: Vec<Target> = paths
            .into_iter()
            .filter_map(|configured| match configured.canonicalize() {
                Ok(resolved) => Some(Target {
                    configured,
                    resolved,
                }),
                Err(_) => {
                    info!("ALSA config {} not found, not watching it", configured.display());
                    None
                }
            })
            .collect();

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();
        let pending: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
        let callback_targets = targets.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("ALSA config watch error: {}", e);
                    return;
                }
            };

            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                return;
            }

            for path in &event.paths {
                let Some(target) = callback_targets.iter().find(|t| &t.resolved == path) else {
                    continue;
                };

                // Already scheduled: this event joins the pending one
                if !pending.lock().insert(target.resolved.clone()) {
                    continue;
                }

                debug!("ALSA config changed: {}", target.configured.display());
                let pending = Arc::clone(&pending);
                let broadcaster = Arc::clone(&broadcaster);
                let target = target.clone();

                runtime_handle.spawn(async move {
                    tokio::time::sleep(DEBOUNCE).await;
                    pending.lock().remove(&target.resolved);
                    broadcaster.broadcast(sse::Event::config_change(
                        target.configured.to_string_lossy(),
                    ));
                });
            }
        })?;

        let mut dirs: Vec<&Path> = targets.iter().filter_map(|t| t.resolved.parent()).collect();
        dirs.sort();
        dirs.dedup();
        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch directory: {}", dir.display()))?;
        }

        let watched: Vec<PathBuf> = targets.into_iter().map(|t| t.configured).collect();
        info!(files = watched.len(), "ALSA config watcher started");

        Ok(Self {
            _watcher: watcher,
            watched,
        })
    }

    /// Files actually being watched
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::event::CONFIG_CHANGE;
    use crate::sse::EventData;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct ChannelBroadcaster(mpsc::UnboundedSender<sse::Event>);

    impl Broadcaster for ChannelBroadcaster {
        fn broadcast(&self, event: sse::Event) {
            let _ = self.0.send(event);
        }
    }

    #[tokio::test]
    async fn test_change_publishes_config_change() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let asoundrc = temp_dir.path().join(".asoundrc");
        let other = temp_dir.path().join("notes.txt");
        fs::write(&asoundrc, "defaults.pcm.card 0\n")?;
        fs::write(&other, "x")?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = AsoundWatcher::start(
            vec![asoundrc.clone(), temp_dir.path().join("missing.conf")],
            Arc::new(ChannelBroadcaster(tx)),
        )?;
        assert_eq!(watcher.watched(), &[asoundrc.clone()]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&other, "unrelated")?;
        fs::write(&asoundrc, "defaults.pcm.card 1\n")?;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await?
            .expect("watcher dropped");
        assert_eq!(event.event_type, CONFIG_CHANGE);
        assert_eq!(
            event.data,
            EventData::Json(serde_json::json!({ "path": asoundrc.to_string_lossy() }))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_nothing_to_watch() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = AsoundWatcher::start(
            vec![temp_dir.path().join("nope")],
            Arc::new(ChannelBroadcaster(tx)),
        )?;
        assert!(watcher.watched().is_empty());
        Ok(())
    }
}
