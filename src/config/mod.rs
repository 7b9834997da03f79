//! Configuration management for mixer-web
//!
//! YAML file with one section per concern. Every field has a default, so an
//! empty or missing file yields a working configuration; command-line flags
//! are applied on top with [`AppConfig::apply_overrides`].

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::mixer::default_device::asound_config_paths;
use crate::mixer::DeviceId;
use crate::reconcile::ReconcilerConfig;

pub use watcher::AsoundWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconciler: ClientTuning,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// HTTP listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under `/static`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
}

/// Sound card selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MixerConfig {
    /// Overrides ALSA_CARD and the asoundrc default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_card: Option<DeviceId>,
}

/// Poller and event stream tunables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub client_queue_capacity: usize,
}

/// Reconciler tunables, handed to web clients via `/api/client-config`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientTuning {
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
    #[serde(default = "default_write_throttle")]
    pub write_throttle_ms: u64,
}

/// ALSA configuration file watching
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files to watch; empty means `~/.asoundrc` and `/etc/asound.conf`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            static_dir: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            client_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown(),
            write_throttle_ms: default_write_throttle(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            paths: Vec::new(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub card: Option<DeviceId>,
    pub no_watch: bool,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    ///
    /// A file that exists but is invalid is still an error.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!("Config file {} not found, using defaults", path);
            return Ok(Self::default());
        }
        let config = Self::load(path).await?;
        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document parses as null
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind))?;

        if self.sync.poll_interval_ms == 0 {
            anyhow::bail!("sync.poll_interval_ms must be greater than 0");
        }
        if self.sync.heartbeat_interval_ms == 0 {
            anyhow::bail!("sync.heartbeat_interval_ms must be greater than 0");
        }
        if self.sync.client_queue_capacity == 0 {
            anyhow::bail!("sync.client_queue_capacity must be at least 1");
        }
        if self.watch.paths.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("watch.paths cannot contain empty entries");
        }

        Ok(())
    }

    /// Apply command-line overrides, then re-validate
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(bind) = &overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(card) = overrides.card {
            self.mixer.default_card = Some(card);
        }
        if overrides.no_watch {
            self.watch.enabled = false;
        }
        self.validate()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.sync.heartbeat_interval_ms)
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            cooldown: Duration::from_millis(self.reconciler.cooldown_ms),
            write_throttle: Duration::from_millis(self.reconciler.write_throttle_ms),
        }
    }

    /// Files the ALSA config watcher should observe
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        if self.watch.paths.is_empty() {
            asound_config_paths()
        } else {
            self.watch.paths.iter().map(PathBuf::from).collect()
        }
    }
}

// Default value functions
fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_poll_interval() -> u64 { 100 }
fn default_heartbeat_interval() -> u64 { 25_000 }
fn default_queue_capacity() -> usize { 10 }
fn default_cooldown() -> u64 { 1000 }
fn default_write_throttle() -> u64 { 100 }
fn default_true() -> bool { true }
