//! mixer-web - web mixer server
//!
//! Serves the control endpoints and the event stream, runs the hardware
//! poller and the ALSA configuration watcher.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixer_web::api::{self, AppState};
use mixer_web::config::{AppConfig, AsoundWatcher, Overrides};
use mixer_web::mixer::{configured_default_device, AudioBackend, SimulatedMixer};
use mixer_web::sse::{Broadcaster, HubHandle};
use mixer_web::state::Poller;

/// mixer-web - keep every browser in sync with the sound card mixer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MIXER_WEB_CONFIG", default_value = "mixer-web.yaml")]
    config: String,

    /// HTTP port (overrides the config file)
    #[arg(short, long, env = "MIXER_WEB_PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long, env = "MIXER_WEB_BIND")]
    bind: Option<String>,

    /// Default sound card index (overrides ALSA_CARD and asoundrc)
    #[arg(long)]
    card: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Do not watch ALSA configuration files
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting mixer-web v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = AppConfig::load_or_default(&args.config).await?;
    config.apply_overrides(&Overrides {
        bind: args.bind.clone(),
        port: args.port,
        card: args.card,
        no_watch: args.no_watch,
    })?;
    let config = Arc::new(config);

    // No hardware binding ships with this build
    let backend: Arc<dyn AudioBackend> = Arc::new(SimulatedMixer::demo());
    warn!(backend = backend.name(), "Using simulated mixer backend");

    let default_card = config.mixer.default_card.or_else(configured_default_device);
    info!(?default_card, "Default card");

    let hub = HubHandle::spawn();
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(hub.clone());

    let poller = Poller::new(backend.clone(), broadcaster.clone(), config.poll_interval()).spawn();

    let _watcher = if config.watch.enabled {
        match AsoundWatcher::start(config.watch_paths(), broadcaster.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("ALSA config watcher disabled: {:#}", e);
                None
            }
        }
    } else {
        info!("ALSA config watching disabled");
        None
    };

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(backend, hub.clone(), config.clone()));

    // Closing the event streams first lets the server drain
    let shutdown_hub = hub.clone();
    let shutdown = async move {
        shutdown_signal().await;
        shutdown_hub.stop().await;
    };

    api::serve(state, addr, shutdown).await?;

    poller.stop().await;
    info!("mixer-web shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
