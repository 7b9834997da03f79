//! HTTP surface
//!
//! Form-based control endpoints used by the web UI, the event stream, and a
//! few JSON read endpoints. Default port: 8080

mod error;
mod events;
pub mod handlers;
mod middleware;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

pub use error::ApiError;
pub use events::accepts_event_stream;

use crate::config::AppConfig;
use crate::mixer::AudioBackend;
use crate::sse::HubHandle;

/// Shared state for API handlers
pub struct AppState {
    pub backend: Arc<dyn AudioBackend>,
    pub hub: HubHandle,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(backend: Arc<dyn AudioBackend>, hub: HubHandle, config: Arc<AppConfig>) -> Self {
        Self {
            backend,
            hub,
            config,
        }
    }
}

/// Build the router
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let mut router = Router::new()
        .route("/events", get(events::event_stream))
        .route("/control/volume", post(handlers::set_volume))
        .route("/control/mute", post(handlers::toggle_mute))
        .route("/control/capture", post(handlers::toggle_capture))
        .route(
            "/card/:card/control/:control/volume",
            post(handlers::card_set_volume),
        )
        .route(
            "/card/:card/control/:control/mute",
            post(handlers::card_toggle_mute),
        )
        .route(
            "/card/:card/control/:control/capture",
            post(handlers::card_toggle_capture),
        )
        .route("/api/state", get(handlers::get_state))
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/client-config", get(handlers::client_config))
        .route("/api/health", get(handlers::health_check));

    if let Some(dir) = &state.config.server.static_dir {
        info!("Serving static files from {}", dir);
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router
        .with_state(state)
        .layer(cors)
        .layer(from_fn(middleware::access_log))
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;
    info!("Mixer web server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    Ok(())
}
