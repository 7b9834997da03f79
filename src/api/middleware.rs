//! Request logging middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info};

/// One log line per request with status and latency
///
/// `/events` responses are logged when the stream opens, not when it ends.
pub async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if path == "/api/health" {
        debug!(%method, %path, status, elapsed_ms, "HTTP request");
    } else {
        info!(%method, %path, status, elapsed_ms, "HTTP request");
    }

    response
}
