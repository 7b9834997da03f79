//! GET /events - server-sent event stream

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::{ApiError, AppState};
use crate::sse::client::{self, BodyChunk};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Whether the Accept header (if any) allows an event stream
pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    let values: Vec<&HeaderValue> = headers.get_all(header::ACCEPT).iter().collect();
    if values.is_empty() {
        return true;
    }
    values.iter().any(|v| {
        v.to_str()
            .map(|s| s.contains("text/event-stream") || s.contains("*/*"))
            .unwrap_or(false)
    })
}

pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !accepts_event_stream(&headers) {
        return Err(ApiError::bad_request(
            "client must accept text/event-stream",
        ));
    }

    let (slot, client) = client::channel(
        state.config.sync.client_queue_capacity,
        state.config.heartbeat_interval(),
    );
    let id = slot.id();
    state.hub.register(slot);

    // One chunk in flight: a stalled peer backs up into the client queue,
    // where the hub notices it
    let (body_tx, body_rx) = mpsc::channel::<BodyChunk>(1);
    let hub = state.hub.clone();
    tokio::spawn(async move {
        let reason = client.run(body_tx).await;
        hub.unregister(id);
        debug!(client = %id, ?reason, "Event stream closed");
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(ReceiverStream::new(body_rx)),
    )
        .into_response())
}
