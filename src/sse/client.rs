//! Per-connection event-stream client
//!
//! Each connection is split in two halves:
//! - [`ClientSlot`]: owned by the hub; non-blocking enqueue and close
//! - [`SseClient`]: owned by the connection task; the writer loop that drains
//!   the queue onto the response body and interleaves heartbeats
//!
//! Dropping the slot closes the client.

use bytes::Bytes;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::event::{Event, CONNECTED, HEARTBEAT};

/// Default outbound queue capacity per client
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
/// Default keep-alive period
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

/// Chunks written to the HTTP response body
pub type BodyChunk = Result<Bytes, Infallible>;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Why an enqueue failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Queue full: the consumer is too slow
    Full,
    /// Writer loop is gone
    Closed,
}

/// Why a writer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The response body was dropped (peer went away)
    PeerDisconnected,
    /// Closed by the hub, or the slot was dropped
    Closed,
    /// Writing a chunk failed
    WriteFailed,
}

/// Hub-side half of a client
pub struct ClientSlot {
    id: ClientId,
    queue: mpsc::Sender<Arc<Event>>,
    close: watch::Sender<bool>,
}

impl ClientSlot {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Enqueue without waiting
    pub fn try_deliver(&self, event: &Arc<Event>) -> Result<(), DeliveryError> {
        self.queue.try_send(Arc::clone(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal the writer loop to stop
    pub fn close(self) {
        let _ = self.close.send(true);
    }
}

/// Connection-side half of a client
pub struct SseClient {
    id: ClientId,
    events: mpsc::Receiver<Arc<Event>>,
    closed: watch::Receiver<bool>,
    heartbeat: Duration,
}

/// Create a connected slot/client pair
pub fn channel(capacity: usize, heartbeat: Duration) -> (ClientSlot, SseClient) {
    let id = ClientId::next();
    let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = watch::channel(false);

    (
        ClientSlot {
            id,
            queue: queue_tx,
            close: close_tx,
        },
        SseClient {
            id,
            events: queue_rx,
            closed: close_rx,
            heartbeat,
        },
    )
}

impl SseClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Writer loop
    ///
    /// Writes the connected comment immediately, then every queued event in
    /// order, plus a heartbeat comment every period. Returns when the peer
    /// disconnects, the hub closes the client, or a write fails.
    pub async fn run(mut self, body: mpsc::Sender<BodyChunk>) -> ExitReason {
        debug!(client = %self.id, "Writer loop started");

        if let Err(reason) = write_chunk(&body, &mut self.closed, CONNECTED.to_string()).await {
            return reason;
        }

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;

                _ = body.closed() => break ExitReason::PeerDisconnected,

                changed = self.closed.changed() => {
                    if changed.is_err() || *self.closed.borrow() {
                        break ExitReason::Closed;
                    }
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        break ExitReason::Closed;
                    };
                    trace!(client = %self.id, event_type = %event.event_type, "Writing event");
                    if let Err(reason) = write_chunk(&body, &mut self.closed, event.encode()).await {
                        break reason;
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(reason) = write_chunk(&body, &mut self.closed, HEARTBEAT.to_string()).await {
                        break reason;
                    }
                }
            }
        };

        debug!(client = %self.id, ?reason, "Writer loop stopped");
        reason
    }
}

/// Write one chunk, giving up as soon as the client is closed
///
/// A stalled peer leaves `send` pending forever; the close signal from the
/// hub must still end the loop.
async fn write_chunk(
    body: &mpsc::Sender<BodyChunk>,
    closed: &mut watch::Receiver<bool>,
    text: String,
) -> Result<(), ExitReason> {
    tokio::select! {
        biased;

        _ = close_requested(closed) => Err(ExitReason::Closed),
        sent = body.send(Ok(Bytes::from(text))) => sent.map_err(|_| ExitReason::WriteFailed),
    }
}

/// Resolves once the close flag is set or the slot is dropped
async fn close_requested(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn next_text(rx: &mut mpsc::Receiver<BodyChunk>) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("body closed");
        String::from_utf8(chunk.unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_writes_events_in_order() {
        let (slot, client) = channel(DEFAULT_QUEUE_CAPACITY, DEFAULT_HEARTBEAT);
        let (body_tx, mut body_rx) = mpsc::channel(16);
        let task = tokio::spawn(client.run(body_tx));

        assert_eq!(next_text(&mut body_rx).await, CONNECTED);

        for i in 0..3 {
            let event = Arc::new(Event::json("n", json!(i)));
            slot.try_deliver(&event).unwrap();
        }
        for i in 0..3 {
            assert_eq!(next_text(&mut body_rx).await, format!("event: n\ndata: {}\n\n", i));
        }

        slot.close();
        assert_eq!(task.await.unwrap(), ExitReason::Closed);
    }

    #[tokio::test]
    async fn test_queue_full_and_closed() {
        let (slot, client) = channel(2, DEFAULT_HEARTBEAT);
        let event = Arc::new(Event::json("n", json!(1)));

        assert!(slot.try_deliver(&event).is_ok());
        assert!(slot.try_deliver(&event).is_ok());
        assert_eq!(slot.try_deliver(&event), Err(DeliveryError::Full));

        drop(client);
        assert_eq!(slot.try_deliver(&event), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let (_slot, client) = channel(DEFAULT_QUEUE_CAPACITY, Duration::from_millis(20));
        let (body_tx, mut body_rx) = mpsc::channel(16);
        tokio::spawn(client.run(body_tx));

        assert_eq!(next_text(&mut body_rx).await, CONNECTED);
        assert_eq!(next_text(&mut body_rx).await, HEARTBEAT);
        assert_eq!(next_text(&mut body_rx).await, HEARTBEAT);
    }

    #[tokio::test]
    async fn test_peer_disconnect_ends_loop() {
        let (_slot, client) = channel(DEFAULT_QUEUE_CAPACITY, DEFAULT_HEARTBEAT);
        let (body_tx, mut body_rx) = mpsc::channel(16);
        let task = tokio::spawn(client.run(body_tx));

        assert_eq!(next_text(&mut body_rx).await, CONNECTED);
        drop(body_rx);

        let reason = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(reason, ExitReason::PeerDisconnected);
    }

    #[tokio::test]
    async fn test_close_ends_loop_with_stalled_peer() {
        let (slot, client) = channel(DEFAULT_QUEUE_CAPACITY, DEFAULT_HEARTBEAT);
        // Room for the connected comment only; nobody reads the body
        let (body_tx, _body_rx) = mpsc::channel(1);
        let task = tokio::spawn(client.run(body_tx));

        for i in 0..2 {
            let event = Arc::new(Event::json("n", json!(i)));
            slot.try_deliver(&event).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        slot.close();
        let reason = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(reason, ExitReason::Closed);
    }

    #[tokio::test]
    async fn test_dropping_slot_closes_client() {
        let (slot, client) = channel(DEFAULT_QUEUE_CAPACITY, DEFAULT_HEARTBEAT);
        let (body_tx, _body_rx) = mpsc::channel(16);
        let task = tokio::spawn(client.run(body_tx));

        drop(slot);
        let reason = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(reason, ExitReason::Closed);
    }
}
