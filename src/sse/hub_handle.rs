//! HubHandle - public API for the event hub
//!
//! Cheap to clone; every clone talks to the same actor. Once the hub is
//! stopped, fire-and-forget calls are silently ignored and queries return
//! neutral values.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::client::{ClientId, ClientSlot};
use super::commands::HubCommand;
use super::event::Event;
use super::hub::HubActor;
use super::Broadcaster;

#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<HubCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Spawn a new hub and return a handle
    pub fn spawn() -> Self {
        HubActor::spawn()
    }

    // =========================================================================
    // Hot path (fire-and-forget)
    // =========================================================================

    /// Add a client to the active set
    ///
    /// If the hub is already stopped the slot is dropped, which closes the
    /// client immediately.
    pub fn register(&self, slot: ClientSlot) {
        if let Err(e) = self.cmd_tx.send(HubCommand::Register { slot }) {
            debug!("Hub stopped, rejecting client");
            if let HubCommand::Register { slot } = e.0 {
                slot.close();
            }
        }
    }

    /// Remove a client; unknown or already removed ids are ignored
    pub fn unregister(&self, id: ClientId) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { id });
    }

    /// Queue an event for every active client
    pub fn broadcast(&self, event: Event) {
        let _ = self.cmd_tx.send(HubCommand::Broadcast {
            event: Arc::new(event),
        });
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Number of active clients (0 once stopped)
    pub async fn client_count(&self) -> usize {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HubCommand::ClientCount {
                response: response_tx,
            })
            .is_err()
        {
            return 0;
        }
        response_rx.await.unwrap_or(0)
    }

    /// Close every client and stop the hub
    ///
    /// Idempotent: returns immediately when the hub is already stopped.
    pub async fn stop(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HubCommand::Stop {
                response: response_tx,
            })
            .is_err()
        {
            return;
        }
        let _ = response_rx.await;
    }
}

impl Broadcaster for HubHandle {
    fn broadcast(&self, event: Event) {
        HubHandle::broadcast(self, event);
    }
}
