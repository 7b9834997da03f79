//! HubActor - owns the set of connected event-stream clients
//!
//! All membership changes and broadcasts go through one command channel and
//! are processed sequentially, so a broadcast always sees a consistent client
//! set and register/unregister never race with delivery.
//!
//! Delivery never waits on a client: a full queue means the consumer cannot
//! keep up, and the client is dropped on the spot. Healthy clients are
//! unaffected by a slow one.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::client::{ClientId, ClientSlot, DeliveryError};
use super::commands::HubCommand;
use super::event::Event;
use super::hub_handle::HubHandle;

pub struct HubActor {
    clients: HashMap<ClientId, ClientSlot>,
    command_rx: mpsc::UnboundedReceiver<HubCommand>,
    broadcast_count: u64,
    dropped_count: u64,
}

impl HubActor {
    /// Spawn the actor's run loop and return a handle to it
    pub fn spawn() -> HubHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = HubActor {
            clients: HashMap::new(),
            command_rx: cmd_rx,
            broadcast_count: 0,
            dropped_count: 0,
        };

        tokio::spawn(actor.run());
        debug!("Event hub spawned");

        HubHandle::new(cmd_tx)
    }

    async fn run(mut self) {
        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "Processing hub command");

            match cmd {
                HubCommand::Register { slot } => {
                    let id = slot.id();
                    self.clients.insert(id, slot);
                    info!(client = %id, clients = self.clients.len(), "Client connected");
                }
                HubCommand::Unregister { id } => {
                    if let Some(slot) = self.clients.remove(&id) {
                        slot.close();
                        info!(client = %id, clients = self.clients.len(), "Client disconnected");
                    }
                }
                HubCommand::Broadcast { event } => {
                    self.handle_broadcast(&event);
                }
                HubCommand::ClientCount { response } => {
                    let _ = response.send(self.clients.len());
                }
                HubCommand::Stop { response } => {
                    let closed = self.close_all();
                    info!(closed, "Event hub stopping");
                    let _ = response.send(());
                    break;
                }
            }
        }

        // Channel closed without Stop: every handle is gone
        self.close_all();
        debug!(
            broadcasts = self.broadcast_count,
            dropped = self.dropped_count,
            "Event hub run loop terminated"
        );
    }

    fn handle_broadcast(&mut self, event: &Arc<Event>) {
        self.broadcast_count += 1;

        let mut evicted = Vec::new();
        for (id, slot) in &self.clients {
            match slot.try_deliver(event) {
                Ok(()) => {}
                Err(DeliveryError::Full) => {
                    warn!(client = %id, event_type = %event.event_type, "Client queue full, dropping client");
                    evicted.push(*id);
                }
                Err(DeliveryError::Closed) => {
                    debug!(client = %id, "Client writer gone, removing");
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            if let Some(slot) = self.clients.remove(&id) {
                slot.close();
                self.dropped_count += 1;
            }
        }

        trace!(
            event_type = %event.event_type,
            clients = self.clients.len(),
            "Broadcast delivered"
        );
    }

    fn close_all(&mut self) -> usize {
        let count = self.clients.len();
        for (_, slot) in self.clients.drain() {
            slot.close();
        }
        count
    }
}
