//! Command enum for the hub actor
//!
//! Hot-path commands (register, unregister, broadcast) are fire-and-forget;
//! queries carry a oneshot for the reply.

use std::sync::Arc;
use tokio::sync::oneshot;

use super::client::{ClientId, ClientSlot};
use super::event::Event;

pub enum HubCommand {
    // -------------------------------------------------------------------------
    // Hot path (no response)
    // -------------------------------------------------------------------------
    /// Add a client to the active set
    Register { slot: ClientSlot },

    /// Remove a client and close it; no-op for unknown ids
    Unregister { id: ClientId },

    /// Fan an event out to every active client
    Broadcast { event: Arc<Event> },

    // -------------------------------------------------------------------------
    // Request-response
    // -------------------------------------------------------------------------
    /// Number of active clients
    ClientCount { response: oneshot::Sender<usize> },

    /// Close every client and end the run loop
    Stop { response: oneshot::Sender<()> },
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubCommand::Register { slot } => f
                .debug_struct("Register")
                .field("id", &slot.id())
                .finish(),
            HubCommand::Unregister { id } => {
                f.debug_struct("Unregister").field("id", id).finish()
            }
            HubCommand::Broadcast { event } => f
                .debug_struct("Broadcast")
                .field("event_type", &event.event_type)
                .finish(),
            HubCommand::ClientCount { .. } => f.debug_struct("ClientCount").finish_non_exhaustive(),
            HubCommand::Stop { .. } => f.debug_struct("Stop").finish_non_exhaustive(),
        }
    }
}
