//! Real-time event fan-out over server-sent events
//!
//! - [`event`]: event model and text wire format
//! - [`hub`] / [`hub_handle`]: actor owning the connected clients
//! - [`client`]: per-connection queue and writer loop
//! - [`decoder`]: incremental parser for the consuming side

pub mod client;
pub mod commands;
pub mod decoder;
pub mod event;
pub mod hub;
pub mod hub_handle;

pub use client::{ClientId, ClientSlot, ExitReason, SseClient};
pub use decoder::{EventStreamDecoder, Frame};
pub use event::{ConfigChange, Event, EventData, EventSource, MixerUpdate};
pub use hub_handle::HubHandle;

/// Anything events can be published to
///
/// Implemented by [`HubHandle`]; the poller and the config watcher only
/// depend on this trait so tests can record what gets published.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: Event);
}
