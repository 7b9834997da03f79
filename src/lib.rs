//! mixer-web - keeps many browser clients in sync with sound card controls
//!
//! A background poller observes the mixer and publishes changes; HTTP writes
//! publish the state they produced; every connected client receives both over
//! a server-sent event stream and reconciles them with local interaction.

pub mod api;
pub mod config;
pub mod mixer;
pub mod reconcile;
pub mod sse;
pub mod state;
