//! Mixer state observation
//!
//! Snapshots of the hardware, the differences between them, and the poller
//! that turns those differences into `mixer-update` events.

mod delta;
pub mod poller;
mod snapshot;

pub use delta::{Delta, Removal};
pub use poller::{Poller, PollerHandle, PollerStats, TickOutcome};
pub use snapshot::{read_pair, ControlState, DeviceState, Snapshot};
