//! Client-side reconciliation
//!
//! Decides, per control, whether an incoming `mixer-update` entry replaces the
//! value a user is looking at. A control being dragged ignores every update;
//! right after release it ignores hardware echoes (`monitor`) but accepts
//! relayed writes (`handler`), so the user's own value is never reverted by a
//! stale poll.

mod interaction;
mod reconciler;
mod throttle;

pub use interaction::{Interaction, InteractionTracker, Verdict};
pub use reconciler::{
    ApplyReport, Reconciler, ReconcilerConfig, ReconcilerStats, WriteAction, WriteRequest,
};
pub use throttle::WriteThrottle;

use crate::mixer::DeviceId;

/// Address of one rendered control
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlKey {
    pub device: DeviceId,
    pub control: String,
}

impl ControlKey {
    pub fn new(device: DeviceId, control: impl Into<String>) -> Self {
        Self {
            device,
            control: control.into(),
        }
    }
}

impl std::fmt::Display for ControlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device, self.control)
    }
}
