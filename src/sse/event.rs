//! Server-sent event model and text wire encoding
//!
//! ```text
//! id: <optional>
//! event: <type>
//! data: <line 1>
//! data: <line 2>
//!                  <- blank line terminates the event
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::mixer::DeviceId;
use crate::state::{ControlState, Delta, Removal, Snapshot};

/// Event type for mixer state changes
pub const MIXER_UPDATE: &str = "mixer-update";
/// Event type for ALSA configuration file changes
pub const CONFIG_CHANGE: &str = "config-change";
/// Keep-alive comment written when the stream is otherwise idle
pub const HEARTBEAT: &str = ": heartbeat\n\n";
/// Comment written as soon as a stream opens
pub const CONNECTED: &str = ": connected\n\n";

/// Where a change originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// A write through this server's HTTP handlers
    Handler,
    /// The background hardware poller
    Monitor,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Handler => write!(f, "handler"),
            EventSource::Monitor => write!(f, "monitor"),
        }
    }
}

/// Payload of a `mixer-update` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerUpdate {
    /// Changed controls
    pub state: Snapshot,
    pub source: EventSource,
    /// Control that was written (handler events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Removal>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl MixerUpdate {
    /// Update published by the poller for a non-empty delta
    pub fn from_delta(delta: Delta) -> Self {
        Self {
            state: delta.changed,
            source: EventSource::Monitor,
            control: None,
            removed: delta.removed,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Update published by the write path for one control
    pub fn from_write(device: DeviceId, control: &str, state: ControlState) -> Self {
        Self {
            state: Snapshot::single(device, control, state),
            source: EventSource::Handler,
            control: Some(control.to_string()),
            removed: Vec::new(),
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }
}

/// Payload of a `config-change` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub path: String,
}

/// Event body
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// Serialized as compact JSON
    Json(Value),
    /// Sent as-is (line breaks become separate `data:` lines)
    Text(String),
}

/// One published event
///
/// Immutable once created; the hub shares a single `Arc<Event>` between all
/// client queues.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub data: EventData,
    pub id: Option<String>,
    pub source: Option<EventSource>,
}

impl Event {
    /// Event with a JSON body
    pub fn json(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data: EventData::Json(data),
            id: None,
            source: None,
        }
    }

    /// Event with a raw text body
    pub fn text(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: EventData::Text(data.into()),
            id: None,
            source: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn mixer_update(update: &MixerUpdate) -> Self {
        let data = match serde_json::to_value(update) {
            Ok(value) => EventData::Json(value),
            Err(e) => {
                warn!("Failed to serialize mixer update: {}", e);
                EventData::Text(format!("error: {}", e))
            }
        };
        Self {
            event_type: MIXER_UPDATE.to_string(),
            data,
            id: None,
            source: Some(update.source),
        }
    }

    pub fn config_change(path: impl Into<String>) -> Self {
        Self::json(CONFIG_CHANGE, serde_json::json!({ "path": path.into() }))
    }

    /// Encode in the event-stream text format
    pub fn encode(&self) -> String {
        let mut out = String::new();

        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            out.push_str("id: ");
            out.push_str(&strip_newlines(id));
            out.push('\n');
        }

        if !self.event_type.is_empty() {
            out.push_str("event: ");
            out.push_str(&strip_newlines(&self.event_type));
            out.push('\n');
        }

        let body = match &self.data {
            EventData::Json(value) => value.to_string(),
            EventData::Text(text) => text.replace("\r\n", "\n").replace('\r', "\n"),
        };

        for line in body.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');

        out
    }
}

fn strip_newlines(field: &str) -> String {
    field.replace(['\r', '\n'], " ")
}
