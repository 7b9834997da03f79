//! Write path and read-only endpoints
//!
//! Every successful write reads the control back and publishes exactly one
//! `mixer-update` with source `handler`. Failed writes publish nothing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ApiError, AppState};
use crate::config::ClientTuning;
use crate::mixer::{
    configured_default_device, resolve_default_device, resolve_pair, BackendError, ControlKind,
    ControlPair, Device, DeviceId, Direction,
};
use crate::sse::{Event, MixerUpdate};
use crate::state::{read_pair, ControlState, Snapshot};

// ============================================================================
// Request / response types
// ============================================================================

/// Form for `POST /control/volume`
#[derive(Debug, Deserialize)]
pub struct VolumeForm {
    pub card: Option<String>,
    pub control: Option<String>,
    pub volume: Option<String>,
}

/// Form for `POST /control/mute` and `POST /control/capture`
#[derive(Debug, Deserialize)]
pub struct SwitchForm {
    pub card: Option<String>,
    pub control: Option<String>,
    /// Client's view of the switch before the toggle (diagnostics only)
    pub muted: Option<bool>,
    pub active: Option<bool>,
}

/// Form for `POST /card/:card/control/:control/volume`
#[derive(Debug, Deserialize)]
pub struct ValueForm {
    pub value: Option<String>,
    pub volume: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MuteResponse {
    pub card: DeviceId,
    pub control: String,
    pub muted: bool,
    pub previous_muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_muted: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureResponse {
    pub card: DeviceId,
    pub control: String,
    pub active: bool,
    pub previous_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<Device>,
    /// Resolved default card
    pub default: Option<DeviceId>,
}

// ============================================================================
// Form-based control endpoints
// ============================================================================

/// POST /control/volume
pub async fn set_volume(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VolumeForm>,
) -> Result<StatusCode, ApiError> {
    let (card, control, volume) = match (form.card, form.control, form.volume) {
        (Some(card), Some(control), Some(volume)) if !control.is_empty() => (card, control, volume),
        _ => return Err(ApiError::bad_request("missing card, control, or volume")),
    };
    let card = parse_card(&card)?;
    let volume = parse_volume(&volume)?;

    write_volume(&state, card, &control, volume).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /control/mute
pub async fn toggle_mute(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SwitchForm>,
) -> Result<Json<MuteResponse>, ApiError> {
    let (card, control) = required_target(form.card, form.control)?;
    let toggled = toggle_switch(&state, card, &control, Direction::Playback).await?;

    Ok(Json(MuteResponse {
        card,
        control,
        muted: toggled.muted,
        previous_muted: toggled.previous_muted,
        client_muted: form.muted,
    }))
}

/// POST /control/capture
pub async fn toggle_capture(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SwitchForm>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let (card, control) = required_target(form.card, form.control)?;
    let toggled = toggle_switch(&state, card, &control, Direction::Capture).await?;

    Ok(Json(CaptureResponse {
        card,
        control,
        active: !toggled.muted,
        previous_active: !toggled.previous_muted,
        client_active: form.active,
    }))
}

// ============================================================================
// Path-based control endpoints
// ============================================================================

/// POST /card/:card/control/:control/volume
pub async fn card_set_volume(
    State(state): State<Arc<AppState>>,
    Path((card, control)): Path<(String, String)>,
    Form(form): Form<ValueForm>,
) -> Result<StatusCode, ApiError> {
    let card = parse_card(&card)?;
    let raw = form
        .value
        .or(form.volume)
        .ok_or_else(|| ApiError::bad_request("missing volume value"))?;
    let volume = parse_volume(&raw)?;

    write_volume(&state, card, &control, volume).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /card/:card/control/:control/mute
pub async fn card_toggle_mute(
    State(state): State<Arc<AppState>>,
    Path((card, control)): Path<(String, String)>,
) -> Result<Json<MuteResponse>, ApiError> {
    let card = parse_card(&card)?;
    let toggled = toggle_switch(&state, card, &control, Direction::Playback).await?;

    Ok(Json(MuteResponse {
        card,
        control,
        muted: toggled.muted,
        previous_muted: toggled.previous_muted,
        client_muted: None,
    }))
}

/// POST /card/:card/control/:control/capture
pub async fn card_toggle_capture(
    State(state): State<Arc<AppState>>,
    Path((card, control)): Path<(String, String)>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let card = parse_card(&card)?;
    let toggled = toggle_switch(&state, card, &control, Direction::Capture).await?;

    Ok(Json(CaptureResponse {
        card,
        control,
        active: !toggled.muted,
        previous_active: !toggled.previous_muted,
        client_active: None,
    }))
}

// ============================================================================
// Read-only endpoints
// ============================================================================

/// GET /api/state - full snapshot, for initial load and resync
pub async fn get_state(State(state): State<Arc<AppState>>) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = Snapshot::capture(state.backend.as_ref(), None).await?;
    Ok(Json(snapshot))
}

/// GET /api/devices
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DevicesResponse>, ApiError> {
    let devices = state.backend.list_devices().await?;
    let preferred = state
        .config
        .mixer
        .default_card
        .or_else(configured_default_device);
    let default = resolve_default_device(&devices, preferred);
    Ok(Json(DevicesResponse { devices, default }))
}

/// GET /api/client-config - reconciler tunables for web clients
pub async fn client_config(State(state): State<Arc<AppState>>) -> Json<ClientTuning> {
    Json(state.config.reconciler.clone())
}

/// GET /api/health
pub async fn health_check() -> &'static str {
    "ok"
}

// ============================================================================
// Shared write flows
// ============================================================================

struct Toggled {
    muted: bool,
    previous_muted: bool,
}

async fn write_volume(
    state: &AppState,
    card: DeviceId,
    control: &str,
    volume: u8,
) -> Result<(), ApiError> {
    let pair = resolve(state, card, control, None).await?;
    let name = pair.volume.as_deref().ok_or_else(|| BackendError::WrongKind {
        control: control.to_string(),
        expected: ControlKind::Volume,
    })?;

    state.backend.set_volume(card, name, &[volume]).await?;
    info!(card, control = %name, volume, "Volume set");

    let readback = match read_pair(state.backend.as_ref(), &pair).await {
        Ok(readback) => Some(readback),
        Err(e) => {
            warn!(card, control = %name, "Read-back after write failed: {}", e);
            partial_readback(state, &pair, Some(vec![volume]), None).await
        }
    };
    match readback {
        Some(readback) => publish(state, card, &pair, readback),
        None => warn!(card, control = %name, "Control state unknown after write, not publishing"),
    }
    Ok(())
}

async fn toggle_switch(
    state: &AppState,
    card: DeviceId,
    control: &str,
    prefer: Direction,
) -> Result<Toggled, ApiError> {
    let pair = resolve(state, card, control, Some(prefer)).await?;
    let name = pair.switch.as_deref().ok_or_else(|| BackendError::WrongKind {
        control: control.to_string(),
        expected: ControlKind::Switch,
    })?;

    let previous_muted = state.backend.get_mute(card, name).await?;
    let muted = !previous_muted;
    state.backend.set_mute(card, name, muted).await?;
    info!(card, control = %name, muted, "Switch toggled");

    let readback = match read_pair(state.backend.as_ref(), &pair).await {
        Ok(readback) => Some(readback),
        Err(e) => {
            warn!(card, control = %name, "Read-back after toggle failed: {}", e);
            partial_readback(state, &pair, None, Some(muted)).await
        }
    };
    let muted = match readback {
        Some(readback) => {
            let muted = readback.mute;
            publish(state, card, &pair, readback);
            muted
        }
        None => {
            warn!(card, control = %name, "Control state unknown after toggle, not publishing");
            muted
        }
    };

    Ok(Toggled {
        muted,
        previous_muted,
    })
}

/// Rebuild a pair's state from what the write confirmed plus fresh reads
/// of the other side
///
/// `None` when a side is neither known nor readable.
async fn partial_readback(
    state: &AppState,
    pair: &ControlPair,
    volume: Option<Vec<u8>>,
    mute: Option<bool>,
) -> Option<ControlState> {
    let volume = match (volume, &pair.volume) {
        (Some(volume), _) => volume,
        (None, Some(name)) => state.backend.get_volume(pair.device, name).await.ok()?,
        (None, None) => Vec::new(),
    };
    let mute = match (mute, &pair.switch) {
        (Some(mute), _) => mute,
        (None, Some(name)) => state.backend.get_mute(pair.device, name).await.ok()?,
        (None, None) => false,
    };
    Some(ControlState::new(volume, mute))
}

/// Find the pair `control` addresses, optionally preferring one direction
async fn resolve(
    state: &AppState,
    card: DeviceId,
    control: &str,
    prefer: Option<Direction>,
) -> Result<ControlPair, ApiError> {
    let controls = state.backend.list_controls(card).await?;

    if let Some(direction) = prefer {
        let preferred: Vec<_> = controls
            .iter()
            .filter(|c| c.direction == direction)
            .cloned()
            .collect();
        if let Some(pair) = resolve_pair(card, &preferred, control) {
            return Ok(pair);
        }
    }

    resolve_pair(card, &controls, control).ok_or_else(|| {
        BackendError::ControlNotFound {
            device: card,
            control: control.to_string(),
        }
        .into()
    })
}

fn publish(state: &AppState, card: DeviceId, pair: &ControlPair, readback: ControlState) {
    let update = MixerUpdate::from_write(card, pair.key(), readback);
    state.hub.broadcast(Event::mixer_update(&update));
}

fn required_target(
    card: Option<String>,
    control: Option<String>,
) -> Result<(DeviceId, String), ApiError> {
    match (card, control) {
        (Some(card), Some(control)) if !control.is_empty() => Ok((parse_card(&card)?, control)),
        _ => Err(ApiError::bad_request("missing card or control")),
    }
}

fn parse_card(raw: &str) -> Result<DeviceId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid card '{}'", raw)))
}

/// Percent in 0..=100; anything else is rejected rather than clamped
fn parse_volume(raw: &str) -> Result<u8, ApiError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid volume '{}'", raw)))?;
    if !(0..=100).contains(&value) {
        return Err(ApiError::bad_request(format!(
            "volume {} out of range 0..=100",
            value
        )));
    }
    Ok(value as u8)
}
