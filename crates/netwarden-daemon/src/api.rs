//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use netwarden_core::{Alarm, Credentials, Device, DeviceId, DeviceType, Graph, NETCONF_PORT};
use netwarden_discovery::TriggerOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::state::AppState;

/// Shown for alarms whose device is no longer in the inventory
const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Alarm with the name of the device that raised it
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmView {
    #[serde(flatten)]
    alarm: Alarm,
    device_name: String,
}

#[derive(Serialize)]
pub struct SnapshotResponse {
    #[serde(flatten)]
    graph: Graph,
    alarms: Vec<AlarmView>,
}

async fn alarm_views(state: &AppState) -> Vec<AlarmView> {
    let names: HashMap<DeviceId, String> = state
        .devices()
        .await
        .into_iter()
        .map(|d| (d.id, d.name))
        .collect();

    state
        .alarms
        .list()
        .await
        .into_iter()
        .map(|alarm| {
            let device_name = names
                .get(&alarm.device_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
            AlarmView { alarm, device_name }
        })
        .collect()
}

/// Reconciled topology graph plus current alarms
pub async fn get_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let graph = match state.graph().await {
        Ok(graph) => graph,
        Err(e) => {
            error!(error = %e, "Failed to build topology graph");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(format!("Failed to read snapshots: {}", e))),
            )
                .into_response();
        }
    };

    let alarms = alarm_views(&state).await;
    Json(SnapshotResponse { graph, alarms }).into_response()
}

/// Ask for an immediate poll of every device
pub async fn trigger_fetch(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outcome = state.scheduler.trigger_now();
    info!(outcome = ?outcome, "Manual poll requested");

    let status = match outcome {
        TriggerOutcome::Queued => "queued",
        TriggerOutcome::Coalesced => "coalesced",
    };
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": status })),
    )
}

/// List inventory devices (secrets omitted)
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    #[default]
    Password,
    Key,
}

/// Body of `POST /api/devices`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceRequest {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(alias = "address")]
    ip: String,
    #[serde(default = "default_port")]
    port: u16,
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "type")]
    device_type: DeviceType,
    #[serde(default)]
    auth_type: AuthType,
    #[serde(default)]
    ssh_key: Option<String>,
}

fn default_port() -> u16 {
    NETCONF_PORT
}

impl AddDeviceRequest {
    fn into_device(self) -> Result<Device, String> {
        if self.id.trim().is_empty() {
            return Err("Device id must not be empty".to_string());
        }
        if self.ip.trim().is_empty() {
            return Err("Device address must not be empty".to_string());
        }

        let credentials = match self.auth_type {
            AuthType::Password => Credentials::Password {
                user: self.username,
                secret: self.password.unwrap_or_default(),
            },
            AuthType::Key => match self.ssh_key {
                Some(key) if !key.trim().is_empty() => Credentials::PrivateKey {
                    user: self.username,
                    key_material: key,
                },
                _ => return Err("authType KEY requires sshKey".to_string()),
            },
        };

        Ok(Device {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: DeviceId::new(self.id),
            address: self.ip,
            port: self.port,
            credentials,
            declared_type: self.device_type,
        })
    }
}

/// Add a device to the inventory and poll it
pub async fn add_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddDeviceRequest>,
) -> impl IntoResponse {
    let device = match req.into_device() {
        Ok(device) => device,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(ApiError::new(msg))).into_response(),
    };
    let id = device.id.clone();

    match state.add_device(device).await {
        Some(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "success": true,
                "id": id,
            })),
        )
            .into_response(),
        None => (
            StatusCode::CONFLICT,
            Json(ApiError::new(format!("Device '{}' already exists", id))),
        )
            .into_response(),
    }
}

/// Remove a device, its snapshot and its alarms
pub async fn remove_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    if state.remove_device(&id).await {
        Json(serde_json::json!({
            "success": true,
            "id": id,
        }))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response()
    }
}

pub async fn list_alarms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(alarm_views(&state).await)
}

/// Acknowledge (delete) an alarm
pub async fn delete_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.alarms.remove(&id).await {
        Json(serde_json::json!({ "success": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Alarm not found")),
        )
            .into_response()
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}
