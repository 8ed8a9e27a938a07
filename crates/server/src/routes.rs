//! HTTP handlers.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::auth::AuthenticatedDevice;
use crate::error::ApiError;
use crate::firmware::Version;
use crate::AppState;

pub const SERVICE_VERSION: &str = "1.0.0";

const VERSION_REQUIRED: &str = "current version is required";
const VERSION_FORMAT: &str =
    "version format error, must be three-digit version format (e.g. 1.0.0)";

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "HBox firmware server is running",
        "timestamp": now_iso(),
        "version": SERVICE_VERSION,
    }))
}

pub async fn list_devices(
    State(state): State<AppState>,
    Extension(AuthenticatedDevice(caller)): Extension<AuthenticatedDevice>,
) -> Result<Json<Value>, ApiError> {
    let registry = state
        .registry
        .as_ref()
        .ok_or_else(|| ApiError::Internal("device registry not configured".into()))?;
    let devices = registry.devices()?;
    info!(caller = %caller.device_id, total = devices.len(), "device list requested");
    Ok(Json(json!({
        "success": true,
        "data": devices,
        "total": devices.len(),
        "timestamp": now_iso(),
    })))
}

pub async fn check_firmware_update(
    State(state): State<AppState>,
    Extension(AuthenticatedDevice(caller)): Extension<AuthenticatedDevice>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let current = match body.get("currentVersion") {
        Some(Value::String(s)) if !s.is_empty() => s.trim().to_string(),
        None | Some(Value::Null | Value::Bool(false) | Value::String(_)) => {
            return Err(ApiError::BadRequest(VERSION_REQUIRED.into()))
        }
        Some(_) => return Err(ApiError::BadRequest(VERSION_FORMAT.into())),
    };
    let parsed =
        Version::parse(&current).ok_or_else(|| ApiError::BadRequest(VERSION_FORMAT.into()))?;

    let newer = state.firmware.newer_than(parsed);
    let mut data = json!({
        "currentVersion": current,
        "updateAvailable": !newer.is_empty(),
        "updateCount": newer.len(),
        "checkTime": now_iso(),
    });

    let message = match newer.first() {
        Some(latest) => {
            data["latestVersion"] = json!(latest.version);
            data["latestFirmware"] = serde_json::to_value(latest)
                .map_err(|e| ApiError::Internal(format!("firmware record: {e}")))?;
            data["availableUpdates"] =
                Value::Array(newer.iter().map(|r| r.summary()).collect());
            format!(
                "found {} updates, latest version: {}",
                newer.len(),
                latest.version
            )
        }
        None => "current version is the latest".to_string(),
    };

    info!(
        device_id = %caller.device_id,
        current = %current,
        updates = newer.len(),
        "firmware update check"
    );

    Ok(Json(json!({
        "success": true,
        "errNo": 0,
        "data": data,
        "message": message,
    })))
}
