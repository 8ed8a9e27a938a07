//! Device-side command dispatch.
//!
//! [`MockDevice`] answers the WebSocket protocol the way the controller
//! firmware does, backed by in-memory state. It issues genuinely signed
//! credentials for `get_device_auth`, so it can stand in for hardware in
//! tests and in the CLI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::command::{Command, FirmwareChunk};
use crate::envelope::{Request, Response};
use crate::error::{Error, Result};
use crate::identity::{DeviceCredential, UniqueId};
use crate::telemetry::{BUTTON_STATE_CMD, MASK_BITS};
use crate::transport::CommandTransport;

/// Lifetime the firmware advertises for a credential, in seconds.
pub const CREDENTIAL_EXPIRES_IN: u64 = 1800;

pub const MISSING_FIELDS: &str = "missing required field cid or command";

/// Button names in trigger-mask bit order.
pub const BUTTON_NAMES: &[&str] = &[
    "DPAD_UP", "DPAD_DOWN", "DPAD_LEFT", "DPAD_RIGHT", "B1", "B2", "B3", "B4", "L1", "L2", "L3",
    "R1", "R2", "R3", "S1", "S2", "A1", "A2",
];

const FIRMWARE_VERSION: &str = "1.0.0";
const FIRMWARE_BUILD_DATE: &str = "2024-01-01";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileSummary {
    id: String,
    name: String,
    is_default: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    details: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwitchMapping {
    id: String,
    name: String,
    length: f64,
    step: f64,
    is_default: bool,
    values: Vec<u32>,
}

#[derive(Debug, Default)]
struct MarkProgress {
    mapping_id: Option<String>,
    current_step: u32,
}

#[derive(Debug, Default)]
struct UpgradeSession {
    chunks_received: u32,
    total_chunks: u32,
}

#[derive(Debug)]
struct DeviceState {
    global_config: Value,
    hotkeys_config: Value,
    profiles: Vec<ProfileSummary>,
    mappings: Vec<SwitchMapping>,
    mark: MarkProgress,
    calibration_active: bool,
    calibration_step: u32,
    calibration_completed: bool,
    monitoring: bool,
    performance_monitoring: bool,
    leds_preview: Option<Value>,
    pressed_mask: u32,
    sessions: HashMap<String, UpgradeSession>,
    next_id: u32,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            global_config: json!({
                "inputMode": "XINPUT",
                "autoCalibrationEnabled": true,
                "manualCalibrationActive": false
            }),
            hotkeys_config: json!({ "hotkeys": [] }),
            profiles: vec![ProfileSummary {
                id: "profile-0".into(),
                name: "Default".into(),
                is_default: true,
                details: Value::Null,
            }],
            mappings: Vec::new(),
            mark: MarkProgress::default(),
            calibration_active: false,
            calibration_step: 0,
            calibration_completed: false,
            monitoring: false,
            performance_monitoring: false,
            leds_preview: None,
            pressed_mask: 0,
            sessions: HashMap::new(),
            next_id: 1,
        }
    }
}

impl DeviceState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}-{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn profile_mut(&mut self, id: &str) -> std::result::Result<&mut ProfileSummary, String> {
        self.profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| format!("profile not found: {id}"))
    }

    fn mapping_index(&self, id: &str) -> std::result::Result<usize, String> {
        self.mappings
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| format!("mapping not found: {id}"))
    }
}

/// In-memory controller that speaks the device protocol.
pub struct MockDevice {
    unique_id: UniqueId,
    booted_at: Instant,
    next_cid: AtomicU32,
    state: Mutex<DeviceState>,
}

impl MockDevice {
    pub fn new(unique_id: UniqueId) -> Self {
        Self {
            unique_id,
            booted_at: Instant::now(),
            next_cid: AtomicU32::new(1),
            state: Mutex::new(DeviceState::default()),
        }
    }

    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    pub fn device_id(&self) -> String {
        self.unique_id.device_id()
    }

    /// Milliseconds since boot, wrapping like the MCU tick counter.
    pub fn tick(&self) -> u32 {
        (self.booted_at.elapsed().as_millis() & u128::from(u32::MAX)) as u32
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate physical button presses (bit `i` = `BUTTON_NAMES[i]`).
    pub fn set_pressed_mask(&self, mask: u32) {
        self.lock().pressed_mask = mask;
    }

    /// The button-state push frame the device would emit right now, if
    /// monitoring is on.
    pub fn button_state_frame(&self) -> Option<Vec<u8>> {
        let state = self.lock();
        if !state.monitoring {
            return None;
        }
        let mut frame = vec![BUTTON_STATE_CMD, 1];
        frame.extend_from_slice(&state.pressed_mask.to_le_bytes());
        frame.push(BUTTON_NAMES.len() as u8);
        frame.push(0);
        Some(frame)
    }

    /// Handle one raw text frame.
    pub fn handle_text(&self, text: &str) -> Response {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_message(&value),
            Err(e) => Response::error(Some(0), "", format!("invalid JSON: {e}")),
        }
    }

    /// Validate, route and answer one request envelope.
    pub fn handle_message(&self, message: &Value) -> Response {
        let cid = message
            .get("cid")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .filter(|&c| c != 0);
        let name = message
            .get("command")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        let (Some(cid), Some(name)) = (cid, name) else {
            return Response::error(Some(cid.unwrap_or(0)), name.unwrap_or(""), MISSING_FIELDS);
        };

        let command = match Command::from_parts(name, message.get("params")) {
            Ok(c) => c,
            Err(e) => {
                debug!(cid, command = name, error = %e, "rejected request");
                return Response::error(Some(cid), name, e.to_string());
            }
        };

        trace!(cid, command = name, "dispatching");
        match self.execute(command) {
            Ok(data) => Response::success(Some(cid), name, data),
            Err(message) => Response::error(Some(cid), name, message),
        }
    }

    fn execute(&self, command: Command) -> std::result::Result<Value, String> {
        let mut state = self.lock();
        let data = match command {
            Command::GetGlobalConfig => json!({ "globalConfig": state.global_config }),
            Command::UpdateGlobalConfig { global_config } => {
                merge_object(&mut state.global_config, global_config)?;
                json!({ "globalConfig": state.global_config })
            }
            Command::GetHotkeysConfig => json!({ "hotkeysConfig": state.hotkeys_config }),
            Command::UpdateHotkeysConfig { hotkeys_config } => {
                merge_object(&mut state.hotkeys_config, hotkeys_config)?;
                json!({ "hotkeysConfig": state.hotkeys_config })
            }
            Command::Reboot => json!({ "message": "rebooting" }),
            Command::PushLedsConfig(config) => {
                state.leds_preview = Some(config);
                json!({ "message": "leds preview applied" })
            }
            Command::ClearLedsPreview => {
                let was_active = state.leds_preview.take().is_some();
                json!({ "message": "leds preview cleared", "wasActive": was_active })
            }

            Command::GetProfileList => json!({
                "profileList": {
                    "defaultId": default_profile_id(&state.profiles),
                    "items": state.profiles,
                }
            }),
            Command::GetDefaultProfile => {
                let profile = state.profiles.iter().find(|p| p.is_default);
                json!({ "profileDetails": profile })
            }
            Command::UpdateProfile {
                profile_id,
                profile_details,
            } => {
                let profile = state.profile_mut(&profile_id)?;
                if let Some(name) = profile_details.get("name").and_then(Value::as_str) {
                    profile.name = name.to_string();
                }
                profile.details = profile_details;
                json!({ "profileDetails": profile })
            }
            Command::CreateProfile { profile_name } => {
                let id = state.fresh_id("profile");
                state.profiles.push(ProfileSummary {
                    id: id.clone(),
                    name: profile_name,
                    is_default: false,
                    details: Value::Null,
                });
                json!({ "profileId": id })
            }
            Command::DeleteProfile { profile_id } => {
                let index = state
                    .profiles
                    .iter()
                    .position(|p| p.id == profile_id)
                    .ok_or_else(|| format!("profile not found: {profile_id}"))?;
                if state.profiles.len() == 1 {
                    return Err("cannot delete the last profile".into());
                }
                let removed = state.profiles.remove(index);
                if removed.is_default {
                    state.profiles[0].is_default = true;
                }
                json!({ "profileId": profile_id })
            }
            Command::SwitchDefaultProfile { profile_id } => {
                state.profile_mut(&profile_id)?;
                for profile in &mut state.profiles {
                    profile.is_default = profile.id == profile_id;
                }
                json!({ "profileId": profile_id })
            }

            Command::MsGetList => json!({ "mappingList": state.mappings }),
            Command::MsGetMarkStatus => json!({
                "status": {
                    "isMarking": state.mark.mapping_id.is_some(),
                    "mappingId": state.mark.mapping_id,
                    "currentStep": state.mark.current_step,
                }
            }),
            Command::MsSetDefault { id } => {
                state.mapping_index(&id)?;
                for mapping in &mut state.mappings {
                    mapping.is_default = mapping.id == id;
                }
                json!({ "id": id })
            }
            Command::MsGetDefault => {
                let mapping = state.mappings.iter().find(|m| m.is_default);
                json!({ "id": mapping.map(|m| m.id.clone()) })
            }
            Command::MsCreateMapping { name, length, step } => {
                if !(length > 0.0 && step > 0.0 && step <= length) {
                    return Err(format!("invalid mapping range: length {length}, step {step}"));
                }
                let id = state.fresh_id("mapping");
                let is_default = state.mappings.is_empty();
                state.mappings.push(SwitchMapping {
                    id: id.clone(),
                    name,
                    length,
                    step,
                    is_default,
                    values: Vec::new(),
                });
                json!({ "id": id })
            }
            Command::MsDeleteMapping { id } => {
                let index = state.mapping_index(&id)?;
                let removed = state.mappings.remove(index);
                if removed.is_default {
                    if let Some(first) = state.mappings.first_mut() {
                        first.is_default = true;
                    }
                }
                json!({ "id": id })
            }
            Command::MsRenameMapping { id, name } => {
                let index = state.mapping_index(&id)?;
                state.mappings[index].name = name;
                json!({ "id": id })
            }
            Command::MsMarkMappingStart { id } => {
                let index = state.mapping_index(&id)?;
                state.mappings[index].values.clear();
                state.mark = MarkProgress {
                    mapping_id: Some(id.clone()),
                    current_step: 0,
                };
                json!({ "id": id, "currentStep": 0 })
            }
            Command::MsMarkMappingStop => {
                state.mark = MarkProgress::default();
                json!({ "isMarking": false })
            }
            Command::MsMarkMappingStep => {
                let id = state
                    .mark
                    .mapping_id
                    .clone()
                    .ok_or_else(|| "mapping mark not started".to_string())?;
                let index = state.mapping_index(&id)?;
                let mapping = &state.mappings[index];
                let total_steps = (mapping.length / mapping.step).floor() as u32 + 1;
                let sample = state.mark.current_step * 100;
                state.mappings[index].values.push(sample);
                state.mark.current_step += 1;
                let done = state.mark.current_step >= total_steps;
                if done {
                    state.mark = MarkProgress::default();
                }
                json!({ "id": id, "currentStep": state.mark.current_step, "isCompleted": done })
            }
            Command::MsGetMapping { id } => {
                let index = state.mapping_index(&id)?;
                json!({ "mapping": state.mappings[index] })
            }

            Command::StartManualCalibration => {
                state.calibration_active = true;
                state.calibration_step = 1;
                state.calibration_completed = false;
                set_flag(&mut state.global_config, "manualCalibrationActive", true);
                json!({ "status": "active" })
            }
            Command::StopManualCalibration => {
                if state.calibration_active {
                    state.calibration_completed = true;
                }
                state.calibration_active = false;
                state.calibration_step = 0;
                set_flag(&mut state.global_config, "manualCalibrationActive", false);
                json!({ "status": "stopped" })
            }
            Command::GetCalibrationStatus => json!({
                "calibrationStatus": {
                    "isActive": state.calibration_active,
                    "step": state.calibration_step,
                }
            }),
            Command::ClearManualCalibrationData => {
                state.calibration_completed = false;
                json!({ "message": "calibration data cleared" })
            }
            Command::CheckIsManualCalibrationCompleted => {
                json!({ "isCompleted": state.calibration_completed })
            }

            Command::StartButtonMonitoring => {
                state.monitoring = true;
                json!({ "status": "active", "isActive": true })
            }
            Command::StopButtonMonitoring => {
                state.monitoring = false;
                state.performance_monitoring = false;
                json!({ "status": "stopped", "isActive": false })
            }
            Command::StartButtonPerformanceMonitoring => {
                state.monitoring = true;
                state.performance_monitoring = true;
                json!({ "status": "active", "isTestModeEnabled": true })
            }
            Command::StopButtonPerformanceMonitoring => {
                state.performance_monitoring = false;
                json!({ "status": "stopped", "isTestModeEnabled": false })
            }
            Command::GetButtonStates => {
                let mask = state.pressed_mask;
                let states: serde_json::Map<String, Value> = BUTTON_NAMES
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let pressed = (i as u32) < MASK_BITS && mask & (1 << i) != 0;
                        (name.to_string(), Value::Bool(pressed))
                    })
                    .collect();
                json!({
                    "buttonStates": states,
                    "triggerMask": mask,
                    "totalButtons": BUTTON_NAMES.len(),
                    "isTestModeEnabled": state.performance_monitoring,
                })
            }

            Command::GetDeviceAuth => {
                let credential = DeviceCredential::issue(&self.unique_id, self.tick());
                json!({
                    "deviceId": credential.device_id,
                    "originalUniqueId": credential.original_unique_id,
                    "challenge": credential.challenge,
                    "timestamp": credential.timestamp,
                    "signature": credential.signature,
                    "expiresIn": CREDENTIAL_EXPIRES_IN,
                })
            }
            Command::GetFirmwareMetadata => json!({
                "firmwareMetadata": {
                    "version": FIRMWARE_VERSION,
                    "buildDate": FIRMWARE_BUILD_DATE,
                    "deviceId": self.unique_id.device_id(),
                    "originalUniqueId": self.unique_id.to_string(),
                }
            }),
            Command::CreateFirmwareUpgradeSession { session_id, .. } => {
                state
                    .sessions
                    .insert(session_id.clone(), UpgradeSession::default());
                json!({ "session_id": session_id, "status": "created" })
            }
            Command::UploadFirmwareChunk(chunk) => upload_chunk(&mut state, chunk)?,
            Command::CompleteFirmwareUpgradeSession { session_id } => {
                let session = state
                    .sessions
                    .get(&session_id)
                    .ok_or_else(|| format!("session not found: {session_id}"))?;
                if session.chunks_received < session.total_chunks {
                    return Err(format!(
                        "session {session_id} incomplete: {}/{} chunks",
                        session.chunks_received, session.total_chunks
                    ));
                }
                json!({ "success": true, "session_id": session_id })
            }
            Command::AbortFirmwareUpgradeSession { session_id } => {
                state.sessions.remove(&session_id);
                json!({ "session_id": session_id, "status": "aborted" })
            }
            Command::GetFirmwareUpgradeStatus { session_id } => match state.sessions.get(&session_id) {
                Some(s) => json!({
                    "session_id": session_id,
                    "status": "uploading",
                    "chunksReceived": s.chunks_received,
                    "totalChunks": s.total_chunks,
                }),
                None => json!({ "session_id": session_id, "status": "idle" }),
            },
            Command::CleanupFirmwareUpgradeSession { session_id } => {
                state.sessions.remove(&session_id);
                json!({ "session_id": session_id, "status": "cleaned" })
            }

            Command::Ping => json!({ "message": "pong", "timestamp": self.tick() }),
        };
        Ok(data)
    }
}

fn upload_chunk(state: &mut DeviceState, chunk: FirmwareChunk) -> std::result::Result<Value, String> {
    let session = state
        .sessions
        .get_mut(&chunk.session_id)
        .ok_or_else(|| format!("session not found: {}", chunk.session_id))?;
    if chunk.chunk_index >= chunk.total_chunks {
        return Err(format!(
            "chunk index {} out of range (total {})",
            chunk.chunk_index, chunk.total_chunks
        ));
    }
    session.total_chunks = chunk.total_chunks;
    session.chunks_received += 1;
    Ok(json!({
        "success": true,
        "session_id": chunk.session_id,
        "component_name": chunk.component_name,
        "chunk_index": chunk.chunk_index,
    }))
}

fn default_profile_id(profiles: &[ProfileSummary]) -> Option<&str> {
    profiles.iter().find(|p| p.is_default).map(|p| p.id.as_str())
}

/// Shallow-merge `patch` into the object `target`.
fn merge_object(target: &mut Value, patch: Value) -> std::result::Result<(), String> {
    let Value::Object(patch) = patch else {
        return Err("config must be a JSON object".into());
    };
    if let Value::Object(target) = target {
        target.extend(patch);
    }
    Ok(())
}

fn set_flag(target: &mut Value, key: &str, on: bool) {
    if let Value::Object(map) = target {
        map.insert(key.to_string(), Value::Bool(on));
    }
}

impl CommandTransport for MockDevice {
    fn send(&self, command: Command) -> BoxFuture<'_, Result<Value>> {
        async move {
            let cid = self.next_cid.fetch_add(1, Ordering::Relaxed).max(1);
            let request = serde_json::to_value(Request::new(cid, &command))?;
            let response = self.handle_message(&request);
            if response.is_success() {
                Ok(response.data.unwrap_or_else(|| json!({})))
            } else {
                Err(Error::Device {
                    command: response.command.clone(),
                    err_no: response.err_no,
                    message: response.error_message().unwrap_or_default().to_string(),
                })
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> MockDevice {
        MockDevice::new(UniqueId::new(0x1234_5678, 0x9ABC_DEF0, 0x0FED_CBA9))
    }

    fn call(dev: &MockDevice, cid: u32, command: &str, params: Value) -> Response {
        dev.handle_message(&json!({ "cid": cid, "command": command, "params": params }))
    }

    #[test]
    fn missing_cid_or_command_is_rejected() {
        let dev = device();
        for msg in [
            json!({ "command": "ping" }),
            json!({ "cid": 0, "command": "ping" }),
            json!({ "cid": 4 }),
            json!({ "cid": 4, "command": "" }),
        ] {
            let resp = dev.handle_message(&msg);
            assert_eq!(resp.err_no, -1);
            assert_eq!(resp.error_message(), Some(MISSING_FIELDS));
        }
    }

    #[test]
    fn unknown_command_is_named() {
        let resp = call(&device(), 5, "self_destruct", Value::Null);
        assert_eq!(resp.cid, Some(5));
        assert_eq!(resp.error_message(), Some("unknown command: self_destruct"));
    }

    #[test]
    fn invalid_params_are_reported() {
        let resp = call(&device(), 6, "delete_profile", json!({ "id": 1 }));
        assert_eq!(resp.err_no, -1);
        assert!(resp
            .error_message()
            .unwrap()
            .starts_with("invalid params for delete_profile"));
    }

    #[test]
    fn success_echoes_cid_and_command() {
        let resp = call(&device(), 42, "ping", Value::Null);
        assert_eq!(resp.cid, Some(42));
        assert_eq!(resp.command, "ping");
        assert_eq!(resp.err_no, 0);
        assert_eq!(resp.data.unwrap()["message"], "pong");
    }

    #[test]
    fn handle_text_rejects_garbage() {
        let resp = device().handle_text("{oops");
        assert_eq!(resp.err_no, -1);
        assert!(resp.error_message().unwrap().starts_with("invalid JSON"));
    }

    #[test]
    fn global_config_is_merged() {
        let dev = device();
        let resp = call(
            &dev,
            1,
            "update_global_config",
            json!({ "globalConfig": { "inputMode": "SWITCH" } }),
        );
        assert!(resp.is_success());
        let data = call(&dev, 2, "get_global_config", Value::Null).data.unwrap();
        assert_eq!(data["globalConfig"]["inputMode"], "SWITCH");
        assert_eq!(data["globalConfig"]["autoCalibrationEnabled"], true);

        let resp = call(&dev, 3, "update_global_config", json!({ "globalConfig": 7 }));
        assert_eq!(resp.err_no, -1);
    }

    #[test]
    fn profile_lifecycle() {
        let dev = device();
        let created = call(&dev, 1, "create_profile", json!({ "profileName": "FPS" }));
        let id = created.data.unwrap()["profileId"].as_str().unwrap().to_string();

        assert!(call(&dev, 2, "switch_default_profile", json!({ "profileId": id })).is_success());
        let list = call(&dev, 3, "get_profile_list", Value::Null).data.unwrap();
        assert_eq!(list["profileList"]["defaultId"], id.as_str());
        assert_eq!(list["profileList"]["items"].as_array().unwrap().len(), 2);

        assert!(call(&dev, 4, "delete_profile", json!({ "profileId": id })).is_success());
        let default = call(&dev, 5, "get_default_profile", Value::Null).data.unwrap();
        assert_eq!(default["profileDetails"]["id"], "profile-0");

        let last = call(&dev, 6, "delete_profile", json!({ "profileId": "profile-0" }));
        assert_eq!(last.err_no, -1);
        let missing = call(&dev, 7, "switch_default_profile", json!({ "profileId": "nope" }));
        assert_eq!(missing.error_message(), Some("profile not found: nope"));
    }

    #[test]
    fn mapping_mark_walks_every_step() {
        let dev = device();
        let created = call(
            &dev,
            1,
            "ms_create_mapping",
            json!({ "name": "Linear", "length": 4.0, "step": 2.0 }),
        );
        let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

        assert_eq!(call(&dev, 2, "ms_mark_mapping_step", Value::Null).err_no, -1);
        assert!(call(&dev, 3, "ms_mark_mapping_start", json!({ "id": id })).is_success());
        for expected_done in [false, false, true] {
            let step = call(&dev, 4, "ms_mark_mapping_step", Value::Null).data.unwrap();
            assert_eq!(step["isCompleted"], expected_done);
        }
        let mapping = call(&dev, 5, "ms_get_mapping", json!({ "id": id })).data.unwrap();
        assert_eq!(mapping["mapping"]["values"], json!([0, 100, 200]));
        assert_eq!(mapping["mapping"]["isDefault"], true);
    }

    #[test]
    fn calibration_completes_on_stop() {
        let dev = device();
        call(&dev, 1, "start_manual_calibration", Value::Null);
        let status = call(&dev, 2, "get_calibration_status", Value::Null).data.unwrap();
        assert_eq!(status["calibrationStatus"]["isActive"], true);
        call(&dev, 3, "stop_manual_calibration", Value::Null);
        let done = call(&dev, 4, "check_is_manual_calibration_completed", Value::Null);
        assert_eq!(done.data.unwrap()["isCompleted"], true);
    }

    #[test]
    fn monitoring_controls_push_frames() {
        let dev = device();
        dev.set_pressed_mask(0b101);
        assert!(dev.button_state_frame().is_none());

        call(&dev, 1, "start_button_monitoring", Value::Null);
        let frame = dev.button_state_frame().unwrap();
        let decoded = crate::telemetry::decode_button_state(&frame).unwrap();
        assert_eq!(decoded.trigger_mask, 0b101);
        assert_eq!(usize::from(decoded.total_buttons), BUTTON_NAMES.len());

        let states = call(&dev, 2, "get_button_states", Value::Null).data.unwrap();
        assert_eq!(states["buttonStates"]["DPAD_UP"], true);
        assert_eq!(states["buttonStates"]["DPAD_DOWN"], false);
        assert_eq!(states["buttonStates"]["DPAD_LEFT"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn device_auth_is_signed() {
        let dev = device();
        tokio::time::advance(std::time::Duration::from_millis(0x1234)).await;

        let data = call(&dev, 1, "get_device_auth", Value::Null).data.unwrap();
        assert_eq!(data["deviceId"], "BD4683746A06D565");
        assert_eq!(data["challenge"], "DEV_00001234_A5A5B791");
        assert_eq!(data["signature"], "SIG_19A00F46");
        assert_eq!(data["expiresIn"], 1800);

        let cred: DeviceCredential = serde_json::from_value(data).unwrap();
        assert!(cred.is_signature_valid());
    }

    #[test]
    fn firmware_session_requires_every_chunk() {
        let dev = device();
        call(&dev, 1, "create_firmware_upgrade_session", json!({ "session_id": "s1" }));
        let chunk = |index: u32| {
            json!({
                "session_id": "s1",
                "component_name": "application",
                "chunk_index": index,
                "total_chunks": 2,
                "target_address": "0x90000000",
                "chunk_size": 4,
                "chunk_offset": index * 4,
                "checksum": "00",
                "data": "AAAAAA=="
            })
        };
        assert!(call(&dev, 2, "upload_firmware_chunk", chunk(0)).is_success());
        assert_eq!(
            call(&dev, 3, "complete_firmware_upgrade_session", json!({ "session_id": "s1" })).err_no,
            -1
        );
        assert!(call(&dev, 4, "upload_firmware_chunk", chunk(1)).is_success());
        assert!(call(&dev, 5, "complete_firmware_upgrade_session", json!({ "session_id": "s1" })).is_success());
        assert_eq!(call(&dev, 6, "upload_firmware_chunk", chunk(5)).err_no, -1);
    }

    #[tokio::test]
    async fn transport_maps_errors() {
        let dev = device();
        let pong = dev.send(Command::Ping).await.unwrap();
        assert_eq!(pong["message"], "pong");

        let err = dev
            .send(Command::DeleteProfile {
                profile_id: "missing".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Device { ref message, .. } if message == "profile not found: missing"));
    }
}
