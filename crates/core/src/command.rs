//! The closed set of control commands the device understands.
//!
//! On the wire a command is a name plus an optional `params` object; here it
//! is a single enum value so dispatch can match exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A control command with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum Command {
    // Global settings
    GetGlobalConfig,
    #[serde(rename_all = "camelCase")]
    UpdateGlobalConfig {
        global_config: Value,
    },
    GetHotkeysConfig,
    #[serde(rename_all = "camelCase")]
    UpdateHotkeysConfig {
        hotkeys_config: Value,
    },
    Reboot,
    PushLedsConfig(Value),
    ClearLedsPreview,

    // Profiles
    GetProfileList,
    GetDefaultProfile,
    #[serde(rename_all = "camelCase")]
    UpdateProfile {
        profile_id: String,
        profile_details: Value,
    },
    #[serde(rename_all = "camelCase")]
    CreateProfile {
        profile_name: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteProfile {
        profile_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SwitchDefaultProfile {
        profile_id: String,
    },

    // Magnetic switch travel mappings
    MsGetList,
    MsGetMarkStatus,
    MsSetDefault {
        id: String,
    },
    MsGetDefault,
    MsCreateMapping {
        name: String,
        length: f64,
        step: f64,
    },
    MsDeleteMapping {
        id: String,
    },
    MsRenameMapping {
        id: String,
        name: String,
    },
    MsMarkMappingStart {
        id: String,
    },
    MsMarkMappingStop,
    MsMarkMappingStep,
    MsGetMapping {
        id: String,
    },

    // Calibration
    StartManualCalibration,
    StopManualCalibration,
    GetCalibrationStatus,
    ClearManualCalibrationData,
    CheckIsManualCalibrationCompleted,

    // Button monitoring
    StartButtonMonitoring,
    StopButtonMonitoring,
    StartButtonPerformanceMonitoring,
    StopButtonPerformanceMonitoring,
    GetButtonStates,

    // Firmware and identity
    GetDeviceAuth,
    GetFirmwareMetadata,
    CreateFirmwareUpgradeSession {
        session_id: String,
        #[serde(default)]
        manifest: Value,
    },
    UploadFirmwareChunk(FirmwareChunk),
    CompleteFirmwareUpgradeSession {
        session_id: String,
    },
    AbortFirmwareUpgradeSession {
        session_id: String,
    },
    GetFirmwareUpgradeStatus {
        session_id: String,
    },
    CleanupFirmwareUpgradeSession {
        session_id: String,
    },

    Ping,
}

/// One base64 chunk of a firmware component upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareChunk {
    pub session_id: String,
    pub component_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// `0x`-prefixed flash address.
    pub target_address: String,
    pub chunk_size: u32,
    pub chunk_offset: u32,
    pub checksum: String,
    pub data: String,
}

/// Every command name, in dispatch-table order.
pub const COMMAND_NAMES: &[&str] = &[
    "get_global_config",
    "update_global_config",
    "get_hotkeys_config",
    "update_hotkeys_config",
    "reboot",
    "push_leds_config",
    "clear_leds_preview",
    "get_profile_list",
    "get_default_profile",
    "update_profile",
    "create_profile",
    "delete_profile",
    "switch_default_profile",
    "ms_get_list",
    "ms_get_mark_status",
    "ms_set_default",
    "ms_get_default",
    "ms_create_mapping",
    "ms_delete_mapping",
    "ms_rename_mapping",
    "ms_mark_mapping_start",
    "ms_mark_mapping_stop",
    "ms_mark_mapping_step",
    "ms_get_mapping",
    "start_manual_calibration",
    "stop_manual_calibration",
    "get_calibration_status",
    "clear_manual_calibration_data",
    "check_is_manual_calibration_completed",
    "start_button_monitoring",
    "stop_button_monitoring",
    "start_button_performance_monitoring",
    "stop_button_performance_monitoring",
    "get_button_states",
    "get_device_auth",
    "get_firmware_metadata",
    "create_firmware_upgrade_session",
    "upload_firmware_chunk",
    "complete_firmware_upgrade_session",
    "abort_firmware_upgrade_session",
    "get_firmware_upgrade_status",
    "cleanup_firmware_upgrade_session",
    "ping",
];

/// Why a name/params pair did not form a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("invalid params for {command}: {reason}")]
    InvalidParams { command: String, reason: String },
}

impl Command {
    /// Wire name of the command. Also the coalescing key in the queue.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetGlobalConfig => "get_global_config",
            Self::UpdateGlobalConfig { .. } => "update_global_config",
            Self::GetHotkeysConfig => "get_hotkeys_config",
            Self::UpdateHotkeysConfig { .. } => "update_hotkeys_config",
            Self::Reboot => "reboot",
            Self::PushLedsConfig(_) => "push_leds_config",
            Self::ClearLedsPreview => "clear_leds_preview",
            Self::GetProfileList => "get_profile_list",
            Self::GetDefaultProfile => "get_default_profile",
            Self::UpdateProfile { .. } => "update_profile",
            Self::CreateProfile { .. } => "create_profile",
            Self::DeleteProfile { .. } => "delete_profile",
            Self::SwitchDefaultProfile { .. } => "switch_default_profile",
            Self::MsGetList => "ms_get_list",
            Self::MsGetMarkStatus => "ms_get_mark_status",
            Self::MsSetDefault { .. } => "ms_set_default",
            Self::MsGetDefault => "ms_get_default",
            Self::MsCreateMapping { .. } => "ms_create_mapping",
            Self::MsDeleteMapping { .. } => "ms_delete_mapping",
            Self::MsRenameMapping { .. } => "ms_rename_mapping",
            Self::MsMarkMappingStart { .. } => "ms_mark_mapping_start",
            Self::MsMarkMappingStop => "ms_mark_mapping_stop",
            Self::MsMarkMappingStep => "ms_mark_mapping_step",
            Self::MsGetMapping { .. } => "ms_get_mapping",
            Self::StartManualCalibration => "start_manual_calibration",
            Self::StopManualCalibration => "stop_manual_calibration",
            Self::GetCalibrationStatus => "get_calibration_status",
            Self::ClearManualCalibrationData => "clear_manual_calibration_data",
            Self::CheckIsManualCalibrationCompleted => "check_is_manual_calibration_completed",
            Self::StartButtonMonitoring => "start_button_monitoring",
            Self::StopButtonMonitoring => "stop_button_monitoring",
            Self::StartButtonPerformanceMonitoring => "start_button_performance_monitoring",
            Self::StopButtonPerformanceMonitoring => "stop_button_performance_monitoring",
            Self::GetButtonStates => "get_button_states",
            Self::GetDeviceAuth => "get_device_auth",
            Self::GetFirmwareMetadata => "get_firmware_metadata",
            Self::CreateFirmwareUpgradeSession { .. } => "create_firmware_upgrade_session",
            Self::UploadFirmwareChunk(_) => "upload_firmware_chunk",
            Self::CompleteFirmwareUpgradeSession { .. } => "complete_firmware_upgrade_session",
            Self::AbortFirmwareUpgradeSession { .. } => "abort_firmware_upgrade_session",
            Self::GetFirmwareUpgradeStatus { .. } => "get_firmware_upgrade_status",
            Self::CleanupFirmwareUpgradeSession { .. } => "cleanup_firmware_upgrade_session",
            Self::Ping => "ping",
        }
    }

    /// The `params` object, or `Value::Null` for commands without payload.
    pub fn params(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("params").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Build a command from its wire name and params.
    ///
    /// Commands that take no payload ignore whatever params accompany them.
    pub fn from_parts(name: &str, params: Option<&Value>) -> Result<Self, CommandParseError> {
        if !COMMAND_NAMES.contains(&name) {
            return Err(CommandParseError::Unknown(name.to_string()));
        }

        let bare = serde_json::json!({ "command": name });
        let with_params = match params {
            Some(p) if !p.is_null() => {
                let mut v = bare.clone();
                v["params"] = p.clone();
                Some(v)
            }
            _ => None,
        };

        let attempt = with_params.unwrap_or_else(|| bare.clone());
        match serde_json::from_value::<Command>(attempt) {
            Ok(cmd) => Ok(cmd),
            Err(first) => serde_json::from_value::<Command>(bare).map_err(|_| {
                CommandParseError::InvalidParams {
                    command: name.to_string(),
                    reason: first.to_string(),
                }
            }),
        }
    }
}
