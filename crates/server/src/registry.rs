//! Registered device lookup.
//!
//! Devices are registered out of band by an administrator; the verifier only
//! reads from the registry.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// A provisioned device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    /// `XXXXXXXX-XXXXXXXX-XXXXXXXX` form of the MCU unique id.
    pub raw_unique_id: String,
    pub device_name: String,
    pub register_time: DateTime<Utc>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".to_string()
}

/// Read access to the device registry.
pub trait DeviceRegistry: Send + Sync {
    fn find_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, RegistryError>;
    fn devices(&self) -> Result<Vec<DeviceRecord>, RegistryError>;
}

/// Registry held in memory, optionally loaded from a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl InMemoryRegistry {
    pub fn new(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        Self {
            devices: records
                .into_iter()
                .map(|r| (r.device_id.clone(), r))
                .collect(),
        }
    }

    /// Load a JSON array of device records, or an object with a `devices` array.
    pub fn load_json(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum File {
            List(Vec<DeviceRecord>),
            Wrapped { devices: Vec<DeviceRecord> },
        }

        let records = match serde_json::from_str::<File>(text)
            .map_err(|e| RegistryError(format!("invalid registry file: {e}")))?
        {
            File::List(records) | File::Wrapped { devices: records } => records,
        };
        Ok(Self::new(records))
    }
}

impl DeviceRegistry for InMemoryRegistry {
    fn find_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        Ok(self.devices.get(device_id).cloned())
    }

    fn devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let mut all: Vec<DeviceRecord> = self.devices.values().cloned().collect();
        all.sort_by(|a, b| a.register_time.cmp(&b.register_time));
        Ok(all)
    }
}
