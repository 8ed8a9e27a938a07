//! Service configuration from the environment (`.env` honoured).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::auth::DEFAULT_EXPIRES_IN;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// How long a challenge stays reusable after first use.
    pub challenge_expires_in: Duration,
    /// JSON file of registered devices. `None` leaves the registry unset.
    pub device_registry: Option<PathBuf>,
    pub firmware_versions: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("HBOX_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("HBOX_BIND_ADDR must be host:port")?;

        let challenge_expires_in = match lookup("HBOX_CHALLENGE_EXPIRES_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .context("HBOX_CHALLENGE_EXPIRES_SECS must be whole seconds")?,
            ),
            None => DEFAULT_EXPIRES_IN,
        };

        let device_registry = lookup("HBOX_DEVICE_REGISTRY")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let firmware_versions = lookup("HBOX_FIRMWARE_VERSIONS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            challenge_expires_in,
            device_registry,
            firmware_versions,
        })
    }
}
