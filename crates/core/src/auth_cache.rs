//! Short-lived device credential cache.
//!
//! The distribution server only accepts fresh device credentials, so the
//! client fetches one with `get_device_auth` right before a privileged HTTP
//! call and reuses it for [`VALIDITY_WINDOW`]. Concurrent callers share a
//! single in-flight refresh.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::identity::DeviceCredential;
use crate::transport::CommandTransport;

/// How long a fetched credential is reused.
pub const VALIDITY_WINDOW: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy)]
pub struct AuthCacheConfig {
    pub validity: Duration,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            validity: VALIDITY_WINDOW,
        }
    }
}

/// A credential plus the moment it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthInfo {
    pub credential: DeviceCredential,
    pub obtained_at: Instant,
}

impl DeviceAuthInfo {
    pub fn is_fresh(&self, validity: Duration) -> bool {
        self.obtained_at.elapsed() < validity
    }

    /// Header value for the `x-device-auth` HTTP header.
    pub fn header_value(&self) -> Result<String> {
        self.credential.to_header_value()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCacheStatus {
    pub has_cached: bool,
    pub is_expired: bool,
    /// Time left before the cached credential expires; zero when absent.
    #[serde(with = "millis")]
    pub remaining: Duration,
    pub is_refreshing: bool,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

type Refresh = Shared<BoxFuture<'static, Option<DeviceAuthInfo>>>;

#[derive(Default)]
struct State {
    cached: Option<DeviceAuthInfo>,
    refreshing: Option<Refresh>,
}

/// Cache of the device's current credential.
#[derive(Clone)]
pub struct DeviceAuthCache {
    transport: Arc<dyn CommandTransport>,
    config: AuthCacheConfig,
    state: Arc<Mutex<State>>,
}

impl DeviceAuthCache {
    pub fn new(transport: Arc<dyn CommandTransport>, config: AuthCacheConfig) -> Self {
        Self {
            transport,
            config,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a fresh credential, fetching one from the device if needed.
    ///
    /// `None` means the device could not produce a usable credential; the
    /// caller should ask the user to reconnect.
    pub async fn get_valid_auth(&self) -> Option<DeviceAuthInfo> {
        let refresh = {
            let mut state = self.lock();
            if let Some(pending) = &state.refreshing {
                debug!("joining in-flight device auth refresh");
                pending.clone()
            } else if let Some(info) = state
                .cached
                .as_ref()
                .filter(|info| info.is_fresh(self.config.validity))
            {
                return Some(info.clone());
            } else {
                let refresh = fetch_credential(self.transport.clone(), self.state.clone())
                    .boxed()
                    .shared();
                state.refreshing = Some(refresh.clone());
                refresh
            }
        };
        refresh.await
    }

    /// Drop the cached credential.
    pub fn clear_cache(&self) {
        self.lock().cached = None;
        debug!("device auth cache cleared");
    }

    /// React to the server rejecting a credential: clear and fetch once more.
    pub async fn handle_auth_error(
        &self,
        error: &(dyn std::error::Error + Send + Sync),
    ) -> Option<DeviceAuthInfo> {
        warn!(%error, "device auth rejected, refetching");
        self.clear_cache();
        self.get_valid_auth().await
    }

    pub fn cache_status(&self) -> AuthCacheStatus {
        let state = self.lock();
        let (has_cached, remaining) = match &state.cached {
            Some(info) => (
                true,
                self.config.validity.saturating_sub(info.obtained_at.elapsed()),
            ),
            None => (false, Duration::ZERO),
        };
        AuthCacheStatus {
            has_cached,
            is_expired: has_cached && remaining.is_zero(),
            remaining,
            is_refreshing: state.refreshing.is_some(),
        }
    }
}

async fn fetch_credential(
    transport: Arc<dyn CommandTransport>,
    state: Arc<Mutex<State>>,
) -> Option<DeviceAuthInfo> {
    let fetched = match transport.send(Command::GetDeviceAuth).await {
        Ok(data) => parse_auth_response(data),
        Err(e) => Err(e),
    };

    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.refreshing = None;
    match fetched {
        Ok(credential) => {
            info!(device_id = %credential.device_id, "device auth refreshed");
            let info = DeviceAuthInfo {
                credential,
                obtained_at: Instant::now(),
            };
            state.cached = Some(info.clone());
            Some(info)
        }
        Err(e) => {
            warn!(error = %e, "device auth refresh failed");
            state.cached = None;
            None
        }
    }
}

/// Validate a `get_device_auth` reply.
fn parse_auth_response(data: Value) -> Result<DeviceCredential> {
    let credential: DeviceCredential = serde_json::from_value(data)
        .map_err(|e| Error::InvalidAuthResponse(e.to_string()))?;

    let missing: Vec<&str> = [
        ("deviceId", credential.device_id.is_empty()),
        ("challenge", credential.challenge.is_empty()),
        ("signature", credential.signature.is_empty()),
    ]
    .into_iter()
    .filter_map(|(field, empty)| empty.then_some(field))
    .collect();

    if !missing.is_empty() {
        return Err(Error::InvalidAuthResponse(format!(
            "missing {}",
            missing.join(", ")
        )));
    }
    Ok(credential)
}
