//! hbox-link-server: firmware distribution service.
//!
//! Device-facing routes sit behind the challenge-response middleware in
//! [`middleware`]; a device proves its identity with a credential produced
//! by the controller (see `hbox_link_core::identity`).

pub mod auth;
pub mod config;
pub mod error;
pub mod firmware;
pub mod middleware;
pub mod registry;
pub mod replay;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use auth::{AuthSource, AuthenticatedDevice, DeviceAuthVerifier};
pub use config::ServerConfig;
pub use error::{ApiError, AuthError};
pub use firmware::FirmwareCatalog;
pub use middleware::{require_device_auth, DeviceAuthGuard};
pub use registry::{DeviceRecord, DeviceRegistry, InMemoryRegistry};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub registry: Option<Arc<dyn DeviceRegistry>>,
    pub firmware: Arc<FirmwareCatalog>,
    pub verifier: Arc<DeviceAuthVerifier>,
}

impl AppState {
    pub fn new(
        registry: Option<Arc<dyn DeviceRegistry>>,
        firmware: FirmwareCatalog,
        challenge_expires_in: Duration,
    ) -> Self {
        let verifier = DeviceAuthVerifier::new(registry.clone(), challenge_expires_in);
        Self {
            registry,
            firmware: Arc::new(firmware),
            verifier: Arc::new(verifier),
        }
    }

    /// Wire registry and catalog as described by `config`.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let registry = match &config.device_registry {
            Some(path) => {
                let registry = InMemoryRegistry::load_json(path)?;
                tracing::info!(path = %path.display(), "device registry loaded");
                Some(Arc::new(registry) as Arc<dyn DeviceRegistry>)
            }
            None => {
                tracing::warn!("HBOX_DEVICE_REGISTRY not set; device routes will fail");
                None
            }
        };
        let firmware =
            FirmwareCatalog::from_versions(config.firmware_versions.iter().map(String::as_str));
        Ok(Self::new(registry, firmware, config.challenge_expires_in))
    }

    /// Middleware state for mounting device auth on a route, for use with
    /// `axum::middleware::from_fn_with_state(guard, require_device_auth)`.
    pub fn guard(&self, source: AuthSource) -> DeviceAuthGuard {
        DeviceAuthGuard::new(self.verifier.clone(), source)
    }
}

pub fn app(state: AppState) -> Router {
    let header_auth =
        axum::middleware::from_fn_with_state(state.guard(AuthSource::Header), require_device_auth);
    let body_auth =
        axum::middleware::from_fn_with_state(state.guard(AuthSource::Body), require_device_auth);

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/devices",
            get(routes::list_devices).route_layer(header_auth),
        )
        .route(
            "/api/firmware-check-update",
            post(routes::check_firmware_update).route_layer(body_auth),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}
