//! axum middleware that puts [`DeviceAuthVerifier`] in front of a route.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hbox_link_core::DEVICE_AUTH_HEADER;
use serde_json::Value;
use tracing::debug;

use crate::auth::{
    decode_encoded_payload, decode_query_payload, AuthSource, AuthenticatedDevice,
    DeviceAuthVerifier,
};
use crate::error::AuthError;

/// Largest body buffered while looking for `deviceAuth`.
const MAX_AUTH_BODY: usize = 1024 * 1024;

/// Middleware state: which verifier, and where to read the credential.
#[derive(Clone)]
pub struct DeviceAuthGuard {
    verifier: Arc<DeviceAuthVerifier>,
    source: AuthSource,
}

impl DeviceAuthGuard {
    pub fn new(verifier: Arc<DeviceAuthVerifier>, source: AuthSource) -> Self {
        Self { verifier, source }
    }

    /// Pull the credential out of `request`, handing back a request whose
    /// body is still readable by the route.
    async fn extract(&self, request: Request) -> Result<(Request, Option<Value>), AuthError> {
        match self.source {
            AuthSource::Header => {
                let raw = request
                    .headers()
                    .get(DEVICE_AUTH_HEADER)
                    .filter(|v| !v.is_empty())
                    .ok_or(AuthError::Missing)?
                    .to_str()
                    .map_err(|_| AuthError::InvalidFormat)?;
                let payload = decode_encoded_payload(raw)?;
                Ok((request, Some(payload)))
            }
            AuthSource::Query => {
                let payload = match Query::<HashMap<String, String>>::try_from_uri(request.uri()) {
                    Ok(Query(params)) => match params.get("deviceAuth") {
                        Some(raw) if !raw.is_empty() => Some(decode_query_payload(raw)?),
                        _ => None,
                    },
                    Err(_) => return Err(AuthError::InvalidFormat),
                };
                Ok((request, payload))
            }
            AuthSource::Body => {
                let (parts, body) = request.into_parts();
                let bytes = to_bytes(body, MAX_AUTH_BODY)
                    .await
                    .map_err(|_| AuthError::InvalidFormat)?;
                let payload = if bytes.is_empty() {
                    None
                } else {
                    let json: Value =
                        serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidFormat)?;
                    json.get("deviceAuth").cloned()
                };
                Ok((Request::from_parts(parts, Body::from(bytes)), payload))
            }
        }
    }
}

/// Use with `axum::middleware::from_fn_with_state(guard, require_device_auth)`.
pub async fn require_device_auth(
    State(guard): State<DeviceAuthGuard>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let outcome = match guard.extract(request).await {
        Ok((request, payload)) => guard
            .verifier
            .verify(payload.as_ref())
            .map(|device| (request, device)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((mut request, device)) => {
            request.extensions_mut().insert(AuthenticatedDevice(device));
            next.run(request).await
        }
        Err(e) => {
            debug!(%path, code = e.code(), source = ?guard.source, "device auth rejected");
            e.into_response()
        }
    }
}
