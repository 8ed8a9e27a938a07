//! Error types for hbox-link-server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why a request failed device authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credential header on a header-authenticated route.
    #[error("Device authentication required")]
    Missing,

    /// Credential absent after extraction from body or query.
    #[error("Device authentication data missing")]
    MissingData,

    #[error("Invalid authentication format")]
    InvalidFormat,

    #[error("Authentication data incomplete")]
    Incomplete,

    #[error("Device not registered")]
    NotRegistered,

    #[error("Invalid device signature")]
    InvalidSignature,

    #[error("Challenge has expired")]
    ChallengeExpired,

    /// No device registry is wired into the service.
    #[error("Storage manager not initialized")]
    RegistryUnavailable,

    /// The registry failed while looking the device up.
    #[error("Authentication server error")]
    Internal(String),
}

impl AuthError {
    /// Machine-readable code sent as `error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing | Self::MissingData => "AUTH_MISSING",
            Self::InvalidFormat => "AUTH_INVALID_FORMAT",
            Self::Incomplete => "AUTH_INCOMPLETE",
            Self::NotRegistered => "DEVICE_NOT_REGISTERED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::ChallengeExpired => "CHALLENGE_EXPIRED",
            Self::RegistryUnavailable => "SERVER_ERROR",
            Self::Internal(_) => "AUTH_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RegistryUnavailable | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// Registry backend failure.
#[derive(Debug, Clone, Error)]
#[error("device registry: {0}")]
pub struct RegistryError(pub String);

/// Errors from the JSON API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.to_string();
        let body = json!({
            "success": false,
            "message": message,
            "errNo": 1,
            "errorMessage": message,
        });
        (status, Json(body)).into_response()
    }
}
