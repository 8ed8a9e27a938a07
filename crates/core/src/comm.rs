//! Error classification and retry for device commands.
//!
//! The channel heartbeat and the CLI `status` command use this to decide
//! whether a failed command is worth sending again.

use serde_json::Value;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::transport::CommandTransport;

/// Maximum retry attempts for transient errors.
pub const MAX_RETRIES: u32 = 3;

/// Classification of communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry (timeout).
    Transient,
    /// Socket is gone; reconnect before retrying.
    Disconnected,
    /// The device understood and refused the command.
    Protocol,
    /// Reply could not be decoded or lacked required fields.
    InvalidResponse,
    /// Local misuse: no transport, no runtime, queue torn down.
    Configuration,
}

impl ErrorClass {
    /// Classify an error for retry decisions.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Timeout(_) => Self::Transient,
            Error::Disconnected(_) => Self::Disconnected,
            Error::Device { .. } => Self::Protocol,
            Error::InvalidMessage(_) | Error::InvalidAuthResponse(_) => Self::InvalidResponse,
            Error::TransportNotConfigured
            | Error::NoRuntime(_)
            | Error::QueueCleared
            | Error::QueueClosed => Self::Configuration,
        }
    }

    /// Whether this error class is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Send a command, retrying transient failures.
///
/// Returns the reply data, or the last error after exhausting retries.
pub async fn send_with_retry(
    transport: &dyn CommandTransport,
    command: &Command,
    max_retries: u32,
) -> Result<Value> {
    let mut attempt = 0;
    loop {
        match transport.send(command.clone()).await {
            Ok(data) => {
                if attempt > 0 {
                    debug!(command = command.name(), attempt = attempt + 1, "command succeeded after retry");
                }
                return Ok(data);
            }
            Err(e) => {
                let class = ErrorClass::classify(&e);
                if !class.is_retryable() || attempt == max_retries {
                    warn!(
                        command = command.name(),
                        ?class,
                        attempt = attempt + 1,
                        max = max_retries + 1,
                        error = %e,
                        "command failed"
                    );
                    return Err(e);
                }
                debug!(
                    command = command.name(),
                    attempt = attempt + 1,
                    error = %e,
                    "transient error, retrying"
                );
                attempt += 1;
            }
        }
    }
}

/// Device connection status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    /// The device answered, but with an error, or not in time.
    Error,
}

/// Check connectivity with a single `ping`.
pub async fn check_device_status(transport: &dyn CommandTransport) -> DeviceStatus {
    match transport.send(Command::Ping).await {
        Ok(_) => DeviceStatus::Connected,
        Err(ref e) => match ErrorClass::classify(e) {
            ErrorClass::Disconnected | ErrorClass::Configuration => DeviceStatus::Disconnected,
            _ => DeviceStatus::Error,
        },
    }
}
