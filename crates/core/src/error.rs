//! Error types for hbox-link-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No transport was installed before the first command was queued.
    #[error("command transport not configured")]
    TransportNotConfigured,

    /// A queue operation was attempted outside a Tokio runtime.
    #[error("no async runtime available: {0}")]
    NoRuntime(String),

    /// The device answered with a nonzero `errNo`.
    #[error("device rejected '{command}' (errNo {err_no}): {message}")]
    Device {
        command: String,
        err_no: i32,
        message: String,
    },

    /// The device did not answer in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The connection dropped while a request was pending.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// A frame or envelope could not be encoded/decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The device returned an auth payload without the required fields.
    #[error("invalid device auth response: {0}")]
    InvalidAuthResponse(String),

    /// The queued command was dropped by `CommandQueue::clear`.
    #[error("queue cleared")]
    QueueCleared,

    /// The queue went away before settling a ticket.
    #[error("queue closed before the command settled")]
    QueueClosed,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidMessage(e.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
