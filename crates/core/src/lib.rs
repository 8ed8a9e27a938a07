//! hbox-link-core: device protocol layer for the HBox controller.
//!
//! This crate provides the client side of the controller's WebSocket
//! protocol (command queue, cid-correlated channel, credential cache,
//! telemetry decoding) and the identity hashing shared with the
//! distribution server.

pub mod auth_cache;
pub mod channel;
pub mod comm;
pub mod command;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod queue;
pub mod telemetry;
pub mod transport;

pub use auth_cache::{DeviceAuthCache, DeviceAuthInfo};
pub use channel::CommandChannel;
pub use command::Command;
pub use dispatch::MockDevice;
pub use error::{Error, Result};
pub use identity::{DeviceCredential, UniqueId};
pub use queue::{CommandQueue, QueueReply};
pub use transport::CommandTransport;

/// Header carrying the base64-JSON device credential on HTTP requests.
pub const DEVICE_AUTH_HEADER: &str = "x-device-auth";
