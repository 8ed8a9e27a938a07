//! WebSocket text envelopes.
//!
//! Client → device: `{cid, command, params?}`.
//! Device → client: `{cid?, command, errNo, data?}`; `errNo == 0` is success.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::command::Command;
use crate::error::Result;

/// `errNo` for a successful reply.
pub const ERR_NO_OK: i32 = 0;
/// `errNo` the device uses for every failure it reports.
pub const ERR_NO_FAILED: i32 = -1;

/// An outbound command with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub cid: u32,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(cid: u32, command: &Command) -> Self {
        let params = command.params();
        Self {
            cid,
            command: command.name().to_string(),
            params: if params.is_null() { None } else { Some(params) },
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A device reply, or an unsolicited notification when `cid` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<u32>,
    #[serde(default)]
    pub command: String,
    #[serde(rename = "errNo")]
    pub err_no: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(cid: Option<u32>, command: impl Into<String>, data: Value) -> Self {
        Self {
            cid,
            command: command.into(),
            err_no: ERR_NO_OK,
            data: Some(data),
        }
    }

    /// Failure reply; the message travels as `data.errorMessage`.
    pub fn error(cid: Option<u32>, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cid,
            command: command.into(),
            err_no: ERR_NO_FAILED,
            data: Some(json!({ "errorMessage": message.into() })),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err_no == ERR_NO_OK
    }

    pub fn error_message(&self) -> Option<&str> {
        self.data.as_ref()?.get("errorMessage")?.as_str()
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
