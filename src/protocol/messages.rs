//! Wire messages.
//!
//! JSON objects tagged by `"type"`, field names in camelCase:
//!
//! ```json
//! {"type": "terminal.create", "clientTerminalId": "t1", "cols": 80, "rows": 24}
//! {"type": "terminal.ready", "clientTerminalId": "t1", "resumptionToken": "…",
//!  "isNew": true, "pid": 4242}
//! ```
//!
//! Payload fields that need typed validation (dimensions, input data) are
//! kept as raw JSON values here and checked in [`super::validation`], so a
//! wrong type produces a typed error rather than a parse failure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::pty::ExitStatus;
use crate::session::SessionEvent;
use crate::Result;

/// Client -> server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "terminal.create")]
    Create {
        client_terminal_id: String,
        #[serde(default)]
        cols: Option<Value>,
        #[serde(default)]
        rows: Option<Value>,
        #[serde(default)]
        resumption_token: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    #[serde(rename = "terminal.input")]
    Input {
        client_terminal_id: String,
        #[serde(default)]
        data: Value,
    },
    #[serde(rename = "terminal.resize")]
    Resize {
        client_terminal_id: String,
        #[serde(default)]
        cols: Value,
        #[serde(default)]
        rows: Value,
    },
    #[serde(rename = "terminal.close")]
    Close { client_terminal_id: String },
    #[serde(rename = "terminal.detach")]
    Detach { client_terminal_id: String },
    #[serde(rename = "terminal.cwd")]
    Cwd { client_terminal_id: String },
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::InvalidInput(e.to_string()))
    }

    pub fn terminal_id(&self) -> Option<&str> {
        match self {
            Self::Create {
                client_terminal_id, ..
            }
            | Self::Input {
                client_terminal_id, ..
            }
            | Self::Resize {
                client_terminal_id, ..
            }
            | Self::Close { client_terminal_id }
            | Self::Detach { client_terminal_id }
            | Self::Cwd { client_terminal_id } => Some(client_terminal_id),
            Self::Ping => None,
        }
    }
}

/// Best-effort extraction of `clientTerminalId` from a frame that failed
/// to parse, so the error reply can still be attributed.
pub fn terminal_id_hint(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value
        .get("clientTerminalId")?
        .as_str()
        .map(str::to_string)
}

/// Server -> client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "terminal.ready")]
    Ready {
        client_terminal_id: String,
        resumption_token: String,
        is_new: bool,
        pid: u32,
    },
    #[serde(rename = "terminal.data")]
    Data {
        client_terminal_id: String,
        data: String,
    },
    #[serde(rename = "terminal.exit")]
    Exit {
        client_terminal_id: String,
        exit_code: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },
    #[serde(rename = "terminal.cwd")]
    Cwd {
        client_terminal_id: String,
        path: String,
    },
    #[serde(rename = "terminal.error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_terminal_id: Option<String>,
        code: String,
        message: String,
    },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    pub fn error(terminal_id: Option<&str>, err: &RelayError) -> Self {
        Self::Error {
            client_terminal_id: terminal_id.map(str::to_string),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn exit(terminal_id: impl Into<String>, status: ExitStatus) -> Self {
        Self::Exit {
            client_terminal_id: terminal_id.into(),
            exit_code: status.code,
            signal: status.signal,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RelayError::Io(e.into()))
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Data { terminal_id, data } => Self::Data {
                client_terminal_id: terminal_id,
                data,
            },
            SessionEvent::Exit {
                terminal_id,
                status,
            } => Self::exit(terminal_id, status),
            SessionEvent::Cwd { terminal_id, path } => Self::Cwd {
                client_terminal_id: terminal_id,
                path,
            },
            SessionEvent::Failed {
                terminal_id,
                code,
                message,
            } => Self::Error {
                client_terminal_id: Some(terminal_id),
                code: code.to_string(),
                message,
            },
        }
    }
}
