//! JSON messages exchanged with the browser over the real-time channel.
//!
//! Every text frame is an object tagged by `event`. Shell output travels as
//! binary frames and never appears here.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    StartSsh(StartSshRequest),
    TerminalInput { command: String },
    Resize { cols: u32, rows: u32 },
    Logout,
}

#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StartSshRequest {
    pub host: String,
    pub username: String,
    #[serde(alias = "privateKey", alias = "private_key")]
    pub sshkey: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub cols: Option<u32>,
    #[serde(default)]
    pub rows: Option<u32>,
}

impl fmt::Debug for StartSshRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartSshRequest")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("sshkey", &"***")
            .field("port", &self.port)
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .finish()
    }
}

/// Notifications sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected {
        client_id: String,
    },
    SshReady {
        session_id: String,
    },
    SshError {
        kind: String,
        error: String,
    },
    SshClosed {
        reason: String,
    },
    VoiceCommand {
        transcription: String,
        command: String,
    },
    VoiceError {
        error: String,
    },
    InputRejected {
        error: String,
    },
}

impl ServerEvent {
    pub fn ssh_error(err: &GatewayError) -> Self {
        ServerEvent::SshError {
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of these plain string variants cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Parse a text frame from the browser.
pub fn parse_client_event(text: &str) -> Result<ClientEvent, GatewayError> {
    serde_json::from_str(text).map_err(|e| GatewayError::InvalidInput(e.to_string()))
}
