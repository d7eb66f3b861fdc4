//! Per-client shell sessions: lifecycle, registry and stream bridging.

pub mod bridge;
pub mod controller;
pub mod handle;
pub mod registry;
pub mod state;

pub use bridge::{ClientSink, InputCommand, Outbound};
pub use controller::{ControllerSettings, SessionController};
pub use handle::{CloseReason, SessionHandle, SessionSnapshot, SessionTarget};
pub use registry::SessionRegistry;
pub use state::SessionState;

use serde::Serialize;
use std::fmt;

/// Identifies one browser connection. Shared by the registry and the voice
/// side-channel so both resolve the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one session instance. A client that reconnects its shell gets
/// a new `SessionId` under the same `ClientId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
