use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Lifecycle of one shell session.
///
/// ```text
/// Idle -> Connecting -> Authenticating -> ShellOpen -> Closing -> Closed
///            |               |
///            +---------------+--> Errored
/// ```
///
/// A session cancelled before its shell opens moves through `Closing`.
/// `Closed` and `Errored` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    ShellOpen,
    Closing,
    Closed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closing)
                | (Connecting, Authenticating)
                | (Connecting, Closing)
                | (Connecting, Errored)
                | (Authenticating, ShellOpen)
                | (Authenticating, Closing)
                | (Authenticating, Errored)
                | (ShellOpen, Closing)
                | (Closing, Closed)
        )
    }

    pub fn transition(self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::ShellOpen => "shell_open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
