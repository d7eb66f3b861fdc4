use thiserror::Error;

/// Errors produced by the session gateway.
///
/// Connection, authentication and stream errors end the affected session.
/// Transcription and target errors belong to the side-channel and never do.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("session already active for client {0}")]
    AlreadyActive(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("no active shell session for client {0}")]
    TargetNotFound(String),

    #[error("transport is closed")]
    TransportClosed,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GatewayError {
    /// Stable identifier used on the wire and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Connection(_) => "connection_error",
            GatewayError::Authentication(_) => "authentication_error",
            GatewayError::Stream(_) => "stream_error",
            GatewayError::AlreadyActive(_) => "already_active",
            GatewayError::Transcription(_) => "transcription_error",
            GatewayError::TargetNotFound(_) => "target_not_found",
            GatewayError::TransportClosed => "transport_closed",
            GatewayError::InvalidInput(_) => "invalid_input",
        }
    }

    /// True for errors that terminate the session they occur in.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_)
                | GatewayError::Authentication(_)
                | GatewayError::Stream(_)
                | GatewayError::TransportClosed
        )
    }
}
