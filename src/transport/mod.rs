//! Remote shell transport adapter.
//!
//! A [`ShellTransport`] wraps exactly one outbound secure-shell connection and
//! its interactive shell stream. The session controller owns one instance per
//! session and never shares it.

pub mod host_keys;
pub mod keys;
pub mod ssh;

use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Connection parameters received once at session start.
///
/// Key material is wiped from memory when the value is dropped and is never
/// printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionCredentials {
    #[zeroize(skip)]
    pub host: String,
    #[zeroize(skip)]
    pub port: u16,
    #[zeroize(skip)]
    pub username: String,
    pub private_key: String,
    pub passphrase: Option<String>,
}

impl SessionCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            private_key: private_key.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase;
        self
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &"***")
            .finish()
    }
}

/// Terminal dimensions requested for the remote pty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Events surfaced by a transport once its shell is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of shell output, in arrival order.
    Data(Bytes),
    /// The remote side closed the shell stream.
    Closed,
    /// The connection failed mid-stream.
    Error(String),
}

/// One remote shell connection.
///
/// `connect` followed by `authenticate` establishes the session; `open_shell`
/// starts the interactive stream. `close` is idempotent and always tears down
/// the network connection, including when no shell was ever opened. Writes
/// after `close` return [`GatewayError::TransportClosed`] instead of panicking.
#[async_trait]
pub trait ShellTransport: Send {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), GatewayError>;

    async fn authenticate(
        &mut self,
        username: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn open_shell(&mut self, pty: PtySize) -> Result<(), GatewayError>;

    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError>;

    async fn resize(&mut self, pty: PtySize) -> Result<(), GatewayError> {
        let _ = pty;
        Ok(())
    }

    /// Wait for the next event. Must be cancel-safe: dropping the future
    /// loses no data.
    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

/// Creates fresh, unconnected transports.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn ShellTransport>;
}
