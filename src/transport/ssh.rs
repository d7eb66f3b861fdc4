use super::host_keys::HostKeyVerifier;
use super::keys::decode_private_key;
use super::{PtySize, ShellTransport, TransportEvent, TransportFactory};
use crate::config::types::SshConfig;
use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Msg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg, Disconnect};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings shared by every transport the factory creates.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub term: String,
    pub verifier: HostKeyVerifier,
}

impl SshSettings {
    pub fn from_config(config: &SshConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            auth_timeout: Duration::from_secs(config.auth_timeout_secs),
            keepalive_interval: match config.keepalive_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            term: config.term.clone(),
            verifier: HostKeyVerifier::new(
                config.host_key_policy,
                config.known_hosts_path.clone(),
            ),
        }
    }
}

/// russh client callbacks. Only host key checking is customised.
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: HostKeyVerifier,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verifier.verify(&self.host, self.port, server_public_key))
    }
}

/// [`ShellTransport`] backed by a russh client connection.
pub struct SshTransport {
    settings: Arc<SshSettings>,
    handle: Option<client::Handle<ClientHandler>>,
    channel: Option<Channel<Msg>>,
    /// Output that arrived while waiting for the shell request reply.
    pending: VecDeque<TransportEvent>,
    closed: bool,
}

impl SshTransport {
    pub fn new(settings: Arc<SshSettings>) -> Self {
        Self {
            settings,
            handle: None,
            channel: None,
            pending: VecDeque::new(),
            closed: false,
        }
    }

    fn handle(&self) -> Result<&client::Handle<ClientHandler>, GatewayError> {
        if self.closed {
            return Err(GatewayError::TransportClosed);
        }
        self.handle
            .as_ref()
            .ok_or_else(|| GatewayError::Connection("not connected".to_string()))
    }

    fn channel(&self) -> Result<&Channel<Msg>, GatewayError> {
        if self.closed {
            return Err(GatewayError::TransportClosed);
        }
        self.channel.as_ref().ok_or(GatewayError::TransportClosed)
    }

    /// Wait for the reply to a `want_reply` channel request, keeping any
    /// output that races ahead of it.
    async fn await_request_reply(&mut self, what: &str) -> Result<(), GatewayError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(GatewayError::TransportClosed);
        };
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(GatewayError::Stream(format!("{} request refused", what)))
                }
                Some(ChannelMsg::Data { data }) => {
                    self.pending
                        .push_back(TransportEvent::Data(Bytes::copy_from_slice(&data)));
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    self.pending
                        .push_back(TransportEvent::Data(Bytes::copy_from_slice(&data)));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Err(GatewayError::Stream(format!(
                        "channel closed during {} request",
                        what
                    )))
                }
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl ShellTransport for SshTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::TransportClosed);
        }
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: self.settings.keepalive_interval,
            keepalive_max: 3,
            ..Default::default()
        };
        let handler = ClientHandler {
            host: host.to_string(),
            port,
            verifier: self.settings.verifier.clone(),
        };

        let connecting = client::connect(Arc::new(config), (host, port), handler);
        let handle = match tokio::time::timeout(self.settings.connect_timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(russh::Error::UnknownKey)) => {
                warn!(host = %host, port = port, "ssh connect failed: host key rejected");
                return Err(GatewayError::Connection("host key rejected".to_string()));
            }
            Ok(Err(e)) => {
                warn!(host = %host, port = port, error = %e, "ssh connect failed");
                return Err(GatewayError::Connection(e.to_string()));
            }
            Err(_) => {
                warn!(host = %host, port = port, "ssh connect failed: timed out");
                return Err(GatewayError::Connection(format!(
                    "timed out after {}s",
                    self.settings.connect_timeout.as_secs()
                )));
            }
        };

        debug!(host = %host, port = port, "ssh transport connected");
        self.handle = Some(handle);
        Ok(())
    }

    async fn authenticate(
        &mut self,
        username: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> Result<(), GatewayError> {
        let key = decode_private_key(private_key, passphrase)?;
        let auth_timeout = self.settings.auth_timeout;
        let handle = self.handle.as_mut().ok_or_else(|| {
            GatewayError::Connection("not connected".to_string())
        })?;

        let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
        let attempt = handle.authenticate_publickey(
            username,
            PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
        );
        let result = match tokio::time::timeout(auth_timeout, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(GatewayError::Authentication(e.to_string())),
            Err(_) => {
                return Err(GatewayError::Authentication(format!(
                    "timed out after {}s",
                    auth_timeout.as_secs()
                )))
            }
        };

        if result.success() {
            info!(user = %username, "ssh public key auth success");
            Ok(())
        } else {
            Err(GatewayError::Authentication(format!(
                "public key rejected for {}",
                username
            )))
        }
    }

    async fn open_shell(&mut self, pty: PtySize) -> Result<(), GatewayError> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| GatewayError::Stream(format!("failed to open channel: {}", e)))?;
        self.channel = Some(channel);

        let term = self.settings.term.clone();
        self.channel()?
            .request_pty(true, &term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(|e| GatewayError::Stream(format!("pty request failed: {}", e)))?;
        self.await_request_reply("pty").await?;

        self.channel()?
            .request_shell(true)
            .await
            .map_err(|e| GatewayError::Stream(format!("shell request failed: {}", e)))?;
        self.await_request_reply("shell").await?;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError> {
        self.channel()?
            .data(data)
            .await
            .map_err(|e| GatewayError::Stream(format!("write failed: {}", e)))
    }

    async fn resize(&mut self, pty: PtySize) -> Result<(), GatewayError> {
        self.channel()?
            .window_change(pty.cols, pty.rows, 0, 0)
            .await
            .map_err(|e| GatewayError::Stream(format!("window change failed: {}", e)))
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }
        let Some(channel) = self.channel.as_mut() else {
            return TransportEvent::Closed;
        };
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return TransportEvent::Data(Bytes::copy_from_slice(&data))
                }
                // stderr shares the terminal
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return TransportEvent::Data(Bytes::copy_from_slice(&data))
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status = exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Close) | None => return TransportEvent::Closed,
                Some(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        if let Some(channel) = self.channel.take() {
            let _ = channel.close().await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "session closed", "en")
                .await
            {
                debug!(error = %e, "ssh disconnect failed");
            }
        }
    }
}

/// Builds [`SshTransport`]s from shared settings.
pub struct SshTransportFactory {
    settings: Arc<SshSettings>,
}

impl SshTransportFactory {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl TransportFactory for SshTransportFactory {
    fn create(&self) -> Box<dyn ShellTransport> {
        Box::new(SshTransport::new(self.settings.clone()))
    }
}
