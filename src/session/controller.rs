use super::bridge::{self, BridgeExit, BridgeStats, ClientSink, InputCommand};
use super::handle::{CloseReason, SessionHandle, SessionTarget};
use super::registry::SessionRegistry;
use super::state::SessionState;
use super::ClientId;
use crate::config::types::{AppConfig, DuplicateStartPolicy};
use crate::error::GatewayError;
use crate::events::ServerEvent;
use crate::metrics::MetricsRegistry;
use crate::transport::{PtySize, SessionCredentials, ShellTransport, TransportFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub duplicate_start: DuplicateStartPolicy,
    pub teardown_timeout: Duration,
    pub input_queue_capacity: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            duplicate_start: config.sessions.duplicate_start,
            teardown_timeout: Duration::from_secs(config.sessions.teardown_timeout_secs),
            input_queue_capacity: config.bridge.input_queue_capacity,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Starts and stops sessions.
///
/// Each session runs as its own task that exclusively owns the transport,
/// so no two writers ever touch the same shell stream.
pub struct SessionController {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn TransportFactory>,
    settings: ControllerSettings,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl SessionController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        factory: Arc<dyn TransportFactory>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            registry,
            factory,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Register a session for `client_id` and start connecting in the
    /// background.
    ///
    /// Progress and failures are reported to `sink`. Returns once the session
    /// is registered. With the replace policy any previous session has reached
    /// a terminal state by then; if it does not within the teardown timeout
    /// the start fails with `AlreadyActive` and nothing is spawned.
    pub async fn start(
        &self,
        client_id: ClientId,
        credentials: SessionCredentials,
        pty: PtySize,
        sink: ClientSink,
    ) -> Result<SessionHandle, GatewayError> {
        let target = SessionTarget {
            host: credentials.host.clone(),
            port: credentials.port,
            username: credentials.username.clone(),
        };
        let (handle, input_rx) = SessionHandle::new(
            client_id.clone(),
            target,
            sink,
            self.settings.input_queue_capacity,
        );

        match self.settings.duplicate_start {
            DuplicateStartPolicy::Reject => {
                if self.registry.create(handle.clone()).is_err() {
                    warn!(client_id = %client_id, "session start rejected: already active");
                    return Err(GatewayError::AlreadyActive(client_id.to_string()));
                }
            }
            DuplicateStartPolicy::Replace => loop {
                if let Some(previous) = self.registry.get(&client_id).filter(|h| h.is_live()) {
                    info!(
                        client_id = %client_id,
                        session_id = %previous.session_id(),
                        "replacing live session"
                    );
                    previous.shutdown(CloseReason::Replaced);
                    if !previous.wait_terminal(self.settings.teardown_timeout).await {
                        warn!(
                            client_id = %client_id,
                            session_id = %previous.session_id(),
                            "previous session did not close within teardown timeout"
                        );
                        return Err(GatewayError::AlreadyActive(client_id.to_string()));
                    }
                }
                // Fails only if a concurrent start registered first
                if self.registry.create(handle.clone()).is_ok() {
                    break;
                }
            },
        }

        if let Some(m) = &self.metrics {
            m.record_session_started();
        }

        let task = SessionTask {
            handle: handle.clone(),
            input_rx,
            transport: self.factory.create(),
            credentials,
            pty,
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(task.run());
        Ok(handle)
    }

    /// Close the client's session, if any, and wait for it to finish.
    pub async fn terminate(&self, client_id: &ClientId, reason: CloseReason) -> bool {
        let Some(handle) = self.registry.get(client_id) else {
            return false;
        };
        handle.shutdown(reason);
        if !handle.wait_terminal(self.settings.teardown_timeout).await {
            warn!(
                client_id = %client_id,
                session_id = %handle.session_id(),
                reason = %reason,
                "session did not close within teardown timeout"
            );
        }
        true
    }

    /// Close every session, waiting up to `timeout` for all of them.
    pub async fn terminate_all(&self, reason: CloseReason, timeout: Duration) {
        let handles = self.registry.handles();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), reason = %reason, "closing all sessions");
        for handle in &handles {
            handle.shutdown(reason);
        }
        let waits = handles.iter().map(|h| h.wait_terminal(timeout));
        futures::future::join_all(waits).await;
    }
}

enum Interrupted {
    Cancelled,
    Failed(GatewayError),
}

struct SessionTask {
    handle: SessionHandle,
    input_rx: mpsc::Receiver<InputCommand>,
    transport: Box<dyn ShellTransport>,
    credentials: SessionCredentials,
    pty: PtySize,
    registry: Arc<SessionRegistry>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl SessionTask {
    async fn run(mut self) {
        let client_id = self.handle.client_id().clone();
        let session_id = self.handle.session_id().clone();
        info!(
            client_id = %client_id,
            session_id = %session_id,
            host = %self.credentials.host,
            user = %self.credentials.username,
            "ssh session starting"
        );

        match self.establish().await {
            Ok(()) => self.bridge().await,
            Err(Interrupted::Cancelled) => {
                let reason = self.handle.close_reason().unwrap_or(CloseReason::Disconnected);
                debug!(session_id = %session_id, reason = %reason, "session cancelled during setup");
                let _ = self.handle.transition(SessionState::Closing);
                self.teardown().await;
                if let Some(m) = &self.metrics {
                    m.record_session_ended(reason.as_str(), false, 0.0);
                }
                self.handle
                    .notify(ServerEvent::SshClosed {
                        reason: reason.to_string(),
                    })
                    .await;
                let _ = self.handle.transition(SessionState::Closed);
            }
            Err(Interrupted::Failed(err)) => {
                let stage = match &err {
                    GatewayError::Authentication(_) => "ssh auth failed",
                    GatewayError::Connection(_) => "ssh connect failed",
                    _ => "ssh shell open failed",
                };
                warn!(
                    client_id = %client_id,
                    session_id = %session_id,
                    host = %self.credentials.host,
                    user = %self.credentials.username,
                    error = %err,
                    "{}", stage
                );
                self.teardown().await;
                if let Some(m) = &self.metrics {
                    m.record_error(err.kind());
                    m.record_session_ended(err.kind(), false, 0.0);
                }
                self.handle.notify(ServerEvent::ssh_error(&err)).await;
                let _ = self.handle.transition(SessionState::Errored);
            }
        }
    }

    /// Connect, authenticate and open the shell. Cancellation is honoured
    /// between and during each step.
    async fn establish(&mut self) -> Result<(), Interrupted> {
        let cancel = self.handle.cancellation_token();
        self.advance(SessionState::Connecting)?;

        let host = self.credentials.host.clone();
        let port = self.credentials.port;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            result = self.transport.connect(&host, port) => result.map_err(Interrupted::Failed)?,
        }

        self.advance(SessionState::Authenticating)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            result = self.transport.authenticate(
                &self.credentials.username,
                &self.credentials.private_key,
                self.credentials.passphrase.as_deref(),
            ) => result.map_err(Interrupted::Failed)?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            result = self.transport.open_shell(self.pty) => result.map_err(Interrupted::Failed)?,
        }

        self.advance(SessionState::ShellOpen)
    }

    fn advance(&self, next: SessionState) -> Result<(), Interrupted> {
        if self.handle.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        self.handle
            .transition(next)
            .map(|_| ())
            .map_err(|_| Interrupted::Cancelled)
    }

    async fn bridge(&mut self) {
        let client_id = self.handle.client_id().clone();
        let session_id = self.handle.session_id().clone();
        info!(
            client_id = %client_id,
            session_id = %session_id,
            host = %self.credentials.host,
            user = %self.credentials.username,
            "shell open"
        );
        if let Some(m) = &self.metrics {
            m.record_shell_open();
        }
        self.handle
            .notify(ServerEvent::SshReady {
                session_id: session_id.to_string(),
            })
            .await;

        let opened_at = Instant::now();
        let mut stats = BridgeStats::default();
        let exit = bridge::run(
            self.transport.as_mut(),
            &mut self.input_rx,
            &self.handle,
            self.metrics.as_deref(),
            &mut stats,
        )
        .await;

        let (reason, error) = match exit {
            BridgeExit::RemoteClosed => (CloseReason::RemoteClosed, None),
            BridgeExit::Cancelled => (
                self.handle.close_reason().unwrap_or(CloseReason::Disconnected),
                None,
            ),
            BridgeExit::Failed(err) => (CloseReason::StreamError, Some(err)),
        };

        let _ = self.handle.transition(SessionState::Closing);
        self.teardown().await;

        let elapsed = opened_at.elapsed();
        if let Some(err) = &error {
            warn!(
                client_id = %client_id,
                session_id = %session_id,
                error = %err,
                "ssh stream error"
            );
            if let Some(m) = &self.metrics {
                m.record_error(err.kind());
            }
            self.handle.notify(ServerEvent::ssh_error(err)).await;
        }
        info!(
            client_id = %client_id,
            session_id = %session_id,
            host = %self.credentials.host,
            user = %self.credentials.username,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            duration_ms = elapsed.as_millis() as u64,
            reason = %reason,
            "ssh session closed"
        );
        if let Some(m) = &self.metrics {
            m.record_session_ended(reason.as_str(), true, elapsed.as_secs_f64());
        }
        self.handle
            .notify(ServerEvent::SshClosed {
                reason: reason.to_string(),
            })
            .await;
        let _ = self.handle.transition(SessionState::Closed);
    }

    /// Close the transport, then drop the registry entry if it is still ours.
    async fn teardown(&mut self) {
        self.input_rx.close();
        self.transport.close().await;
        self.registry
            .remove_if_current(self.handle.client_id(), self.handle.session_id());
    }
}
