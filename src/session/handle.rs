use super::bridge::{ClientSink, InputCommand};
use super::state::{InvalidTransition, SessionState};
use super::{ClientId, SessionId};
use crate::error::GatewayError;
use crate::events::ServerEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Why a session was asked to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Logout,
    Disconnected,
    Replaced,
    Shutdown,
    RemoteClosed,
    StreamError,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Logout => "logout",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Replaced => "replaced",
            CloseReason::Shutdown => "shutdown",
            CloseReason::RemoteClosed => "remote_closed",
            CloseReason::StreamError => "stream_error",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a session connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// Point-in-time view of a session for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Shared reference to a running session.
///
/// Cloning is cheap. The transport itself is owned by the session task; a
/// handle can only queue input, observe state and request shutdown.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    client_id: ClientId,
    session_id: SessionId,
    target: SessionTarget,
    state_tx: watch::Sender<SessionState>,
    input_tx: mpsc::Sender<InputCommand>,
    sink: ClientSink,
    cancel: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    created_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
}

impl SessionHandle {
    /// Create a handle in `Idle` plus the receiving end of its input queue.
    pub fn new(
        client_id: ClientId,
        target: SessionTarget,
        sink: ClientSink,
        input_capacity: usize,
    ) -> (SessionHandle, mpsc::Receiver<InputCommand>) {
        let (input_tx, input_rx) = mpsc::channel(input_capacity.max(1));
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let now = Utc::now();
        let handle = SessionHandle {
            inner: Arc::new(HandleInner {
                client_id,
                session_id: SessionId::generate(),
                target,
                state_tx,
                input_tx,
                sink,
                cancel: CancellationToken::new(),
                close_reason: Mutex::new(None),
                created_at: now,
                last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            }),
        };
        (handle, input_rx)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn sink(&self) -> &ClientSink {
        &self.inner.sink
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        let mut result = Ok(next);
        self.inner.state_tx.send_if_modified(|current| match current.transition(next) {
            Ok(state) => {
                *current = state;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Queue input for the transport, preserving submission order.
    ///
    /// Fails with `TransportClosed` once the session has started closing.
    pub async fn send_input(&self, command: InputCommand) -> Result<(), GatewayError> {
        if self.inner.cancel.is_cancelled() || self.state().is_terminal() {
            return Err(GatewayError::TransportClosed);
        }
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(GatewayError::TransportClosed),
            sent = self.inner.input_tx.send(command) => {
                sent.map_err(|_| GatewayError::TransportClosed)
            }
        }
    }

    pub async fn notify(&self, event: ServerEvent) {
        self.inner.sink.notify(event).await;
    }

    /// Ask the session task to close. The first reason wins.
    pub fn shutdown(&self, reason: CloseReason) {
        if let Ok(mut slot) = self.inner.close_reason.lock() {
            slot.get_or_insert(reason);
        }
        self.inner.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().ok().and_then(|slot| *slot)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Wait until the session reaches `Closed` or `Errored`.
    /// Returns false if the timeout expired first.
    pub async fn wait_terminal(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        let waiting = rx.wait_for(|state| state.is_terminal());
        let reached = matches!(tokio::time::timeout(timeout, waiting).await, Ok(Ok(_)));
        reached
    }

    pub fn touch(&self) {
        self.inner
            .last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.inner.last_activity_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(self.inner.created_at)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            client_id: self.inner.client_id.clone(),
            session_id: self.inner.session_id.clone(),
            host: self.inner.target.host.clone(),
            port: self.inner.target.port,
            username: self.inner.target.username.clone(),
            state: self.state(),
            created_at: self.inner.created_at,
            last_activity_at: self.last_activity(),
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("client_id", &self.inner.client_id)
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .finish()
    }
}
