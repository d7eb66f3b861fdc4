//! The browser's real-time channel.
//!
//! Each WebSocket gets a fresh client id, announced in the first frame. JSON
//! text frames carry control events; shell output goes back as binary
//! frames. Both directions share one bounded outbound queue drained by a
//! writer task, so notifications and output stay in production order.

use crate::api::AppState;
use crate::error::GatewayError;
use crate::events::{parse_client_event, ClientEvent, ServerEvent, StartSshRequest};
use crate::session::{ClientId, ClientSink, CloseReason, InputCommand, Outbound};
use crate::transport::{PtySize, SessionCredentials};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long the writer may keep flushing after the reader has gone.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let client_id = ClientId::generate();
    let (sink, outbound_rx) = ClientSink::channel(
        state.config.bridge.output_queue_capacity,
        Duration::from_secs(state.config.bridge.output_stall_timeout_secs),
    );
    let (sender, receiver) = socket.split();

    state.metrics.ws_clients_active.inc();
    info!(client_id = %client_id, "client connected");

    sink.notify(ServerEvent::Connected {
        client_id: client_id.to_string(),
    })
    .await;
    let mut writer = tokio::spawn(write_loop(sender, outbound_rx));

    let connection = ClientConnection {
        client_id: client_id.clone(),
        sink,
        state: state.clone(),
    };
    connection.read_loop(receiver).await;

    // Channel loss ends the client's session
    if state
        .controller
        .terminate(&client_id, CloseReason::Disconnected)
        .await
    {
        debug!(client_id = %client_id, "session closed after channel loss");
    }

    // The writer stops once every sender is gone
    drop(connection);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    state.metrics.ws_clients_active.dec();
    info!(client_id = %client_id, "client disconnected");
}

/// Drain the outbound queue into the socket until either side closes.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let message = match frame {
            Outbound::Output(data) => Message::Binary(data),
            Outbound::Event(event) => Message::Text(event.to_json().into()),
        };
        if sender.send(message).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

struct ClientConnection {
    client_id: ClientId,
    sink: ClientSink,
    state: AppState,
}

impl ClientConnection {
    async fn read_loop(&self, mut receiver: SplitStream<WebSocket>) {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => self.on_text(text.as_str()).await,
                Ok(Message::Binary(data)) => self.on_input(data).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(client_id = %self.client_id, error = %e, "channel read error");
                    break;
                }
            }
        }
    }

    async fn on_text(&self, text: &str) {
        let event = match parse_client_event(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "client event rejected");
                self.reject(e).await;
                return;
            }
        };

        match event {
            ClientEvent::StartSsh(request) => self.start_session(request).await,
            ClientEvent::TerminalInput { command } => self.on_input(Bytes::from(command)).await,
            ClientEvent::Resize { cols, rows } => self.on_resize(PtySize { cols, rows }).await,
            ClientEvent::Logout => {
                info!(client_id = %self.client_id, "logout requested");
                self.state
                    .controller
                    .terminate(&self.client_id, CloseReason::Logout)
                    .await;
            }
        }
    }

    async fn start_session(&self, request: StartSshRequest) {
        if let Err(e) = validate_start(&request) {
            self.sink.notify(ServerEvent::ssh_error(&e)).await;
            return;
        }

        let ssh = &self.state.config.ssh;
        let pty = PtySize {
            cols: request.cols.filter(|c| *c > 0).unwrap_or(ssh.cols),
            rows: request.rows.filter(|r| *r > 0).unwrap_or(ssh.rows),
        };
        let credentials = SessionCredentials::new(
            request.host.trim(),
            request.port.unwrap_or(ssh.default_port),
            request.username.trim(),
            request.sshkey.as_str(),
        )
        .with_passphrase(request.passphrase.clone());

        if let Err(e) = self
            .state
            .controller
            .start(self.client_id.clone(), credentials, pty, self.sink.clone())
            .await
        {
            self.sink.notify(ServerEvent::ssh_error(&e)).await;
        }
    }

    async fn on_input(&self, data: Bytes) {
        let limit = self.state.config.bridge.max_input_bytes;
        if data.len() > limit {
            warn!(
                client_id = %self.client_id,
                bytes = data.len(),
                limit,
                "input rejected: too large"
            );
            self.reject(GatewayError::InvalidInput(format!(
                "input of {} bytes exceeds the {limit} byte limit",
                data.len()
            )))
            .await;
            return;
        }
        self.send(InputCommand::Data(data)).await;
    }

    async fn on_resize(&self, pty: PtySize) {
        if pty.cols == 0 || pty.rows == 0 {
            self.reject(GatewayError::InvalidInput(
                "terminal size must be non-zero".to_string(),
            ))
            .await;
            return;
        }
        self.send(InputCommand::Resize(pty)).await;
    }

    async fn send(&self, command: InputCommand) {
        let Some(handle) = self
            .state
            .registry
            .get(&self.client_id)
            .filter(|h| h.is_live())
        else {
            self.reject(GatewayError::InvalidInput("no active session".to_string()))
                .await;
            return;
        };
        if handle.send_input(command).await.is_err() {
            self.reject(GatewayError::InvalidInput("session is closing".to_string()))
                .await;
        }
    }

    async fn reject(&self, err: GatewayError) {
        self.sink
            .notify(ServerEvent::InputRejected {
                error: err.to_string(),
            })
            .await;
    }
}

fn validate_start(request: &StartSshRequest) -> Result<(), GatewayError> {
    if request.host.trim().is_empty() {
        return Err(GatewayError::InvalidInput("host is required".to_string()));
    }
    if request.username.trim().is_empty() {
        return Err(GatewayError::InvalidInput("username is required".to_string()));
    }
    if request.sshkey.trim().is_empty() {
        return Err(GatewayError::InvalidInput("sshkey is required".to_string()));
    }
    if request.port == Some(0) {
        return Err(GatewayError::InvalidInput("port must be non-zero".to_string()));
    }
    Ok(())
}
