//! Bidirectional relay between a client channel and a shell transport.
//!
//! The session task is the only writer to its transport. Client input
//! arrives through a bounded queue and is written in arrival order; shell
//! output is forwarded to the client's outbound queue in arrival order.

use super::handle::SessionHandle;
use crate::error::GatewayError;
use crate::events::ServerEvent;
use crate::metrics::MetricsRegistry;
use crate::transport::{PtySize, ShellTransport, TransportEvent};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Input queued for the session's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Data(Bytes),
    Resize(PtySize),
}

/// One frame for the browser: raw shell output or a JSON notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Output(Bytes),
    Event(ServerEvent),
}

/// Sending half of a client's outbound queue.
///
/// Output and notifications share one queue so the client sees them in the
/// order they were produced.
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<Outbound>,
    stall_timeout: Duration,
}

impl ClientSink {
    pub fn channel(capacity: usize, stall_timeout: Duration) -> (ClientSink, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ClientSink { tx, stall_timeout }, rx)
    }

    /// Queue shell output, waiting for room. A client that drains nothing
    /// for the stall timeout gets a stream error.
    pub async fn send_output(&self, data: Bytes) -> Result<(), GatewayError> {
        self.send(Outbound::Output(data)).await
    }

    /// Queue a notification. Delivery failures are logged and dropped.
    pub async fn notify(&self, event: ServerEvent) {
        if let Err(e) = self.send(Outbound::Event(event)).await {
            debug!(error = %e, "client notification dropped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, frame: Outbound) -> Result<(), GatewayError> {
        match tokio::time::timeout(self.stall_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(GatewayError::Stream("client channel closed".to_string())),
            Err(_) => Err(GatewayError::Stream("client not draining output".to_string())),
        }
    }
}

/// Why the relay loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeExit {
    RemoteClosed,
    Cancelled,
    Failed(GatewayError),
}

/// Byte counters for one bridged session.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Relay until the remote closes, the session is cancelled or an error ends
/// the stream.
pub async fn run(
    transport: &mut dyn ShellTransport,
    input_rx: &mut mpsc::Receiver<InputCommand>,
    handle: &SessionHandle,
    metrics: Option<&MetricsRegistry>,
    stats: &mut BridgeStats,
) -> BridgeExit {
    let cancel = handle.cancellation_token();
    loop {
        // Queued input goes before pending output
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return BridgeExit::Cancelled,
            command = input_rx.recv() => match command {
                Some(InputCommand::Data(data)) => {
                    handle.touch();
                    let written = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return BridgeExit::Cancelled,
                        r = transport.write(&data) => r,
                    };
                    if let Err(e) = written {
                        return BridgeExit::Failed(e);
                    }
                    stats.bytes_in += data.len() as u64;
                    if let Some(m) = metrics {
                        m.record_bytes_in(data.len() as u64);
                    }
                }
                Some(InputCommand::Resize(pty)) => {
                    let resized = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return BridgeExit::Cancelled,
                        r = transport.resize(pty) => r,
                    };
                    if let Err(e) = resized {
                        warn!(session_id = %handle.session_id(), error = %e, "resize failed");
                    }
                }
                // The handle owns a sender, so this only happens once it is gone
                None => return BridgeExit::Cancelled,
            },
            event = transport.next_event() => match event {
                TransportEvent::Data(data) => {
                    let len = data.len() as u64;
                    handle.touch();
                    // A stalled client must not hold off teardown
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return BridgeExit::Cancelled,
                        r = handle.sink().send_output(data) => r,
                    };
                    if let Err(e) = sent {
                        return BridgeExit::Failed(e);
                    }
                    stats.bytes_out += len;
                    if let Some(m) = metrics {
                        m.record_bytes_out(len);
                    }
                }
                TransportEvent::Closed => return BridgeExit::RemoteClosed,
                TransportEvent::Error(msg) => return BridgeExit::Failed(GatewayError::Stream(msg)),
            },
        }
    }
}
