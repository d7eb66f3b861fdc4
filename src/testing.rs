//! Test doubles for the transport and transcription seams.

use crate::error::GatewayError;
use crate::transport::{PtySize, ShellTransport, TransportEvent, TransportFactory};
use crate::voice::{AudioPayload, Transcriber, Transcript};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Failure injected into every transport a [`MockTransportFactory`] creates.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_connect: Option<String>,
    pub fail_auth: Option<String>,
    pub fail_shell: Option<String>,
    /// Delay before `connect` returns.
    pub connect_delay: Option<Duration>,
    /// Output emitted as soon as the shell opens.
    pub banner: Option<Bytes>,
    /// Echo every write back as output.
    pub echo: bool,
}

#[derive(Debug, Default)]
struct ProbeState {
    connected_to: Option<(String, u16)>,
    username: Option<String>,
    shell_pty: Option<PtySize>,
    writes: Vec<Bytes>,
    resizes: Vec<PtySize>,
    close_calls: usize,
    /// Writes attempted after close.
    writes_after_close: usize,
}

/// Observes and drives one mock transport from a test.
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<ProbeState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockProbe {
    /// Push shell output to the session.
    pub fn emit(&self, data: impl Into<Bytes>) {
        let _ = self.events.send(TransportEvent::Data(data.into()));
    }

    /// Simulate the remote closing the shell.
    pub fn emit_closed(&self) {
        let _ = self.events.send(TransportEvent::Closed);
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into()));
    }

    pub fn connected_to(&self) -> Option<(String, u16)> {
        self.lock().connected_to.clone()
    }

    pub fn username(&self) -> Option<String> {
        self.lock().username.clone()
    }

    pub fn shell_pty(&self) -> Option<PtySize> {
        self.lock().shell_pty
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.lock().writes.clone()
    }

    /// All written bytes, concatenated in write order.
    pub fn written(&self) -> Vec<u8> {
        self.lock().writes.iter().flat_map(|b| b.iter().copied()).collect()
    }

    pub fn resizes(&self) -> Vec<PtySize> {
        self.lock().resizes.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn writes_after_close(&self) -> usize {
        self.lock().writes_after_close
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MockTransport {
    behavior: MockBehavior,
    probe: MockProbe,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    shell_open: bool,
    closed: bool,
}

#[async_trait]
impl ShellTransport for MockTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), GatewayError> {
        if let Some(delay) = self.behavior.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = &self.behavior.fail_connect {
            return Err(GatewayError::Connection(msg.clone()));
        }
        self.probe.lock().connected_to = Some((host.to_string(), port));
        Ok(())
    }

    async fn authenticate(
        &mut self,
        username: &str,
        _private_key: &str,
        _passphrase: Option<&str>,
    ) -> Result<(), GatewayError> {
        if let Some(msg) = &self.behavior.fail_auth {
            return Err(GatewayError::Authentication(msg.clone()));
        }
        self.probe.lock().username = Some(username.to_string());
        Ok(())
    }

    async fn open_shell(&mut self, pty: PtySize) -> Result<(), GatewayError> {
        if let Some(msg) = &self.behavior.fail_shell {
            return Err(GatewayError::Stream(msg.clone()));
        }
        self.probe.lock().shell_pty = Some(pty);
        self.shell_open = true;
        if let Some(banner) = &self.behavior.banner {
            self.probe.emit(banner.clone());
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError> {
        if self.closed || !self.shell_open {
            self.probe.lock().writes_after_close += 1;
            return Err(GatewayError::TransportClosed);
        }
        self.probe.lock().writes.push(Bytes::copy_from_slice(data));
        if self.behavior.echo {
            self.probe.emit(Bytes::copy_from_slice(data));
        }
        Ok(())
    }

    async fn resize(&mut self, pty: PtySize) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::TransportClosed);
        }
        self.probe.lock().resizes.push(pty);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Closed;
        }
        self.events.recv().await.unwrap_or(TransportEvent::Closed)
    }

    async fn close(&mut self) {
        self.probe.lock().close_calls += 1;
        self.closed = true;
    }
}

/// Creates [`MockTransport`]s and keeps a probe for each one.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    behavior: Arc<Mutex<MockBehavior>>,
    probes: Arc<Mutex<Vec<MockProbe>>>,
    created: Arc<Notify>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let factory = Self::default();
        factory.set_behavior(behavior);
        factory
    }

    /// Applies to transports created from now on.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    pub fn probes(&self) -> Vec<MockProbe> {
        self.probes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn created(&self) -> usize {
        self.probes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait until at least `count` transports exist and return the last one.
    pub async fn wait_for_probe(&self, count: usize) -> MockProbe {
        loop {
            let notified = self.created.notified();
            {
                let probes = self.probes.lock().unwrap_or_else(|e| e.into_inner());
                if probes.len() >= count {
                    return probes[count - 1].clone();
                }
            }
            notified.await;
        }
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Box<dyn ShellTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let probe = MockProbe {
            state: Arc::new(Mutex::new(ProbeState::default())),
            events: tx,
        };
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.probes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(probe.clone());
        self.created.notify_waiters();
        Box::new(MockTransport {
            behavior,
            probe,
            events: rx,
            shell_open: false,
            closed: false,
        })
    }
}

/// Transcriber with a canned result and an optional release gate.
pub struct MockTranscriber {
    result: Mutex<Result<Transcript, GatewayError>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn returning(transcription: &str, command: &str) -> Self {
        Self {
            result: Mutex::new(Ok(Transcript {
                transcription: transcription.to_string(),
                command: command.to_string(),
            })),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Mutex::new(Err(GatewayError::Transcription(message.to_string()))),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Hold every transcription until the returned notifier fires.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: AudioPayload) -> Result<Transcript, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
