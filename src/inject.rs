//! Voice command injection into a live shell session.
//!
//! Audio is accepted only for a client whose shell is open. Transcription
//! runs in the background; when it finishes the target session is looked up
//! again and the command is typed into the shell only if that very session is
//! still open. A session that closed in the meantime gets nothing.

use crate::error::GatewayError;
use crate::events::ServerEvent;
use crate::metrics::MetricsRegistry;
use crate::session::{
    ClientId, InputCommand, SessionHandle, SessionId, SessionRegistry, SessionState,
};
use crate::voice::{AudioPayload, Transcriber};
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a submitted clip ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The command was queued on the target shell.
    Injected { command: String },
    /// The target session ended before the command could be delivered.
    Dropped,
    /// Transcription failed; the client was notified.
    Failed(GatewayError),
}

impl InjectionOutcome {
    fn label(&self) -> &'static str {
        match self {
            InjectionOutcome::Injected { .. } => "injected",
            InjectionOutcome::Dropped => "dropped",
            InjectionOutcome::Failed(_) => "failed",
        }
    }
}

/// A transcription running in the background.
pub struct PendingInjection {
    pub session_id: SessionId,
    task: JoinHandle<InjectionOutcome>,
}

impl PendingInjection {
    /// Wait for the injection to finish.
    pub async fn outcome(self) -> InjectionOutcome {
        self.task.await.unwrap_or(InjectionOutcome::Dropped)
    }
}

pub struct CommandInjector {
    registry: Arc<SessionRegistry>,
    transcriber: Arc<dyn Transcriber>,
    append_newline: bool,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl CommandInjector {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transcriber: Arc<dyn Transcriber>,
        append_newline: bool,
    ) -> Self {
        Self {
            registry,
            transcriber,
            append_newline,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Accept `audio` for `client_id` and transcribe it in the background.
    ///
    /// Fails with `TargetNotFound` without contacting the transcriber when
    /// the client has no open shell.
    pub fn submit(
        &self,
        client_id: &ClientId,
        audio: AudioPayload,
    ) -> Result<PendingInjection, GatewayError> {
        let Some(target) = self.registry.get_open(client_id) else {
            debug!(client_id = %client_id, "voice command rejected: no open shell");
            if let Some(m) = &self.metrics {
                m.record_injection("target_not_found");
            }
            return Err(GatewayError::TargetNotFound(client_id.to_string()));
        };

        let session_id = target.session_id().clone();
        info!(
            client_id = %client_id,
            session_id = %session_id,
            bytes = audio.data.len(),
            "voice command accepted"
        );

        let job = InjectionJob {
            client_id: client_id.clone(),
            session_id: session_id.clone(),
            cancel: target.cancellation_token(),
            registry: self.registry.clone(),
            transcriber: self.transcriber.clone(),
            append_newline: self.append_newline,
        };
        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            let outcome = job.run(target, audio).await;
            if let Some(m) = &metrics {
                m.record_injection(outcome.label());
            }
            outcome
        });
        Ok(PendingInjection { session_id, task })
    }
}

struct InjectionJob {
    client_id: ClientId,
    session_id: SessionId,
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    transcriber: Arc<dyn Transcriber>,
    append_newline: bool,
}

impl InjectionJob {
    async fn run(self, origin: SessionHandle, audio: AudioPayload) -> InjectionOutcome {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(session_id = %self.session_id, "session closed during transcription");
                return InjectionOutcome::Dropped;
            }
            result = self.transcriber.transcribe(audio) => result,
        };

        let transcript = match result {
            Ok(transcript) => transcript,
            Err(err) => {
                warn!(
                    client_id = %self.client_id,
                    session_id = %self.session_id,
                    error = %err,
                    "voice transcription failed"
                );
                origin
                    .notify(ServerEvent::VoiceError {
                        error: err.to_string(),
                    })
                    .await;
                return InjectionOutcome::Failed(err);
            }
        };

        // Only the session that was open at submission may receive the text
        let target = self.registry.get(&self.client_id).filter(|handle| {
            handle.session_id() == &self.session_id && handle.state() == SessionState::ShellOpen
        });
        let Some(target) = target else {
            debug!(
                client_id = %self.client_id,
                session_id = %self.session_id,
                "voice command dropped: session no longer open"
            );
            return InjectionOutcome::Dropped;
        };

        let text = transcript.input_text(self.append_newline);
        if target
            .send_input(InputCommand::Data(Bytes::from(text.into_bytes())))
            .await
            .is_err()
        {
            return InjectionOutcome::Dropped;
        }

        info!(
            client_id = %self.client_id,
            session_id = %self.session_id,
            command = %transcript.command,
            "voice command injected"
        );
        target
            .notify(ServerEvent::VoiceCommand {
                transcription: transcript.transcription.clone(),
                command: transcript.command.clone(),
            })
            .await;
        InjectionOutcome::Injected {
            command: transcript.command,
        }
    }
}
