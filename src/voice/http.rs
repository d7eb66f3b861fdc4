use super::{clean_command, AudioPayload, Transcriber, Transcript};
use crate::config::types::VoiceConfig;
use crate::error::GatewayError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Reply from the speech-to-command service.
#[derive(Debug, Deserialize)]
struct ServiceReply {
    transcription: Option<String>,
    command: Option<String>,
    error: Option<String>,
}

/// Posts audio as multipart field `file` to an HTTP speech-to-command service.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("building HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn from_config(config: &VoiceConfig) -> anyhow::Result<Self> {
        Self::new(config.endpoint.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: AudioPayload) -> Result<Transcript, GatewayError> {
        let size = audio.data.len();
        let mut part = reqwest::multipart::Part::bytes(audio.data.to_vec()).file_name(audio.file_name);
        if let Some(content_type) = audio.content_type.as_deref() {
            part = part
                .mime_str(content_type)
                .map_err(|e| GatewayError::Transcription(format!("invalid content type: {e}")))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(endpoint = %self.endpoint, bytes = size, "sending audio for transcription");
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Transcription(format!(
                        "service timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    GatewayError::Transcription(format!("service unreachable: {e}"))
                }
            })?;

        let status = response.status();
        let reply: ServiceReply = response
            .json()
            .await
            .map_err(|e| GatewayError::Transcription(format!("invalid service reply ({status}): {e}")))?;

        if let Some(error) = reply.error {
            return Err(GatewayError::Transcription(error));
        }
        if !status.is_success() {
            return Err(GatewayError::Transcription(format!("service returned {status}")));
        }

        let command = clean_command(reply.command.as_deref().unwrap_or_default());
        if command.is_empty() {
            return Err(GatewayError::Transcription(
                "service returned an empty command".to_string(),
            ));
        }
        Ok(Transcript {
            transcription: reply.transcription.unwrap_or_default().trim().to_string(),
            command,
        })
    }
}
