//! Speech-to-command conversion.

pub mod http;

use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;

/// An uploaded audio clip.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl AudioPayload {
    pub fn new(file_name: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// Result of a transcription: what was said and the shell command for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub transcription: String,
    pub command: String,
}

impl Transcript {
    /// Text to type into the shell.
    pub fn input_text(&self, append_newline: bool) -> String {
        if append_newline {
            format!("{}\n", self.command)
        } else {
            self.command.clone()
        }
    }
}

/// Converts audio into a shell command.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: AudioPayload) -> Result<Transcript, GatewayError>;
}

/// Strip markdown code fences and surrounding whitespace from a model reply.
pub fn clean_command(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```bash")
        .or_else(|| trimmed.strip_prefix("```sh"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let without_close = without_open.trim_end().strip_suffix("```").unwrap_or(without_open);
    let command = without_close.replace("```", "");
    command.trim().to_string()
}
