use crate::api::{ApiResponse, AppState};
use crate::error::GatewayError;
use crate::session::ClientId;
use crate::voice::AudioPayload;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct Accepted {
    accepted: bool,
    session_id: String,
}

/// POST /api/voice/{client_id}: accept an audio clip for the client's shell.
///
/// The command itself reaches the browser later over its real-time channel.
pub async fn upload_voice(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    multipart: Multipart,
) -> impl IntoResponse {
    if !state.config.voice.enabled {
        return ApiResponse::err(StatusCode::SERVICE_UNAVAILABLE, "voice commands are disabled")
            .into_response();
    }

    let audio = match read_audio(multipart, state.config.voice.max_upload_bytes).await {
        Ok(audio) => audio,
        Err(msg) => {
            debug!(client_id = %client_id, error = %msg, "voice upload rejected");
            return ApiResponse::err(StatusCode::BAD_REQUEST, msg).into_response();
        }
    };

    let client_id = ClientId::from(client_id);
    match state.injector.submit(&client_id, audio) {
        Ok(pending) => ApiResponse::ok_with_status(
            StatusCode::ACCEPTED,
            Accepted {
                accepted: true,
                session_id: pending.session_id.to_string(),
            },
        )
        .into_response(),
        Err(e @ GatewayError::TargetNotFound(_)) => {
            ApiResponse::err(StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => ApiResponse::err(StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Pull the `file` field out of the form.
async fn read_audio(mut multipart: Multipart, max_bytes: usize) -> Result<AudioPayload, String> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err("missing 'file' field".to_string()),
            Err(e) => return Err(format!("invalid multipart body: {e}")),
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("audio.webm").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| format!("reading audio: {e}"))?;

        if data.is_empty() {
            return Err("audio payload is empty".to_string());
        }
        if data.len() > max_bytes {
            return Err(format!(
                "audio payload of {} bytes exceeds the {max_bytes} byte limit",
                data.len()
            ));
        }
        return Ok(AudioPayload::new(file_name, data).with_content_type(content_type));
    }
}
