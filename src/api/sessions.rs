use crate::api::{ApiResponse, AppState};
use crate::session::ClientId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

/// GET /api/sessions: every registered session, oldest first.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.snapshot())
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&ClientId::from(client_id)) {
        Some(handle) => ApiResponse::ok(handle.snapshot()).into_response(),
        None => ApiResponse::err(StatusCode::NOT_FOUND, "session not found").into_response(),
    }
}
