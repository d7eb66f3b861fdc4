use crate::api::AppState;
use crate::identity::{Identity, IdentityError};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct LoginUser {
    uid: u64,
    name: String,
    ip: String,
    sshkey: String,
}

impl From<Identity> for LoginUser {
    fn from(identity: Identity) -> Self {
        Self {
            uid: identity.uid,
            name: identity.remote_username,
            ip: identity.ip,
            sshkey: identity.sshkey,
        }
    }
}

#[derive(Serialize)]
struct LoginReply {
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<LoginUser>,
}

fn reply(status: StatusCode, message: &'static str) -> (StatusCode, Json<LoginReply>) {
    (status, Json(LoginReply { message, user: None }))
}

/// POST /api/login: check a browser login and hand back the shell target.
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(request)) = body else {
        return reply(StatusCode::BAD_REQUEST, "FIELD_INCOMPLETE");
    };
    if request.username.is_empty() || request.password.is_empty() {
        return reply(StatusCode::BAD_REQUEST, "FIELD_INCOMPLETE");
    }

    let identity = state.identity.clone();
    let username = request.username.clone();
    let verified = tokio::task::spawn_blocking(move || {
        identity.verify(&request.username, &request.password)
    })
    .await;

    match verified {
        Ok(Ok(identity)) => {
            info!(user = %username, host = %identity.ip, "login auth success");
            state.metrics.record_login("success");
            (
                StatusCode::OK,
                Json(LoginReply {
                    message: "Login successful!",
                    user: Some(identity.into()),
                }),
            )
        }
        Ok(Err(e)) => {
            warn!(user = %username, error = %e, "login auth failed");
            state.metrics.record_login(match e {
                IdentityError::InvalidUsername => "invalid_username",
                IdentityError::InvalidPassword => "invalid_password",
            });
            reply(StatusCode::UNAUTHORIZED, e.code())
        }
        Err(e) => {
            error!(error = %e, "login verification task failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    }
}
