pub mod login;
pub mod sessions;
pub mod voice;
pub mod ws;

use crate::config::types::AppConfig;
use crate::context::AppContext;
use crate::identity::IdentityProvider;
use crate::inject::CommandInjector;
use crate::metrics::MetricsRegistry;
use crate::session::{SessionController, SessionRegistry};
use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, MatchedPath, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

/// Body limit for JSON endpoints.
const JSON_BODY_LIMIT: usize = 64 * 1024;

/// Room for multipart framing around the audio bytes.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Unified API response envelope for consistent JSON output.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> (StatusCode, axum::Json<Self>) {
        (
            StatusCode::OK,
            axum::Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
    }

    pub fn ok_with_status(status: StatusCode, data: T) -> (StatusCode, axum::Json<Self>) {
        (
            status,
            axum::Json(Self {
                success: status.is_success(),
                data: Some(data),
                error: None,
            }),
        )
    }
}

impl ApiResponse<()> {
    pub fn err(status: StatusCode, msg: impl Into<String>) -> (StatusCode, axum::Json<Self>) {
        (
            status,
            axum::Json(Self {
                success: false,
                data: None,
                error: Some(msg.into()),
            }),
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SessionRegistry>,
    pub controller: Arc<SessionController>,
    pub injector: Arc<CommandInjector>,
    pub identity: Arc<dyn IdentityProvider>,
    pub metrics: Arc<MetricsRegistry>,
    pub start_time: Instant,
}

impl AppState {
    pub fn from_context(ctx: &AppContext) -> Self {
        Self {
            config: ctx.config.clone(),
            registry: ctx.registry.clone(),
            controller: ctx.controller.clone(),
            injector: ctx.injector.clone(),
            identity: ctx.identity.clone(),
            metrics: ctx.metrics.clone(),
            start_time: ctx.start_time,
        }
    }
}

#[derive(Serialize)]
struct HealthDetail {
    status: &'static str,
    uptime_secs: u64,
    sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    ApiResponse::ok(HealthDetail {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        sessions: state.registry.len(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response(),
    }
}

/// API metrics middleware: records request count and duration per route pattern.
async fn api_metrics_middleware(
    State(state): State<AppState>,
    matched_path: Option<MatchedPath>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    let method = req.method().to_string();
    let path = matched_path
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    state.metrics.record_http_request(&method, &path, status);
    state
        .metrics
        .record_http_request_duration(&method, &path, duration);

    response
}

/// CORS for the browser front end. No origins, or `*`, allows any origin.
pub fn build_cors(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid allowed origin: {origin}"))?,
        );
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}

/// Build the full router: real-time channel, login, voice upload and probes.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = build_cors(&state.config.server.allowed_origins)?;
    let voice_limit = state.config.voice.max_upload_bytes + MULTIPART_OVERHEAD;

    let voice = Router::new()
        .route("/api/voice/{client_id}", post(voice::upload_voice))
        .layer(DefaultBodyLimit::max(voice_limit));

    let mut app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/login", post(login::login))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/{client_id}", get(sessions::get_session))
        .route("/health", get(health_handler))
        .route("/livez", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .merge(voice);

    if state.config.metrics.enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    Ok(app
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_metrics_middleware,
        ))
        .layer(cors)
        .with_state(state))
}

/// Start the API server with graceful shutdown support.
pub async fn start_api_server(
    listen_addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding API listener on {listen_addr}"))?;
    info!(addr = %listen_addr, "API server listening");
    start_api_server_on_listener(listener, state, shutdown).await
}

/// Start the API server on a pre-bound listener (avoids TOCTOU port races in tests).
pub async fn start_api_server_on_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state)?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
