use crate::api::{self, AppState};
use crate::config::types::AppConfig;
use crate::context::AppContext;
use crate::session::CloseReason;
use crate::transport::ssh::{SshSettings, SshTransportFactory};
use crate::voice::http::HttpTranscriber;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main server orchestrator: real SSH transport and HTTP transcription.
pub async fn run(config: AppConfig) -> Result<()> {
    let factory = Arc::new(SshTransportFactory::new(SshSettings::from_config(&config.ssh)));
    let transcriber =
        Arc::new(HttpTranscriber::from_config(&config.voice).context("building voice client")?);
    let ctx = Arc::new(AppContext::build(config, factory, transcriber)?);

    let listener = tokio::net::TcpListener::bind(&ctx.config.server.listen)
        .await
        .with_context(|| format!("binding {}", ctx.config.server.listen))?;
    info!(
        addr = %ctx.config.server.listen,
        users = ctx.config.users.len(),
        voice = ctx.config.voice.enabled,
        "Gateway listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(handle_signals(shutdown.clone()));

    serve(ctx, listener, shutdown).await
}

/// Serve on a pre-bound listener until `shutdown` fires, then close every
/// live session.
pub async fn serve(
    ctx: Arc<AppContext>,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = AppState::from_context(&ctx);
    let api_shutdown = shutdown.clone();
    let mut api = tokio::spawn(async move {
        api::start_api_server_on_listener(listener, state, api_shutdown).await
    });

    tokio::select! {
        _ = shutdown.cancelled() => {}
        finished = &mut api => {
            // The server stopped on its own; still close sessions before exiting
            shutdown.cancel();
            ctx.controller
                .terminate_all(CloseReason::Shutdown, ctx.shutdown_timeout())
                .await;
            return finished.context("API server task failed")?;
        }
    }

    let timeout = ctx.shutdown_timeout();
    info!(
        timeout_secs = timeout.as_secs(),
        sessions = ctx.registry.len(),
        "Initiating graceful shutdown"
    );
    ctx.controller
        .terminate_all(CloseReason::Shutdown, timeout)
        .await;

    match tokio::time::timeout(timeout, api).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "API server error"),
        Ok(Err(e)) => error!(error = %e, "API server task failed"),
        Err(_) => warn!("API server did not stop within shutdown timeout"),
    }

    let remaining = ctx.registry.len();
    if remaining > 0 {
        warn!(sessions = remaining, "sessions still registered at exit");
    }
    info!("Graceful shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn handle_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown"),
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, initiating graceful shutdown"),
    }
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn handle_signals(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Ctrl-C received, initiating graceful shutdown");
    }
    shutdown.cancel();
}
