#[allow(dead_code, unused_imports)]
mod helpers;
use helpers::*;

use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use sshweb::testing::MockTranscriber;
use std::sync::Arc;

fn audio_form() -> Form {
    Form::new().part(
        "file",
        Part::bytes(b"OggS\x00\x02voice".to_vec())
            .file_name("clip.webm")
            .mime_str("audio/webm")
            .unwrap(),
    )
}

fn login_config() -> sshweb::config::types::AppConfig {
    let mut config = gateway_config();
    config.users = vec![test_user("alice", "s3cret")];
    config
}

async fn post_login(gateway: &TestGateway, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(gateway.url("/api/login"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_success_returns_shell_target() {
    let gateway = start_gateway(login_config()).await;
    let (status, body) =
        post_login(&gateway, json!({"username": "alice", "password": "s3cret"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Login successful!");
    assert_eq!(body["user"]["uid"], 1);
    assert_eq!(body["user"]["name"], "ubuntu");
    assert_eq!(body["user"]["ip"], "10.0.0.5");
    assert_eq!(body["user"]["sshkey"], "TEST KEY");
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_login_failures() {
    let gateway = start_gateway(login_config()).await;

    let (status, body) =
        post_login(&gateway, json!({"username": "alice", "password": "wrong"})).await;
    assert_eq!(status, 401);
    assert_eq!(body, json!({"message": "INVALID_PASSWORD"}));

    let (status, body) =
        post_login(&gateway, json!({"username": "mallory", "password": "s3cret"})).await;
    assert_eq!(status, 401);
    assert_eq!(body["message"], "INVALID_USERNAME");

    let (status, body) = post_login(&gateway, json!({"username": "alice"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "FIELD_INCOMPLETE");
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_login_malformed_body_is_field_incomplete() {
    let gateway = start_gateway(login_config()).await;
    let resp = reqwest::Client::new()
        .post(gateway.url("/api/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "FIELD_INCOMPLETE");
    gateway.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Voice upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_voice_command_reaches_shell_and_browser() {
    let mut config = gateway_config();
    config.voice.append_newline = true;
    let gateway = start_gateway(config).await;
    let (mut ws, client_id) = connect_client(&gateway).await;
    start_ssh(&mut ws).await;
    let ready = next_event(&mut ws).await;
    assert_eq!(ready["event"], "ssh-ready");
    let probe = gateway.factory.wait_for_probe(1).await;

    let resp = reqwest::Client::new()
        .post(gateway.url(&format!("/api/voice/{client_id}")))
        .multipart(audio_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["accepted"], true);
    assert_eq!(body["data"]["session_id"], ready["session_id"]);

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "voice-command");
    assert_eq!(event["transcription"], "print working directory");
    assert_eq!(event["command"], "pwd");
    eventually(|| probe.written() == b"pwd\n").await;
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_voice_transcription_failure_is_voice_error() {
    let gateway = start_gateway_with(
        gateway_config(),
        Arc::new(MockTranscriber::failing("model not loaded")),
    )
    .await;
    let (mut ws, client_id) = connect_client(&gateway).await;
    start_ssh(&mut ws).await;
    assert_eq!(next_event(&mut ws).await["event"], "ssh-ready");
    let probe = gateway.factory.wait_for_probe(1).await;

    let resp = reqwest::Client::new()
        .post(gateway.url(&format!("/api/voice/{client_id}")))
        .multipart(audio_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "voice-error");
    assert!(event["error"].as_str().unwrap().contains("model not loaded"));
    assert!(probe.writes().is_empty());

    // The session survives a failed transcription
    send_event(&mut ws, json!({"event": "terminal-input", "command": "ls\n"})).await;
    eventually(|| probe.written() == b"ls\n").await;
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_voice_without_session_is_not_found() {
    let transcriber = Arc::new(MockTranscriber::returning("list", "ls"));
    let gateway = start_gateway_with(gateway_config(), transcriber.clone()).await;
    let (_ws, client_id) = connect_client(&gateway).await;

    let resp = reqwest::Client::new()
        .post(gateway.url(&format!("/api/voice/{client_id}")))
        .multipart(audio_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(transcriber.calls(), 0);
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_voice_without_file_field_is_bad_request() {
    let gateway = start_gateway(gateway_config()).await;
    let form = Form::new().text("note", "no audio here");
    let resp = reqwest::Client::new()
        .post(gateway.url("/api/voice/anyone"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing 'file' field");
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_voice_oversized_clip_is_bad_request() {
    let mut config = gateway_config();
    config.voice.max_upload_bytes = 8;
    let gateway = start_gateway(config).await;
    let resp = reqwest::Client::new()
        .post(gateway.url("/api/voice/anyone"))
        .multipart(audio_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_voice_disabled_is_unavailable() {
    let mut config = gateway_config();
    config.voice.enabled = false;
    let gateway = start_gateway(config).await;
    let resp = reqwest::Client::new()
        .post(gateway.url("/api/voice/anyone"))
        .multipart(audio_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    gateway.shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Probes and introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_and_livez() {
    let gateway = start_gateway(gateway_config()).await;
    let resp = reqwest::get(gateway.url("/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["sessions"], 0);

    let resp = reqwest::get(gateway.url("/livez")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "ok");
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_metrics_endpoint_renders_gateway_metrics() {
    let gateway = start_gateway(gateway_config()).await;
    let (mut ws, _) = connect_client(&gateway).await;
    start_ssh(&mut ws).await;
    assert_eq!(next_event(&mut ws).await["event"], "ssh-ready");

    let resp = reqwest::get(gateway.url("/metrics")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("sshweb_ws_clients_active 1"));
    assert!(body.contains("sshweb_"));
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_metrics_disabled_is_not_routed() {
    let mut config = gateway_config();
    config.metrics.enabled = false;
    let gateway = start_gateway(config).await;
    let resp = reqwest::get(gateway.url("/metrics")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_sessions_listing() {
    let gateway = start_gateway(gateway_config()).await;
    let (mut ws, client_id) = connect_client(&gateway).await;
    start_ssh(&mut ws).await;
    assert_eq!(next_event(&mut ws).await["event"], "ssh-ready");

    let body: Value = reqwest::get(gateway.url("/api/sessions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sessions = body["data"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["client_id"], client_id.as_str());
    assert_eq!(sessions[0]["host"], "10.0.0.5");
    assert_eq!(sessions[0]["state"], "shell_open");

    let resp = reqwest::get(gateway.url(&format!("/api/sessions/{client_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let resp = reqwest::get(gateway.url("/api/sessions/unknown")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    gateway.shutdown.cancel();
}

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let mut config = gateway_config();
    config.server.allowed_origins = vec!["http://console.example".to_string()];
    let gateway = start_gateway(config).await;

    let resp = reqwest::Client::new()
        .get(gateway.url("/health"))
        .header("origin", "http://console.example")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .unwrap()
            .to_str()
            .unwrap(),
        "http://console.example"
    );

    let resp = reqwest::Client::new()
        .get(gateway.url("/health"))
        .header("origin", "http://evil.example")
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
    gateway.shutdown.cancel();
}
