use serde_json::{json, Value};
use sshweb::error::GatewayError;
use sshweb::events::{parse_client_event, ClientEvent, ServerEvent};

fn as_json(event: &ServerEvent) -> Value {
    serde_json::from_str(&event.to_json()).unwrap()
}

#[test]
fn test_start_ssh_with_all_fields() {
    let event = parse_client_event(
        &json!({
            "event": "start-ssh",
            "host": "10.0.0.5",
            "username": "ubuntu",
            "privateKey": "KEY",
            "port": 2222,
            "passphrase": "pp",
            "cols": 132,
            "rows": 43,
        })
        .to_string(),
    )
    .unwrap();
    let ClientEvent::StartSsh(req) = event else {
        panic!("expected start-ssh");
    };
    assert_eq!(req.sshkey, "KEY");
    assert_eq!(req.port, Some(2222));
    assert_eq!(req.passphrase.as_deref(), Some("pp"));
    assert_eq!((req.cols, req.rows), (Some(132), Some(43)));
}

#[test]
fn test_terminal_input_and_resize() {
    assert_eq!(
        parse_client_event(r#"{"event":"terminal-input","command":"ls\n"}"#).unwrap(),
        ClientEvent::TerminalInput {
            command: "ls\n".to_string()
        }
    );
    assert_eq!(
        parse_client_event(r#"{"event":"resize","cols":100,"rows":30}"#).unwrap(),
        ClientEvent::Resize { cols: 100, rows: 30 }
    );
}

#[test]
fn test_malformed_frames_are_invalid_input() {
    for frame in [
        "not json",
        r#"{"command":"ls"}"#,
        r#"{"event":"start-ssh","host":"h"}"#,
        r#"{"event":"resize","cols":-1,"rows":30}"#,
    ] {
        let err = parse_client_event(frame).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)), "{frame}");
    }
}

#[test]
fn test_server_event_names() {
    let cases = [
        (
            ServerEvent::Connected {
                client_id: "c1".into(),
            },
            "connected",
        ),
        (
            ServerEvent::SshReady {
                session_id: "s1".into(),
            },
            "ssh-ready",
        ),
        (
            ServerEvent::SshClosed {
                reason: "logout".into(),
            },
            "ssh-closed",
        ),
        (
            ServerEvent::VoiceCommand {
                transcription: "list".into(),
                command: "ls".into(),
            },
            "voice-command",
        ),
        (
            ServerEvent::VoiceError {
                error: "boom".into(),
            },
            "voice-error",
        ),
        (
            ServerEvent::InputRejected {
                error: "too large".into(),
            },
            "input-rejected",
        ),
    ];
    for (event, name) in cases {
        assert_eq!(as_json(&event)["event"], name);
    }
}

#[test]
fn test_connected_carries_client_id() {
    let value = as_json(&ServerEvent::Connected {
        client_id: "abc".into(),
    });
    assert_eq!(value, json!({"event": "connected", "client_id": "abc"}));
}

#[test]
fn test_ssh_error_kinds() {
    for (err, kind) in [
        (GatewayError::Connection("refused".into()), "connection_error"),
        (GatewayError::Authentication("denied".into()), "authentication_error"),
        (GatewayError::Stream("reset".into()), "stream_error"),
        (GatewayError::AlreadyActive("c1".into()), "already_active"),
    ] {
        let value = as_json(&ServerEvent::ssh_error(&err));
        assert_eq!(value["event"], "ssh-error");
        assert_eq!(value["kind"], kind);
        assert_eq!(value["error"], err.to_string());
    }
}
