use bytes::Bytes;
use sshweb::config::types::DuplicateStartPolicy;
use sshweb::error::GatewayError;
use sshweb::events::ServerEvent;
use sshweb::session::{
    ClientId, ClientSink, CloseReason, ControllerSettings, InputCommand, Outbound,
    SessionController, SessionHandle, SessionRegistry, SessionState,
};
use sshweb::testing::{MockBehavior, MockTransportFactory};
use sshweb::transport::{PtySize, SessionCredentials};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn settings(policy: DuplicateStartPolicy) -> ControllerSettings {
    ControllerSettings {
        duplicate_start: policy,
        teardown_timeout: Duration::from_secs(2),
        input_queue_capacity: 16,
    }
}

fn setup(
    behavior: MockBehavior,
    policy: DuplicateStartPolicy,
) -> (SessionController, MockTransportFactory, Arc<SessionRegistry>) {
    let factory = MockTransportFactory::with_behavior(behavior);
    let registry = Arc::new(SessionRegistry::new());
    let controller =
        SessionController::new(registry.clone(), Arc::new(factory.clone()), settings(policy));
    (controller, factory, registry)
}

fn credentials() -> SessionCredentials {
    SessionCredentials::new("10.0.0.5", 22, "ubuntu", "KEY")
}

fn client_sink() -> (ClientSink, mpsc::Receiver<Outbound>) {
    ClientSink::channel(64, Duration::from_secs(5))
}

async fn wait_state(handle: &SessionHandle, state: SessionState) {
    let mut rx = handle.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, at {}", handle.state()))
        .unwrap();
}

async fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Outbound {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("client queue closed")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Remaining frames without waiting.
fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_start_input_output_scenario() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();
    let client = ClientId::from("client-a");

    let handle = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;

    let probe = factory.wait_for_probe(1).await;
    assert_eq!(probe.connected_to(), Some(("10.0.0.5".to_string(), 22)));
    assert_eq!(probe.username().as_deref(), Some("ubuntu"));
    assert_eq!(probe.shell_pty(), Some(PtySize { cols: 80, rows: 24 }));

    match next_frame(&mut rx).await {
        Outbound::Event(ServerEvent::SshReady { session_id }) => {
            assert_eq!(session_id, handle.session_id().to_string());
        }
        other => panic!("expected ssh-ready, got {other:?}"),
    }

    handle
        .send_input(InputCommand::Data(Bytes::from_static(b"ls\n")))
        .await
        .unwrap();
    eventually(|| probe.written() == b"ls\n").await;

    probe.emit(Bytes::from_static(b"file1\nfile2\n"));
    assert_eq!(
        next_frame(&mut rx).await,
        Outbound::Output(Bytes::from_static(b"file1\nfile2\n"))
    );
    assert!(drain(&mut rx).is_empty(), "output must arrive exactly once");
    assert_eq!(registry.get_open(&client).unwrap().session_id(), handle.session_id());
}

#[tokio::test]
async fn test_auth_failure_reports_once_and_cleans_up() {
    let behavior = MockBehavior {
        fail_auth: Some("publickey rejected".to_string()),
        ..Default::default()
    };
    let (controller, factory, registry) = setup(behavior, DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();
    let client = ClientId::from("client-a");

    let handle = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::Errored).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1, "exactly one notification: {frames:?}");
    match &frames[0] {
        Outbound::Event(ServerEvent::SshError { kind, error }) => {
            assert_eq!(kind, "authentication_error");
            assert!(error.contains("publickey rejected"));
        }
        other => panic!("expected ssh-error, got {other:?}"),
    }
    assert!(registry.get(&client).is_none());
    assert_eq!(factory.probes()[0].close_count(), 1);
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let behavior = MockBehavior {
        fail_connect: Some("no route to host".to_string()),
        ..Default::default()
    };
    let (controller, factory, registry) = setup(behavior, DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();

    let handle = controller
        .start(ClientId::from("c"), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::Errored).await;

    match next_frame(&mut rx).await {
        Outbound::Event(ServerEvent::SshError { kind, .. }) => assert_eq!(kind, "connection_error"),
        other => panic!("expected ssh-error, got {other:?}"),
    }
    assert!(registry.is_empty());
    assert!(factory.probes()[0].is_closed());
    assert!(factory.probes()[0].username().is_none());
}

#[tokio::test]
async fn test_remote_close_delivers_output_then_closed() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();
    let client = ClientId::from("client-a");

    let handle = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;
    let probe = factory.wait_for_probe(1).await;

    probe.emit(Bytes::from_static(b"logout\n"));
    probe.emit_closed();
    wait_state(&handle, SessionState::Closed).await;

    let frames = drain(&mut rx);
    assert!(matches!(frames[0], Outbound::Event(ServerEvent::SshReady { .. })));
    assert_eq!(frames[1], Outbound::Output(Bytes::from_static(b"logout\n")));
    assert_eq!(
        frames[2],
        Outbound::Event(ServerEvent::SshClosed {
            reason: "remote_closed".to_string()
        })
    );
    assert_eq!(frames.len(), 3);
    assert!(registry.get(&client).is_none());
    assert_eq!(probe.close_count(), 1);
}

#[tokio::test]
async fn test_mid_session_error_terminates_session() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();

    let handle = controller
        .start(ClientId::from("c"), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;
    let probe = factory.wait_for_probe(1).await;

    probe.emit_error("connection reset");
    wait_state(&handle, SessionState::Closed).await;

    let frames = drain(&mut rx);
    assert!(frames.iter().any(|f| matches!(
        f,
        Outbound::Event(ServerEvent::SshError { kind, .. }) if kind == "stream_error"
    )));
    assert!(matches!(
        frames.last(),
        Some(Outbound::Event(ServerEvent::SshClosed { reason })) if reason == "stream_error"
    ));
    assert!(registry.is_empty());
    assert_eq!(probe.close_count(), 1);
}

#[tokio::test]
async fn test_replace_policy_closes_previous_transport() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let client = ClientId::from("client-a");

    let (sink1, _rx1) = client_sink();
    let first = controller
        .start(client.clone(), credentials(), PtySize::default(), sink1)
        .await
        .unwrap();
    wait_state(&first, SessionState::ShellOpen).await;

    let (sink2, _rx2) = client_sink();
    let second = controller
        .start(client.clone(), credentials(), PtySize::default(), sink2)
        .await
        .unwrap();

    // The old session is fully torn down before start returns
    assert!(first.state().is_terminal());
    assert_eq!(first.close_reason(), Some(CloseReason::Replaced));
    wait_state(&second, SessionState::ShellOpen).await;

    let probes = factory.probes();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].close_count(), 1);
    assert_eq!(probes.iter().filter(|p| !p.is_closed()).count(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(&client).unwrap().session_id(), second.session_id());
}

#[tokio::test]
async fn test_reject_policy_keeps_live_session() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Reject);
    let client = ClientId::from("client-a");

    let (sink1, _rx1) = client_sink();
    let first = controller
        .start(client.clone(), credentials(), PtySize::default(), sink1)
        .await
        .unwrap();
    wait_state(&first, SessionState::ShellOpen).await;

    let (sink2, _rx2) = client_sink();
    let err = controller
        .start(client.clone(), credentials(), PtySize::default(), sink2)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyActive(_)));
    assert_eq!(first.state(), SessionState::ShellOpen);
    assert_eq!(factory.created(), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_reject_policy_allows_restart_after_close() {
    let (controller, _factory, _registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Reject);
    let client = ClientId::from("client-a");

    let (sink, _rx) = client_sink();
    let first = controller
        .start(client.clone(), credentials(), PtySize::default(), sink.clone())
        .await
        .unwrap();
    wait_state(&first, SessionState::ShellOpen).await;
    assert!(controller.terminate(&client, CloseReason::Logout).await);

    let second = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    assert_ne!(first.session_id(), second.session_id());
    wait_state(&second, SessionState::ShellOpen).await;
}

#[tokio::test]
async fn test_logout_closes_session() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();
    let client = ClientId::from("client-a");

    let handle = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;

    assert!(controller.terminate(&client, CloseReason::Logout).await);
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(registry.is_empty());
    assert_eq!(factory.probes()[0].close_count(), 1);

    let frames = drain(&mut rx);
    assert_eq!(
        frames.last(),
        Some(&Outbound::Event(ServerEvent::SshClosed {
            reason: "logout".to_string()
        }))
    );
    assert!(!controller.terminate(&client, CloseReason::Logout).await);
}

#[tokio::test]
async fn test_terminate_while_connecting() {
    let behavior = MockBehavior {
        connect_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    };
    let (controller, factory, registry) = setup(behavior, DuplicateStartPolicy::Replace);
    let (sink, mut rx) = client_sink();
    let client = ClientId::from("slow");

    let handle = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::Connecting).await;

    assert!(controller.terminate(&client, CloseReason::Disconnected).await);
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(registry.is_empty());
    assert_eq!(factory.probes()[0].close_count(), 1);

    let frames = drain(&mut rx);
    assert!(!frames
        .iter()
        .any(|f| matches!(f, Outbound::Event(ServerEvent::SshReady { .. }))));
}

#[tokio::test]
async fn test_stalled_client_ends_session_with_stream_error() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    // One slot, taken by ssh-ready; nobody drains it
    let (sink, _rx) = ClientSink::channel(1, Duration::from_millis(100));

    let handle = controller
        .start(ClientId::from("stalled"), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;
    let probe = factory.wait_for_probe(1).await;

    probe.emit(Bytes::from_static(b"more output than the client reads"));
    wait_state(&handle, SessionState::Closed).await;

    assert!(registry.is_empty());
    assert_eq!(probe.close_count(), 1);
}

#[tokio::test]
async fn test_input_order_is_preserved() {
    let (controller, factory, _registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, _rx) = client_sink();

    let handle = controller
        .start(ClientId::from("c"), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;
    let probe = factory.wait_for_probe(1).await;

    let mut expected = Vec::new();
    for i in 0..100 {
        let chunk = format!("echo {i}\n");
        expected.extend_from_slice(chunk.as_bytes());
        handle
            .send_input(InputCommand::Data(Bytes::from(chunk)))
            .await
            .unwrap();
    }
    handle
        .send_input(InputCommand::Resize(PtySize { cols: 100, rows: 30 }))
        .await
        .unwrap();

    eventually(|| probe.written() == expected).await;
    eventually(|| probe.resizes() == vec![PtySize { cols: 100, rows: 30 }]).await;
}

#[tokio::test]
async fn test_terminate_all_closes_every_session() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let mut handles = Vec::new();
    let mut receivers = Vec::new();
    for i in 0..5 {
        let (sink, rx) = client_sink();
        receivers.push(rx);
        let handle = controller
            .start(
                ClientId::from(format!("client-{i}")),
                credentials(),
                PtySize::default(),
                sink,
            )
            .await
            .unwrap();
        handles.push(handle);
    }
    for handle in &handles {
        wait_state(handle, SessionState::ShellOpen).await;
    }

    controller
        .terminate_all(CloseReason::Shutdown, Duration::from_secs(2))
        .await;

    assert!(registry.is_empty());
    assert!(handles.iter().all(|h| h.state() == SessionState::Closed));
    assert!(factory.probes().iter().all(|p| p.close_count() == 1));
    for rx in &mut receivers {
        assert_eq!(
            drain(rx).last(),
            Some(&Outbound::Event(ServerEvent::SshClosed {
                reason: "shutdown".to_string()
            }))
        );
    }
}

#[tokio::test]
async fn test_input_after_close_is_refused() {
    let (controller, factory, _registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, _rx) = client_sink();
    let client = ClientId::from("c");

    let handle = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;
    controller.terminate(&client, CloseReason::Logout).await;

    let err = handle
        .send_input(InputCommand::Data(Bytes::from_static(b"late\n")))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::TransportClosed);
    assert_eq!(factory.probes()[0].writes_after_close(), 0);
}

#[tokio::test]
async fn test_input_is_not_starved_by_output() {
    let (controller, factory, _registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let (sink, mut rx) = ClientSink::channel(4, Duration::from_secs(5));

    let handle = controller
        .start(ClientId::from("c"), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&handle, SessionState::ShellOpen).await;
    let probe = factory.wait_for_probe(1).await;
    assert!(matches!(
        next_frame(&mut rx).await,
        Outbound::Event(ServerEvent::SshReady { .. })
    ));

    for i in 0..50 {
        probe.emit(Bytes::from(format!("line {i}\n")));
    }
    // The relay fills the client queue and waits for room
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle
        .send_input(InputCommand::Data(Bytes::from_static(b"\x03")))
        .await
        .unwrap();
    let mut outputs = vec![next_frame(&mut rx).await];
    eventually(|| probe.written() == b"\x03").await;

    // Nothing was lost or reordered while the interrupt went through
    while outputs.len() < 50 {
        outputs.push(next_frame(&mut rx).await);
    }
    for (i, frame) in outputs.iter().enumerate() {
        assert_eq!(*frame, Outbound::Output(Bytes::from(format!("line {i}\n"))));
    }
}

#[tokio::test]
async fn test_replace_waits_out_blocked_predecessor() {
    let factory = MockTransportFactory::new();
    let registry = Arc::new(SessionRegistry::new());
    let controller = SessionController::new(
        registry.clone(),
        Arc::new(factory.clone()),
        ControllerSettings {
            duplicate_start: DuplicateStartPolicy::Replace,
            teardown_timeout: Duration::from_millis(300),
            input_queue_capacity: 16,
        },
    );
    let client = ClientId::from("client-a");
    // Two slots and nobody reading them
    let (sink, mut rx) = ClientSink::channel(2, Duration::from_secs(5));

    let first = controller
        .start(client.clone(), credentials(), PtySize::default(), sink.clone())
        .await
        .unwrap();
    wait_state(&first, SessionState::ShellOpen).await;
    let old = factory.wait_for_probe(1).await;
    for i in 0..10 {
        old.emit(Bytes::from(format!("chunk {i}\n")));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The predecessor cannot deliver its close notice, so it never becomes
    // terminal in time and the successor must not be spawned
    let err = controller
        .start(client.clone(), credentials(), PtySize::default(), sink.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyActive(_)));
    assert_eq!(factory.created(), 1);
    assert_eq!(old.close_count(), 1);
    assert_eq!(first.state(), SessionState::Closing);
    assert!(registry.get(&client).is_none());

    // Once the client drains, the old session finishes and a restart works
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    assert_eq!(
        next_frame(&mut rx).await,
        Outbound::Event(ServerEvent::SshClosed {
            reason: "replaced".to_string()
        })
    );
    wait_state(&first, SessionState::Closed).await;

    let second = controller
        .start(client.clone(), credentials(), PtySize::default(), sink)
        .await
        .unwrap();
    wait_state(&second, SessionState::ShellOpen).await;
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.probes().iter().filter(|p| !p.is_closed()).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replace_starts_leave_one_live_transport() {
    let (controller, factory, registry) =
        setup(MockBehavior::default(), DuplicateStartPolicy::Replace);
    let controller = Arc::new(controller);
    let client = ClientId::from("client-a");

    let mut receivers = Vec::new();
    let mut starts = Vec::new();
    for _ in 0..8 {
        let (sink, rx) = client_sink();
        receivers.push(rx);
        let controller = controller.clone();
        let client = client.clone();
        starts.push(tokio::spawn(async move {
            controller
                .start(client, credentials(), PtySize::default(), sink)
                .await
        }));
    }
    let handles: Vec<SessionHandle> = futures::future::join_all(starts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(factory.created(), 8);
    let live: Vec<&SessionHandle> = handles.iter().filter(|h| h.is_live()).collect();
    assert_eq!(live.len(), 1);
    assert!(handles
        .iter()
        .filter(|h| h.is_live())
        .all(|h| h.close_reason().is_none()));
    assert_eq!(factory.probes().iter().filter(|p| !p.is_closed()).count(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.get(&client).unwrap().session_id(),
        live[0].session_id()
    );
    wait_state(live[0], SessionState::ShellOpen).await;
}
