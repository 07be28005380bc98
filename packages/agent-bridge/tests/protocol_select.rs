//! Protocol auto-selection: an agent that completes the ACP handshake wins
//! the probe; anything else is restarted under a PTY.

#![cfg(unix)]

mod common;

use std::time::Duration;

use agent_bridge::adapter::AdapterConfig;
use agent_bridge::manager::ProtocolManager;
use agent_bridge::message::{AgentStatus, Message, MessagePayload};
use common::{write_mock_agent, MockAgent};
use tokio::sync::mpsc;

async fn recv_message(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    timeout: Duration,
) -> Option<Message> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acp_capable_agent_is_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_mock_agent(dir.path(), &MockAgent::default());

    let manager = ProtocolManager::new();
    let (sink, mut messages) = mpsc::unbounded_channel();
    manager.subscribe(sink).await;

    manager
        .connect(AdapterConfig {
            work_dir: dir.path().to_path_buf(),
            command: script.to_string_lossy().to_string(),
            cols: 120,
            rows: 30,
            ..AdapterConfig::default()
        })
        .await
        .expect("connect");

    assert_eq!(manager.protocol_name().await, "acp");
    assert!(manager.is_connected().await);

    // The session/new response produced the initialized status message.
    let mut saw_idle = false;
    for _ in 0..5 {
        let Some(message) = recv_message(&mut messages, Duration::from_secs(2)).await else {
            break;
        };
        if matches!(message.payload, MessagePayload::Status(AgentStatus::Idle)) {
            assert_eq!(message.protocol(), Some("acp"));
            saw_idle = true;
            break;
        }
    }
    assert!(saw_idle, "expected an idle status after the handshake");

    manager.disconnect().await.expect("disconnect");
    assert!(!manager.is_connected().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_acp_command_falls_back_to_pty() {
    // Keep the probe window short; cat will never answer it.
    std::env::set_var("AGENT_BRIDGE_ACP_INIT_TIMEOUT_MS", "400");

    let dir = tempfile::tempdir().expect("tempdir");
    let manager = ProtocolManager::new();
    let (sink, mut messages) = mpsc::unbounded_channel();
    manager.subscribe(sink).await;

    manager
        .connect(AdapterConfig {
            work_dir: dir.path().to_path_buf(),
            command: "cat".to_string(),
            cols: 80,
            rows: 24,
            ..AdapterConfig::default()
        })
        .await
        .expect("connect");

    assert_eq!(manager.protocol_name().await, "pty");

    // Bytes written to the PTY come back verbatim (cat echoes, and the
    // terminal echoes the input as well).
    manager
        .send(Message::outbound(MessagePayload::Content(
            "roundtrip-marker".to_string(),
        )))
        .await
        .expect("send");

    let mut collected = String::new();
    let mut found = false;
    for _ in 0..20 {
        let Some(message) = recv_message(&mut messages, Duration::from_secs(2)).await else {
            break;
        };
        if let MessagePayload::Content(chunk) = &message.payload {
            assert_eq!(message.protocol(), Some("pty"));
            assert!(message.is_raw());
            collected.push_str(chunk);
            if collected.contains("roundtrip-marker") {
                found = true;
                break;
            }
        }
    }
    assert!(found, "expected PTY output to echo the input, got: {collected:?}");

    manager.disconnect().await.expect("disconnect");
}
