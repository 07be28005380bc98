//! Losing the relay must not touch running agents: the bridge reconnects
//! with a back-off and resumes forwarding frames for the same session.

#![cfg(unix)]

use std::time::Duration;

use agent_bridge::bridge::{Bridge, WireFrame};
use agent_bridge::config::BridgeConfig;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

type ServerWs = WebSocketStream<TcpStream>;

async fn recv_wire_frame(
    incoming: &mut futures::stream::SplitStream<ServerWs>,
    timeout: Duration,
) -> WireFrame {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        match tokio::time::timeout(remaining, incoming.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                return serde_json::from_str(&text).expect("wire frame")
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(err))) => panic!("relay read error: {err}"),
            Ok(None) => panic!("relay connection closed early"),
            Err(_) => panic!("timed out waiting for a wire frame"),
        }
    }
}

async fn recv_frame_of_kind(
    incoming: &mut futures::stream::SplitStream<ServerWs>,
    kind: &str,
    timeout: Duration,
) -> WireFrame {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        if remaining.is_zero() {
            panic!("timed out waiting for frame {kind}");
        }
        let frame = recv_wire_frame(incoming, remaining).await;
        if frame.kind == kind {
            return frame;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relay_reconnect_preserves_the_agent_session() {
    std::env::set_var("AGENT_BRIDGE_RECONNECT_MS", "200");
    std::env::set_var("AGENT_BRIDGE_ACP_INIT_TIMEOUT_MS", "400");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");

    let dir = tempfile::tempdir().expect("tempdir");
    let config = BridgeConfig {
        server_url: format!("ws://{addr}"),
        user_id: "user-1".to_string(),
        device_id: "device-1".to_string(),
        device_token: "token-1".to_string(),
        ..BridgeConfig::default()
    };
    let (bridge, outbound_rx) = Bridge::new(config, dir.path().join("config"));
    let runner = tokio::spawn(bridge.clone().run(outbound_rx));

    // First connection: announce, start a PTY session, then die mid-session.
    {
        let (stream, _) = listener.accept().await.expect("accept first");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake first");
        let (mut sink, mut incoming) = ws.split();

        let online = recv_wire_frame(&mut incoming, Duration::from_secs(5)).await;
        assert_eq!(online.kind, "device:online");
        assert_eq!(online.payload["deviceId"], "device-1");

        let start = WireFrame::new(
            "session:start",
            json!({
                "sessionId": "s1",
                "cliType": "cat",
                "workDir": dir.path().to_string_lossy(),
                "cols": 80,
                "rows": 24,
            }),
        );
        sink.send(WsMessage::Text(
            serde_json::to_string(&start).expect("encode"),
        ))
        .await
        .expect("send start");

        let started = recv_frame_of_kind(&mut incoming, "session:started", Duration::from_secs(10)).await;
        assert_eq!(started.payload["sessionId"], "s1");
        // Connection dropped here without a close handshake.
    }

    // The bridge reconnects on its own; the session is still there.
    let (stream, _) = listener.accept().await.expect("accept second");
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .expect("handshake second");
    let (mut sink, mut incoming) = ws.split();

    let online = recv_wire_frame(&mut incoming, Duration::from_secs(10)).await;
    assert_eq!(online.kind, "device:online");

    let session = bridge.sessions().get("s1").await.expect("session survived");
    assert!(session.protocol.is_connected().await);

    let send = WireFrame::new(
        "session:send",
        json!({ "sessionId": "s1", "content": "ping-after-reconnect" }),
    );
    sink.send(WsMessage::Text(serde_json::to_string(&send).expect("encode")))
        .await
        .expect("send content");

    // cat echoes the line back through the PTY, and the frame reaches the
    // relay over the new connection.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut collected = String::new();
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        if remaining.is_zero() {
            panic!("no echoed output after reconnect; collected: {collected:?}");
        }
        let frame = recv_frame_of_kind(&mut incoming, "session:output", remaining).await;
        assert_eq!(frame.payload["sessionId"], "s1");
        collected.push_str(frame.payload["content"].as_str().unwrap_or_default());
        if collected.contains("ping-after-reconnect") {
            break;
        }
    }

    bridge.shutdown().await;
    runner.abort();
}
