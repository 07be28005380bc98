//! Shared helpers: scripted mock ACP agents and polling utilities.
//!
//! A mock agent is a `/bin/sh` script speaking line-delimited JSON-RPC on
//! stdio. Every line it receives is appended to `agent-in.jsonl` next to the
//! script so tests can assert on the exact bytes the bridge sent.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_bridge::bridge::WireFrame;
use tokio::sync::mpsc;

const MOCK_AGENT_TEMPLATE: &str = r#"#!/bin/sh
log="$(dirname "$0")/agent-in.jsonl"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log"
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":1,"agentInfo":{"name":"mock-agent","version":"0.1.0"}}}'
      ;;
    *'"method":"session/new"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"sessionId":"mock-session"}}'
__ON_SESSION__
      ;;
    *'"method":"session/prompt"'*)
__ON_PROMPT__
      ;;
__EXTRA_CASES__
  esac
done
"#;

/// Behavior hooks for a scripted agent. Each hook is a block of shell lines
/// run when the matching request arrives.
#[derive(Default)]
pub struct MockAgent {
    pub on_session_new: String,
    pub on_prompt: String,
    pub extra_cases: String,
}

/// Write the mock agent script into `dir` and return its path.
pub fn write_mock_agent(dir: &Path, behavior: &MockAgent) -> PathBuf {
    let script = MOCK_AGENT_TEMPLATE
        .replace("__ON_SESSION__", &behavior.on_session_new)
        .replace("__ON_PROMPT__", &behavior.on_prompt)
        .replace("__EXTRA_CASES__", &behavior.extra_cases);

    let path = dir.join("mock-agent.sh");
    std::fs::write(&path, script).expect("write mock agent");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod mock agent");
    }
    path
}

pub fn agent_log_path(dir: &Path) -> PathBuf {
    dir.join("agent-in.jsonl")
}

pub fn read_agent_log(dir: &Path) -> String {
    std::fs::read_to_string(agent_log_path(dir)).unwrap_or_default()
}

/// Poll until the agent log satisfies the predicate or the deadline passes.
pub async fn wait_for_log<F>(dir: &Path, timeout: Duration, predicate: F) -> String
where
    F: Fn(&str) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let log = read_agent_log(dir);
        if predicate(&log) {
            return log;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for agent log; current log:\n{log}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Receive the next frame of the given kind, skipping everything else.
pub async fn recv_frame_of_kind(
    rx: &mut mpsc::UnboundedReceiver<WireFrame>,
    kind: &str,
    timeout: Duration,
) -> WireFrame {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(frame)) if frame.kind == kind => return frame,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("frame stream closed while waiting for {kind}"),
            Err(_) => panic!("timed out waiting for frame {kind}"),
        }
    }
}

/// Drain frames for `window` and assert none of the given kind shows up.
pub async fn assert_no_frame_of_kind(
    rx: &mut mpsc::UnboundedReceiver<WireFrame>,
    kind: &str,
    window: Duration,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(frame)) if frame.kind == kind => {
                panic!("unexpected frame {kind}: {:?}", frame.payload)
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return,
        }
    }
}
