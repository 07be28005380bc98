//! Session registry: one entry per spawned agent, keyed by session id.
//!
//! The manager owns the CLI-kind command table and the permission-mode
//! transforms, wires each session's protocol manager to the single router
//! subscriber, and tears sessions down on stop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use agent_bridge_error::BridgeError;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::adapter::AdapterConfig;
use crate::manager::ProtocolManager;
use crate::message::{now_ms, Message, MessagePayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliKind {
    Claude,
    Qwen,
    Goose,
    Gemini,
    Kiro,
    Cline,
    Codex,
    /// Anything else runs as-is and usually lands on the PTY fallback.
    Custom(String),
}

impl CliKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "claude" => Self::Claude,
            "qwen" => Self::Qwen,
            "goose" => Self::Goose,
            "gemini" => Self::Gemini,
            "kiro" => Self::Kiro,
            "cline" => Self::Cline,
            "codex" => Self::Codex,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Claude => "claude",
            Self::Qwen => "qwen",
            Self::Goose => "goose",
            Self::Gemini => "gemini",
            Self::Kiro => "kiro",
            Self::Cline => "cline",
            Self::Codex => "codex",
            Self::Custom(other) => other,
        }
    }

    /// Startup command for the CLI, preferring each tool's ACP entry point.
    pub fn command(&self) -> (String, Vec<String>) {
        match self {
            Self::Claude => (
                "npx".to_string(),
                vec!["@zed-industries/claude-code-acp".to_string()],
            ),
            Self::Qwen => (
                "qwen-code".to_string(),
                vec!["--experimental-acp".to_string()],
            ),
            Self::Goose => ("goose".to_string(), vec!["acp".to_string()]),
            Self::Gemini => ("gemini-cli".to_string(), vec!["--acp".to_string()]),
            Self::Kiro => ("kiro".to_string(), vec!["chat".to_string()]),
            Self::Cline => ("cline".to_string(), Vec::new()),
            Self::Codex => ("codex".to_string(), Vec::new()),
            Self::Custom(other) => (other.clone(), Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Default,
    Plan,
    AcceptEdits,
    AcceptAll,
}

impl PermissionMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "plan" => Self::Plan,
            "accept-edits" => Self::AcceptEdits,
            "accept-all" => Self::AcceptAll,
            _ => Self::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Plan => "plan",
            Self::AcceptEdits => "accept-edits",
            Self::AcceptAll => "accept-all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub session_id: Option<String>,
    pub cli: CliKind,
    pub work_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub permission_mode: PermissionMode,
}

pub struct Session {
    pub id: String,
    pub cli: CliKind,
    pub work_dir: PathBuf,
    pub permission_mode: PermissionMode,
    pub created_at_ms: i64,
    status: Mutex<SessionStatus>,
    pub protocol: Arc<ProtocolManager>,
}

impl Session {
    pub async fn send(&self, content: String) -> Result<(), BridgeError> {
        self.protocol
            .send(Message::outbound(MessagePayload::Content(content)))
            .await
    }

    pub async fn cancel(&self, reason: String) -> Result<(), BridgeError> {
        self.protocol
            .send(Message::outbound(MessagePayload::Cancel(reason)))
            .await
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.lock().await
    }

    pub async fn protocol_name(&self) -> &'static str {
        self.protocol.protocol_name().await
    }
}

/// Message emitted by a session toward the router, tagged with the session id
/// so no adapter pointer crosses the callback boundary.
#[derive(Debug)]
pub struct SessionEvent {
    pub session_id: String,
    pub message: Message,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sessions: RwLock::new(HashMap::new()),
                events,
            }),
            events_rx,
        )
    }

    pub async fn create(&self, spec: SessionSpec) -> Result<Arc<Session>, BridgeError> {
        let session_id = spec
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.sessions.read().await.contains_key(&session_id) {
            return Err(BridgeError::InvalidRequest {
                message: format!("session already exists: {session_id}"),
            });
        }

        let protocol = Arc::new(ProtocolManager::new());

        // Forward adapter messages into the router together with the id.
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<Message>();
        protocol.subscribe(sink_tx).await;
        let events = self.events.clone();
        let forward_id = session_id.clone();
        tokio::spawn(async move {
            while let Some(message) = sink_rx.recv().await {
                let _ = events.send(SessionEvent {
                    session_id: forward_id.clone(),
                    message,
                });
            }
        });

        let config = build_adapter_config(&spec);
        protocol.connect(config).await?;
        let protocol_name = protocol.protocol_name().await;
        tracing::info!(
            session_id = %session_id,
            cli = spec.cli.as_str(),
            protocol = protocol_name,
            "session connected"
        );

        let session = Arc::new(Session {
            id: session_id.clone(),
            cli: spec.cli,
            work_dir: spec.work_dir,
            permission_mode: spec.permission_mode,
            created_at_ms: now_ms(),
            status: Mutex::new(SessionStatus::Active),
            protocol,
        });

        self.sessions
            .write()
            .await
            .insert(session_id, session.clone());
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Disconnect the adapter and drop the index entry. Stopping an unknown
    /// session is a no-op.
    pub async fn stop(&self, session_id: &str) -> Result<(), BridgeError> {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            *session.status.lock().await = SessionStatus::Completed;
            session.protocol.disconnect().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let sessions = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, session)| session).collect::<Vec<_>>()
        };
        for session in sessions {
            *session.status.lock().await = SessionStatus::Completed;
            if let Err(err) = session.protocol.disconnect().await {
                tracing::warn!(session_id = %session.id, error = %err, "failed to disconnect session");
            }
        }
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), BridgeError> {
        match self.get(session_id).await {
            Some(session) => session.protocol.resize(cols, rows).await,
            None => Ok(()),
        }
    }
}

/// Translate a session spec into the adapter config: CLI command table,
/// permission-mode args and env, and the claude nested-session unset.
pub(crate) fn build_adapter_config(spec: &SessionSpec) -> AdapterConfig {
    let (command, args) = spec.cli.command();
    let mut config = AdapterConfig {
        work_dir: spec.work_dir.clone(),
        command,
        args,
        env: HashMap::new(),
        custom_env: HashMap::new(),
        cols: spec.cols,
        rows: spec.rows,
    };

    // Claude refuses nested sessions while CLAUDECODE is set in its
    // environment; the empty string unsets it in the child.
    if spec.cli == CliKind::Claude {
        config
            .custom_env
            .insert("CLAUDECODE".to_string(), String::new());
    }

    apply_permission_mode(spec.permission_mode, &spec.cli, &mut config);
    config
}

fn apply_permission_mode(mode: PermissionMode, cli: &CliKind, config: &mut AdapterConfig) {
    let set = |config: &mut AdapterConfig, key: &str, value: &str| {
        config
            .custom_env
            .insert(key.to_string(), value.to_string());
    };

    match mode {
        PermissionMode::Default => {}
        PermissionMode::Plan => match cli {
            CliKind::Claude => {
                set(config, "CLAUDE_PERMISSION_MODE", "plan");
                config.args.push("--plan".to_string());
            }
            CliKind::Qwen => set(config, "QWEN_PERMISSION_MODE", "plan"),
            CliKind::Goose => set(config, "GOOSE_MODE", "plan"),
            CliKind::Gemini => set(config, "GEMINI_PERMISSION_MODE", "plan"),
            _ => {}
        },
        PermissionMode::AcceptEdits => match cli {
            CliKind::Claude => set(config, "CLAUDE_PERMISSION_MODE", "accept-edits"),
            CliKind::Qwen => set(config, "QWEN_PERMISSION_MODE", "accept-edits"),
            CliKind::Goose => set(config, "GOOSE_MODE", "auto-edit"),
            CliKind::Gemini => set(config, "GEMINI_PERMISSION_MODE", "accept-edits"),
            _ => {}
        },
        PermissionMode::AcceptAll => match cli {
            CliKind::Claude => {
                set(config, "CLAUDE_PERMISSION_MODE", "accept-all");
                config.args.push("--dangerously-skip-permissions".to_string());
            }
            CliKind::Qwen => set(config, "QWEN_PERMISSION_MODE", "accept-all"),
            CliKind::Goose => set(config, "GOOSE_MODE", "auto"),
            CliKind::Gemini => set(config, "GEMINI_PERMISSION_MODE", "accept-all"),
            _ => {}
        },
    }
}
