//! Protocol-independent message model shared by every adapter.
//!
//! Each adapter translates its native traffic into [`Message`] envelopes; the
//! router only ever sees this vocabulary. `meta` always carries the name of
//! the originating protocol so consumers can tell a structured ACP chunk from
//! an opaque PTY byte run.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_ACP: &str = "acp";
pub const PROTOCOL_PTY: &str = "pty";

/// Current state of the spawned agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Streaming,
    ToolExecuting,
    PermissionPending,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Streaming => "streaming",
            Self::ToolExecuting => "tool_executing",
            Self::PermissionPending => "permission_pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Agents report free-form status strings; anything unrecognized is
    /// treated as pending.
    pub fn parse(value: &str) -> Self {
        match value {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Permission request surfaced by an agent.
///
/// `id` is the JSON-RPC request id exactly as it appeared on the wire. The
/// agent rejects replies whose id changed type, so it is carried as an opaque
/// [`Value`] and never widened to a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: Value,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Map<String, Value>,
    pub description: String,
    pub risk: RiskLevel,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Chosen option for a pending permission request, echoing the original id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub id: Value,
    pub option_id: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation: i64,
    pub cache_read: i64,
    pub context_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Agent response text. For PTY this is an opaque byte run decoded
    /// lossily; `meta.raw` is set in that case.
    Content(String),
    /// Agent reasoning text.
    Thought(String),
    ToolCall(ToolCall),
    /// Agent-initiated permission request awaiting a decision.
    Permission(PermissionRequest),
    /// Decision travelling back towards the agent.
    PermissionReply(PermissionResponse),
    Status(AgentStatus),
    /// Task plan as reported by the agent, passed through untouched.
    Plan(Value),
    Usage(UsageStats),
    Error(String),
    /// Interrupt the in-flight generation; carries a free-form reason.
    Cancel(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub payload: MessagePayload,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Message {
    pub fn new(payload: MessagePayload, protocol: &str) -> Self {
        let mut meta = Map::new();
        meta.insert("protocol".to_string(), Value::String(protocol.to_string()));
        Self { payload, meta }
    }

    pub fn acp(payload: MessagePayload) -> Self {
        Self::new(payload, PROTOCOL_ACP)
    }

    pub fn pty(payload: MessagePayload) -> Self {
        Self::new(payload, PROTOCOL_PTY)
    }

    /// A bare message with no originating protocol, used for router-initiated
    /// sends (the adapter fills in its own semantics).
    pub fn outbound(payload: MessagePayload) -> Self {
        Self {
            payload,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    pub fn protocol(&self) -> Option<&str> {
        self.meta.get("protocol").and_then(Value::as_str)
    }

    pub fn is_raw(&self) -> bool {
        self.meta
            .get("raw")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
