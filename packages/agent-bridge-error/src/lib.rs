use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable tags for the error kinds the bridge can surface
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Transport,
    Protocol,
    ChildProcess,
    TerminalNotFound,
    SessionNotFound,
    NotConnected,
    Timeout,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::ChildProcess => "child_process",
            Self::TerminalNotFound => "terminal_not_found",
            Self::SessionNotFound => "session_not_found",
            Self::NotConnected => "not_connected",
            Self::Timeout => "timeout",
            Self::Config => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("protocol violation: {message}")]
    Protocol { message: String },
    #[error("child process error: {message}")]
    ChildProcess { message: String },
    #[error("terminal not found: {terminal_id}")]
    TerminalNotFound { terminal_id: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("adapter is not connected")]
    NotConnected,
    #[error("timeout")]
    Timeout { message: Option<String> },
    #[error("config error: {message}")]
    Config { message: String },
}

impl BridgeError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn child(message: impl Into<String>) -> Self {
        Self::ChildProcess {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::ChildProcess { .. } => ErrorKind::ChildProcess,
            Self::TerminalNotFound { .. } => ErrorKind::TerminalNotFound,
            Self::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Wire-payload representation used by `session:error` frames.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind().as_str(),
            "message": self.to_string(),
        })
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}
