//! Transport adapter contract shared by the ACP and PTY implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use agent_bridge_error::BridgeError;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::Message;

/// Subscription sink for adapter-emitted messages. Installing a new sink
/// replaces the previous one; sends never block the adapter's reader.
pub type MessageSink = mpsc::UnboundedSender<Message>;

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    /// Working directory for the spawned agent. ACP peers require an
    /// absolute path; `connect` resolves relative values.
    pub work_dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    /// Environment layered on top of the parent process environment.
    pub env: HashMap<String, String>,
    /// Overrides applied last. An empty-string value removes the variable
    /// entirely instead of setting it to "".
    pub custom_env: HashMap<String, String>,
    /// Terminal geometry, honored by the PTY adapter only.
    pub cols: u16,
    pub rows: u16,
}

impl AdapterConfig {
    pub fn cols_or_default(&self) -> u16 {
        if self.cols == 0 {
            DEFAULT_COLS
        } else {
            self.cols
        }
    }

    pub fn rows_or_default(&self) -> u16 {
        if self.rows == 0 {
            DEFAULT_ROWS
        } else {
            self.rows
        }
    }
}

/// Compute the child environment: parent env, then `env`, then `custom_env`
/// where an empty string unsets the variable. Some agents (Claude-ACP among
/// them) refuse to start while markers from their own shell are present, so
/// unset must really remove the key.
pub fn merged_environment(
    parent: impl IntoIterator<Item = (String, String)>,
    env: &HashMap<String, String>,
    custom_env: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: HashMap<String, String> = parent.into_iter().collect();
    for (key, value) in env {
        merged.insert(key.clone(), value.clone());
    }
    for (key, value) in custom_env {
        if value.is_empty() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    let mut pairs: Vec<(String, String)> = merged.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

/// Uniform lifecycle + messaging surface implemented by each protocol
/// adapter. One adapter owns one child process for its whole lifetime.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self, config: AdapterConfig) -> Result<(), BridgeError>;

    async fn disconnect(&self) -> Result<(), BridgeError>;

    fn is_connected(&self) -> bool;

    /// Translate a unified message into protocol traffic. Safe to call
    /// concurrently; writes from one caller are serialized.
    async fn send(&self, message: Message) -> Result<(), BridgeError>;

    /// Install the message sink. Replaces any previously installed sink.
    fn subscribe(&self, sink: MessageSink);

    fn supports_permissions(&self) -> bool {
        false
    }

    fn supports_file_ops(&self) -> bool {
        false
    }

    fn supports_tool_calls(&self) -> bool {
        false
    }

    /// Resize the terminal, where the transport has one.
    async fn resize(&self, _cols: u16, _rows: u16) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn custom_env_empty_string_unsets() {
        let env = HashMap::new();
        let mut custom = HashMap::new();
        custom.insert("CLAUDECODE".to_string(), String::new());

        let merged = merged_environment(parent(&[("CLAUDECODE", "1"), ("HOME", "/root")]), &env, &custom);
        assert!(merged.iter().all(|(key, _)| key != "CLAUDECODE"));
        assert!(merged.contains(&("HOME".to_string(), "/root".to_string())));
    }

    #[test]
    fn custom_env_overrides_layered_env() {
        let mut env = HashMap::new();
        env.insert("MODE".to_string(), "base".to_string());
        let mut custom = HashMap::new();
        custom.insert("MODE".to_string(), "override".to_string());

        let merged = merged_environment(parent(&[]), &env, &custom);
        assert!(merged.contains(&("MODE".to_string(), "override".to_string())));
    }

    #[test]
    fn geometry_defaults_apply_when_unset() {
        let config = AdapterConfig::default();
        assert_eq!(config.cols_or_default(), 120);
        assert_eq!(config.rows_or_default(), 30);
    }
}
