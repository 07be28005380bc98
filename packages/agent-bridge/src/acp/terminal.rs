//! Shell host for agent-driven terminal callbacks.
//!
//! When the agent is remote to the user's machine it runs shell commands
//! *through* the bridge: `terminal/create` registers a command and returns an
//! id immediately, the command executes in the background, and the agent
//! collects the outcome with `terminal/output` / `terminal/wait_for_exit`,
//! both of which block until completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_bridge_error::BridgeError;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};

pub const DEFAULT_OUTPUT_BYTE_LIMIT: usize = 32_000;
const DEFAULT_RELEASE_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TerminalResult {
    pub output: String,
    pub exit_code: i64,
    pub truncated: bool,
}

struct TerminalEntry {
    result: Mutex<Option<TerminalResult>>,
    done: watch::Sender<bool>,
}

/// Registry of live agent-driven shell commands, indexed by the
/// agent-visible terminal id.
pub struct TerminalHost {
    next_id: AtomicU64,
    terminals: Arc<Mutex<HashMap<String, Arc<TerminalEntry>>>>,
    release_grace: Duration,
}

impl TerminalHost {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            terminals: Arc::new(Mutex::new(HashMap::new())),
            release_grace: DEFAULT_RELEASE_GRACE,
        }
    }

    #[cfg(test)]
    fn with_release_grace(grace: Duration) -> Self {
        Self {
            release_grace: grace,
            ..Self::new()
        }
    }

    /// Register a command and start it in the background. Returns the new
    /// terminal id without waiting for the command to finish.
    pub async fn create(
        &self,
        work_dir: &Path,
        command: String,
        env: Vec<(String, String)>,
        output_byte_limit: usize,
    ) -> String {
        let terminal_id = format!("term_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (done, _) = watch::channel(false);
        let entry = Arc::new(TerminalEntry {
            result: Mutex::new(None),
            done,
        });

        self.terminals
            .lock()
            .await
            .insert(terminal_id.clone(), entry.clone());

        tracing::info!(terminal_id = %terminal_id, command = %command, "terminal command registered");

        let terminals = self.terminals.clone();
        let release_grace = self.release_grace;
        let work_dir = work_dir.to_path_buf();
        let id = terminal_id.clone();
        tokio::spawn(async move {
            let result = run_shell_command(&work_dir, &command, env, output_byte_limit).await;
            tracing::info!(
                terminal_id = %id,
                exit_code = result.exit_code,
                output_len = result.output.len(),
                truncated = result.truncated,
                "terminal command completed"
            );
            *entry.result.lock().await = Some(result);
            let _ = entry.done.send(true);

            // Bound memory if the agent never releases.
            tokio::time::sleep(release_grace).await;
            terminals.lock().await.remove(&id);
        });

        terminal_id
    }

    /// Block until the command exits and return its exit code.
    pub async fn wait_for_exit(&self, terminal_id: &str) -> Result<i64, BridgeError> {
        let result = self.wait_for_result(terminal_id).await?;
        Ok(result.exit_code)
    }

    /// Block until the command exits and return the captured output. The
    /// agent may poll before completion.
    pub async fn output(&self, terminal_id: &str) -> Result<TerminalResult, BridgeError> {
        self.wait_for_result(terminal_id).await
    }

    /// Drop the state immediately.
    pub async fn release(&self, terminal_id: &str) {
        self.terminals.lock().await.remove(terminal_id);
    }

    async fn wait_for_result(&self, terminal_id: &str) -> Result<TerminalResult, BridgeError> {
        let entry = self
            .terminals
            .lock()
            .await
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| BridgeError::TerminalNotFound {
                terminal_id: terminal_id.to_string(),
            })?;

        let mut done = entry.done.subscribe();
        done.wait_for(|completed| *completed)
            .await
            .map_err(|_| BridgeError::TerminalNotFound {
                terminal_id: terminal_id.to_string(),
            })?;

        let result = entry.result.lock().await;
        result.clone().ok_or_else(|| BridgeError::TerminalNotFound {
            terminal_id: terminal_id.to_string(),
        })
    }
}

impl Default for TerminalHost {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_shell_command(
    work_dir: &Path,
    command: &str,
    env: Vec<(String, String)>,
    output_byte_limit: usize,
) -> TerminalResult {
    let mut cmd = shell_command(command);
    let work_dir = if work_dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        work_dir.to_path_buf()
    };
    cmd.current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(error = %err, command = %command, "failed to run terminal command");
            return TerminalResult {
                output: String::new(),
                exit_code: 1,
                truncated: false,
            };
        }
    };

    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    let truncated = combined.len() > output_byte_limit;
    if truncated {
        combined.truncate(output_byte_limit);
    }

    TerminalResult {
        output: String::from_utf8_lossy(&combined).to_string(),
        exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        truncated,
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
