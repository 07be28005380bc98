//! PTY transport: the fallback for CLIs that do not speak ACP.
//!
//! The agent runs attached to a pseudo-terminal and its raw byte stream is
//! forwarded as opaque `content` messages. No structured semantics are
//! available on this path; every capability predicate reports false.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use agent_bridge_error::BridgeError;
use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::adapter::{merged_environment, AdapterConfig, MessageSink, TransportAdapter};
use crate::message::{AgentStatus, Message, MessagePayload};

const PTY_READ_BUFFER: usize = 4096;

pub struct PtyAdapter {
    inner: Arc<PtyInner>,
}

struct PtyInner {
    connected: AtomicBool,
    sink: Mutex<Option<MessageSink>>,
    master: AsyncMutex<Option<Box<dyn MasterPty + Send>>>,
    input_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    pid: AtomicI64,
}

impl PtyAdapter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PtyInner {
                connected: AtomicBool::new(false),
                sink: Mutex::new(None),
                master: AsyncMutex::new(None),
                input_tx: Mutex::new(None),
                pid: AtomicI64::new(0),
            }),
        }
    }
}

impl Default for PtyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyInner {
    fn emit(&self, message: Message) {
        let sink = self.sink.lock().expect("pty sink lock");
        if let Some(sink) = sink.as_ref() {
            let _ = sink.send(message);
        }
    }
}

#[async_trait]
impl TransportAdapter for PtyAdapter {
    fn name(&self) -> &'static str {
        "pty"
    }

    async fn connect(&self, config: AdapterConfig) -> Result<(), BridgeError> {
        let cols = config.cols_or_default();
        let rows = config.rows_or_default();
        tracing::info!(
            command = %config.command,
            work_dir = %config.work_dir.display(),
            cols,
            rows,
            "starting PTY agent"
        );

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| BridgeError::child(format!("failed to open PTY: {err}")))?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        let work_dir = if config.work_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            config.work_dir.clone()
        };
        cmd.cwd(&work_dir);
        cmd.env_clear();
        for (key, value) in merged_environment(std::env::vars(), &config.env, &config.custom_env) {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| BridgeError::child(format!("failed to spawn PTY command: {err}")))?;
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0) as i64;
        self.inner.pid.store(pid, Ordering::SeqCst);
        self.inner.connected.store(true, Ordering::SeqCst);
        tracing::info!(pid, "PTY agent started");

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| BridgeError::child(format!("failed to clone PTY reader: {err}")))?;
        let reader_inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut buffer = [0u8; PTY_READ_BUFFER];
            loop {
                if !reader_inner.connected.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => {
                        let content = String::from_utf8_lossy(&buffer[..count]).to_string();
                        reader_inner.emit(
                            Message::pty(MessagePayload::Content(content))
                                .with_meta("raw", Value::Bool(true)),
                        );
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "PTY read ended");
                        break;
                    }
                }
            }
        });

        let mut writer = pair
            .master
            .take_writer()
            .map_err(|err| BridgeError::child(format!("failed to take PTY writer: {err}")))?;
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::task::spawn_blocking(move || {
            while let Some(payload) = input_rx.blocking_recv() {
                if writer.write_all(&payload).is_err() {
                    break;
                }
                if writer.flush().is_err() {
                    break;
                }
            }
        });

        let exit_inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let exit_code = child
                .wait()
                .ok()
                .map(|status| status.exit_code() as i64)
                .unwrap_or(-1);
            exit_inner.connected.store(false, Ordering::SeqCst);
            tracing::info!(exit_code, "PTY agent exited");
            exit_inner.emit(
                Message::pty(MessagePayload::Status(AgentStatus::Idle))
                    .with_meta("exit_code", Value::from(exit_code)),
            );
        });

        *self.inner.master.lock().await = Some(pair.master);
        *self.inner.input_tx.lock().expect("pty input lock") = Some(input_tx);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("disconnecting PTY agent");

        self.inner.input_tx.lock().expect("pty input lock").take();
        self.inner.master.lock().await.take();
        terminate_process(self.inner.pid.load(Ordering::SeqCst));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: Message) -> Result<(), BridgeError> {
        // Only content writes make sense against a raw terminal.
        let MessagePayload::Content(content) = message.payload else {
            return Ok(());
        };

        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }

        let input_tx = self
            .inner
            .input_tx
            .lock()
            .expect("pty input lock")
            .clone()
            .ok_or(BridgeError::NotConnected)?;

        let mut payload = content.into_bytes();
        payload.push(b'\n');
        input_tx
            .send(payload)
            .await
            .map_err(|_| BridgeError::NotConnected)
    }

    fn subscribe(&self, sink: MessageSink) {
        *self.inner.sink.lock().expect("pty sink lock") = Some(sink);
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), BridgeError> {
        let master = self.inner.master.lock().await;
        if let Some(master) = master.as_ref() {
            master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|err| BridgeError::child(format!("failed to resize PTY: {err}")))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn terminate_process(pid: i64) {
    if pid <= 0 {
        return;
    }
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_process(_pid: i64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_no_structured_capabilities() {
        let adapter = PtyAdapter::new();
        assert_eq!(adapter.name(), "pty");
        assert!(!adapter.supports_permissions());
        assert!(!adapter.supports_file_ops());
        assert!(!adapter.supports_tool_calls());
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let adapter = PtyAdapter::new();
        let result = adapter
            .send(Message::outbound(MessagePayload::Content("hi".to_string())))
            .await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
    }
}
