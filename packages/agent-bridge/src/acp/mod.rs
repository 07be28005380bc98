//! ACP transport: a JSON-RPC 2.0 peer over the agent's stdio.
//!
//! The adapter plays both roles on one stream. As a client it drives
//! `initialize`, `session/new`, `session/prompt`, and `session/cancel`; as a
//! server it answers the callbacks the agent issues back at it
//! (`session/update`, `session/request_permission`, `fs/*`, `terminal/*`).
//! Dispatch routes on the presence of `method` versus `result`/`error`, never
//! on id ranges, and ids are carried as raw [`Value`]s so a response always
//! echoes the exact wire type the agent used.

pub mod terminal;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agent_bridge_error::BridgeError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use crate::adapter::{merged_environment, AdapterConfig, MessageSink, TransportAdapter};
use crate::message::{
    AgentStatus, Message, MessagePayload, PermissionRequest, RiskLevel, ToolCall, ToolCallStatus,
    UsageStats,
};

use self::terminal::{TerminalHost, DEFAULT_OUTPUT_BYTE_LIMIT};

pub const PROTOCOL_VERSION: i64 = 1;

/// A single JSON-RPC line larger than this is a protocol violation.
const MAX_LINE_BYTES: usize = 1024 * 1024;
/// Grace between `initialize` and `session/new` so the agent can finish
/// processing the handshake before the session request lands.
const SESSION_NEW_GRACE: Duration = Duration::from_millis(100);

const JSONRPC_INVALID_PARAMS: i64 = -32602;
const JSONRPC_INTERNAL_ERROR: i64 = -32603;

const DANGEROUS_COMMAND_MARKERS: &[&str] = &[
    "rm ", "sudo ", "chmod ", "chown ", "mkfs", "dd ", "> /dev/", "shutdown", "reboot",
];

pub struct AcpAdapter {
    inner: Arc<AcpInner>,
}

struct AcpInner {
    connected: AtomicBool,
    sink: StdMutex<Option<MessageSink>>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    work_dir: StdMutex<PathBuf>,
    agent_session_id: StdMutex<Option<String>>,
    next_request_id: AtomicI64,
    input_tokens: AtomicI64,
    output_tokens: AtomicI64,
    terminals: TerminalHost,
}

impl AcpAdapter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AcpInner {
                connected: AtomicBool::new(false),
                sink: StdMutex::new(None),
                stdin: Mutex::new(None),
                child: Mutex::new(None),
                work_dir: StdMutex::new(PathBuf::new()),
                agent_session_id: StdMutex::new(None),
                next_request_id: AtomicI64::new(0),
                input_tokens: AtomicI64::new(0),
                output_tokens: AtomicI64::new(0),
                terminals: TerminalHost::new(),
            }),
        }
    }
}

impl Default for AcpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for AcpAdapter {
    fn name(&self) -> &'static str {
        "acp"
    }

    async fn connect(&self, config: AdapterConfig) -> Result<(), BridgeError> {
        let work_dir = absolute_work_dir(&config.work_dir)?;
        tracing::info!(
            command = %config.command,
            work_dir = %work_dir.display(),
            "starting ACP agent"
        );
        *self.inner.work_dir.lock().expect("acp work dir lock") = work_dir.clone();

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .current_dir(&work_dir)
            .env_clear()
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in merged_environment(std::env::vars(), &config.env, &config.custom_env) {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|err| {
            BridgeError::child(format!("failed to start ACP agent {}: {err}", config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::child("failed to capture ACP agent stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::child("failed to capture ACP agent stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::child("failed to capture ACP agent stderr"))?;

        tracing::info!(pid = child.id(), "ACP agent started");
        self.inner.connected.store(true, Ordering::SeqCst);
        *self.inner.stdin.lock().await = Some(stdin);
        *self.inner.child.lock().await = Some(child);

        let reader_inner = self.inner.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !reader_inner.connected.load(Ordering::SeqCst) {
                            break;
                        }
                        if line.trim().is_empty() {
                            continue;
                        }
                        if line.len() > MAX_LINE_BYTES {
                            tracing::warn!(len = line.len(), "oversized JSON-RPC line dropped");
                            reader_inner.emit(Message::acp(MessagePayload::Error(
                                "agent sent an oversized JSON-RPC message".to_string(),
                            )));
                            continue;
                        }
                        match serde_json::from_str::<Value>(&line) {
                            Ok(message) => reader_inner.dispatch(message).await,
                            Err(err) => {
                                tracing::warn!(error = %err, raw = %line, "unparseable JSON-RPC line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!(error = %err, "ACP stdout read ended");
                        break;
                    }
                }
            }
            if reader_inner.connected.swap(false, Ordering::SeqCst) {
                tracing::info!("ACP agent closed its stdout");
                reader_inner.emit(
                    Message::acp(MessagePayload::Status(AgentStatus::Idle))
                        .with_meta("disconnected", Value::Bool(true)),
                );
            }
        });

        let stderr_inner = self.inner.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("ACP agent stderr: {}", line);
                if !stderr_inner.connected.load(Ordering::SeqCst) {
                    break;
                }
            }
        });

        self.inner.send_initialize().await?;
        tokio::time::sleep(SESSION_NEW_GRACE).await;
        self.inner.send_session_new(&work_dir).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("disconnecting ACP agent");

        // Dropping stdin signals EOF to well-behaved agents before the kill.
        self.inner.stdin.lock().await.take();
        if let Some(mut child) = self.inner.child.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: Message) -> Result<(), BridgeError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }

        match message.payload {
            MessagePayload::Content(text) => {
                self.inner
                    .input_tokens
                    .fetch_add(estimate_tokens(&text), Ordering::SeqCst);
                let session_id = self.inner.session_id();
                tracing::debug!(session_id = %session_id, "sending prompt");
                let frame = json!({
                    "jsonrpc": "2.0",
                    "id": self.inner.next_request_id(),
                    "method": "session/prompt",
                    "params": {
                        "sessionId": session_id,
                        "prompt": [{ "type": "text", "text": text }],
                    },
                });
                self.inner.write_frame(&frame).await
            }
            MessagePayload::PermissionReply(reply) => {
                tracing::debug!(option_id = %reply.option_id, "sending permission outcome");
                let frame = permission_result_frame(&reply.id, &reply.option_id);
                self.inner.write_frame(&frame).await
            }
            MessagePayload::Cancel(reason) => {
                let session_id = self.inner.session_id();
                tracing::debug!(session_id = %session_id, reason = %reason, "sending cancel");
                let frame = json!({
                    "jsonrpc": "2.0",
                    "id": self.inner.next_request_id(),
                    "method": "session/cancel",
                    "params": { "sessionId": session_id, "reason": reason },
                });
                self.inner.write_frame(&frame).await
            }
            _ => Ok(()),
        }
    }

    fn subscribe(&self, sink: MessageSink) {
        *self.inner.sink.lock().expect("acp sink lock") = Some(sink);
    }

    fn supports_permissions(&self) -> bool {
        true
    }

    fn supports_file_ops(&self) -> bool {
        true
    }

    fn supports_tool_calls(&self) -> bool {
        true
    }
}

impl AcpInner {
    fn emit(&self, message: Message) {
        let sink = self.sink.lock().expect("acp sink lock");
        if let Some(sink) = sink.as_ref() {
            let _ = sink.send(message);
        }
    }

    fn session_id(&self) -> String {
        self.agent_session_id
            .lock()
            .expect("acp session id lock")
            .clone()
            .unwrap_or_default()
    }

    fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn send_initialize(&self) -> Result<(), BridgeError> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": {
                    "name": "agent-bridge",
                    "title": "Agent Bridge",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "clientCapabilities": {
                    "fs": { "readTextFile": true, "writeTextFile": true },
                    "terminal": true,
                },
            },
        });
        self.write_frame(&frame).await
    }

    async fn send_session_new(&self, work_dir: &PathBuf) -> Result<(), BridgeError> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": "session/new",
            "params": {
                "cwd": work_dir.to_string_lossy(),
                "mcpServers": [],
            },
        });
        self.write_frame(&frame).await
    }

    async fn write_frame(&self, frame: &Value) -> Result<(), BridgeError> {
        let mut encoded = serde_json::to_vec(frame)?;
        encoded.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(BridgeError::NotConnected)?;
        stdin
            .write_all(&encoded)
            .await
            .map_err(|err| BridgeError::transport(format!("failed to write to agent stdin: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| BridgeError::transport(format!("failed to flush agent stdin: {err}")))
    }

    async fn respond_result(&self, id: Value, result: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        if let Err(err) = self.write_frame(&frame).await {
            tracing::warn!(error = %err, "failed to send callback result");
        }
    }

    async fn respond_error(&self, id: Value, code: i64, message: &str) {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        });
        if let Err(err) = self.write_frame(&frame).await {
            tracing::warn!(error = %err, "failed to send callback error");
        }
    }

    async fn dispatch(self: &Arc<Self>, message: Value) {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        match method.as_deref() {
            Some("session/update") => self.handle_session_update(&message),
            Some("session/request_permission") => self.handle_permission_request(&message),
            Some("fs/read_text_file") => self.handle_fs_read(&message).await,
            Some("fs/write_text_file") => self.handle_fs_write(&message).await,
            Some("terminal/create") => self.handle_terminal_create(&message).await,
            Some("terminal/wait_for_exit") => self.handle_terminal_wait(&message),
            Some("terminal/output") => self.handle_terminal_output(&message),
            Some("terminal/release") => self.handle_terminal_release(&message).await,
            Some(other) => {
                tracing::debug!(method = other, "unhandled agent method");
            }
            None => {
                if message.get("result").is_some() {
                    self.handle_response(&message);
                } else if message.get("error").is_some() {
                    self.handle_error_envelope(&message);
                } else {
                    tracing::debug!("agent message with neither method nor result");
                }
            }
        }
    }

    fn handle_session_update(&self, message: &Value) {
        let Some(params) = message.get("params") else {
            return;
        };

        // claude-code-acp sends a single `update`; the array form also
        // appears in the wild.
        if let Some(update) = params.get("update").filter(|value| value.is_object()) {
            self.apply_session_update(update);
        } else if let Some(updates) = params.get("updates").and_then(Value::as_array) {
            for update in updates.iter().filter(|value| value.is_object()) {
                self.apply_session_update(update);
            }
        }
    }

    fn apply_session_update(&self, update: &Value) {
        match update.get("sessionUpdate").and_then(Value::as_str) {
            Some("agent_message_chunk") => {
                if let Some(text) = chunk_text(update) {
                    self.output_tokens
                        .fetch_add(estimate_tokens(&text), Ordering::SeqCst);
                    self.emit(Message::acp(MessagePayload::Content(text)));
                }
            }
            Some("agent_thought_chunk") => {
                if let Some(text) = chunk_text(update) {
                    self.output_tokens
                        .fetch_add(estimate_tokens(&text), Ordering::SeqCst);
                    self.emit(Message::acp(MessagePayload::Thought(text)));
                }
            }
            Some("tool_call") => {
                if let Some(call) = decode_tool_call(update, true) {
                    self.emit(Message::acp(MessagePayload::ToolCall(call)));
                }
            }
            Some("tool_call_update") => {
                if let Some(call) = decode_tool_call(update, false) {
                    self.emit(Message::acp(MessagePayload::ToolCall(call)));
                }
            }
            Some("plan") => {
                let plan = update.get("entries").cloned().unwrap_or_else(|| update.clone());
                self.emit(Message::acp(MessagePayload::Plan(plan)));
            }
            Some("end_turn") => {
                self.emit(Message::acp(MessagePayload::Status(AgentStatus::Idle)));
                let input_tokens = self.input_tokens.load(Ordering::SeqCst);
                let output_tokens = self.output_tokens.load(Ordering::SeqCst);
                self.emit(Message::acp(MessagePayload::Usage(UsageStats {
                    input_tokens,
                    output_tokens,
                    cache_creation: 0,
                    cache_read: 0,
                    context_size: input_tokens + output_tokens,
                })));
            }
            other => {
                tracing::debug!(update = ?other, "ignoring session update variant");
            }
        }
    }

    fn handle_permission_request(&self, message: &Value) {
        let Some(request) = decode_permission_request(message) else {
            tracing::warn!("malformed session/request_permission from agent");
            return;
        };
        tracing::info!(
            id = %request.id,
            tool = %request.tool_name,
            risk = request.risk.as_str(),
            "agent requested permission"
        );
        // The reply is sent later by an explicit permission-reply send,
        // triggered by the rule engine or the operator.
        self.emit(Message::acp(MessagePayload::Permission(request)));
    }

    async fn handle_fs_read(&self, message: &Value) {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let path = param_str(message, "path");
        tracing::debug!(path = %path, "agent file read");

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                self.respond_result(id, json!({ "content": content })).await;
            }
            Err(err) => {
                self.respond_error(id, JSONRPC_INTERNAL_ERROR, &err.to_string())
                    .await;
            }
        }
    }

    async fn handle_fs_write(&self, message: &Value) {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let path = param_str(message, "path");
        let content = param_str(message, "content");
        tracing::debug!(path = %path, bytes = content.len(), "agent file write");

        match write_text_file(&path, &content).await {
            Ok(()) => self.respond_result(id, json!({})).await,
            Err(err) => {
                self.respond_error(id, JSONRPC_INTERNAL_ERROR, &err.to_string())
                    .await;
            }
        }
    }

    async fn handle_terminal_create(&self, message: &Value) {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let output_byte_limit = params
            .get("outputByteLimit")
            .and_then(Value::as_u64)
            .map(|limit| limit as usize)
            .unwrap_or(DEFAULT_OUTPUT_BYTE_LIMIT);
        let env = params
            .get("env")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let name = entry.get("name").and_then(Value::as_str)?;
                        let value = entry.get("value").and_then(Value::as_str).unwrap_or_default();
                        (!name.is_empty()).then(|| (name.to_string(), value.to_string()))
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let work_dir = self.work_dir.lock().expect("acp work dir lock").clone();
        let terminal_id = self
            .terminals
            .create(&work_dir, command, env, output_byte_limit)
            .await;

        self.respond_result(id, json!({ "terminalId": terminal_id }))
            .await;
    }

    // wait_for_exit and output block until the command completes, so they run
    // on their own tasks instead of the reader.
    fn handle_terminal_wait(self: &Arc<Self>, message: &Value) {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let terminal_id = param_str(message, "terminalId");
        let inner = self.clone();
        tokio::spawn(async move {
            match inner.terminals.wait_for_exit(&terminal_id).await {
                Ok(exit_code) => {
                    inner
                        .respond_result(id, json!({ "exitStatus": { "exitCode": exit_code } }))
                        .await;
                }
                Err(_) => {
                    inner
                        .respond_error(id, JSONRPC_INVALID_PARAMS, "terminal not found")
                        .await;
                }
            }
        });
    }

    fn handle_terminal_output(self: &Arc<Self>, message: &Value) {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let terminal_id = param_str(message, "terminalId");
        let inner = self.clone();
        tokio::spawn(async move {
            match inner.terminals.output(&terminal_id).await {
                Ok(result) => {
                    inner
                        .respond_result(
                            id,
                            json!({
                                "output": result.output,
                                "truncated": result.truncated,
                                "exitStatus": { "exitCode": result.exit_code },
                            }),
                        )
                        .await;
                }
                Err(_) => {
                    inner
                        .respond_error(id, JSONRPC_INVALID_PARAMS, "terminal not found")
                        .await;
                }
            }
        });
    }

    async fn handle_terminal_release(&self, message: &Value) {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let terminal_id = param_str(message, "terminalId");
        self.terminals.release(&terminal_id).await;
        self.respond_result(id, json!({})).await;
    }

    fn handle_response(&self, message: &Value) {
        let Some(result) = message.get("result").and_then(Value::as_object) else {
            return;
        };

        if let Some(session_id) = result.get("sessionId").and_then(Value::as_str) {
            tracing::info!(session_id = %session_id, "agent session created");
            *self.agent_session_id.lock().expect("acp session id lock") =
                Some(session_id.to_string());
            // Initialized signal for the protocol manager.
            self.emit(Message::acp(MessagePayload::Status(AgentStatus::Idle)));
            return;
        }

        if let Some(agent_info) = result.get("agentInfo").and_then(Value::as_object) {
            let name = agent_info.get("name").and_then(Value::as_str).unwrap_or("");
            let version = agent_info
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or("");
            tracing::info!(name = %name, version = %version, "connected to agent");
        }
    }

    fn handle_error_envelope(&self, message: &Value) {
        let error = message.get("error").cloned().unwrap_or(Value::Null);
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown agent error")
            .to_string();
        tracing::error!(code, message = %text, "agent reported error");
        self.emit(
            Message::acp(MessagePayload::Error(text)).with_meta("code", Value::from(code)),
        );
    }
}

/// Build the JSON-RPC result the agent expects for a permission decision.
/// The id is forwarded untouched so string and integer ids round-trip.
pub(crate) fn permission_result_frame(id: &Value, option_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "outcome": { "optionId": option_id, "outcome": "selected" },
        },
    })
}

pub(crate) fn decode_permission_request(message: &Value) -> Option<PermissionRequest> {
    let params = message.get("params")?;

    let tool_call = params.get("toolCall").cloned().unwrap_or(Value::Null);
    let tool_call_id = tool_call
        .get("toolCallId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let title = tool_call
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let raw_input = tool_call
        .get("rawInput")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    let options = params
        .get("options")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match entry {
                    Value::Object(option) => option
                        .get("optionId")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    Value::String(option) => Some(option.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    // The JSON-RPC id keeps its original wire type; a missing id falls back
    // to the agent's toolCallId.
    let id = message
        .get("id")
        .cloned()
        .unwrap_or_else(|| Value::String(tool_call_id.to_string()));

    Some(PermissionRequest {
        id,
        tool_name: title.clone(),
        tool_input: raw_input,
        description: title.clone(),
        risk: classify_risk(&title),
        options,
    })
}

pub(crate) fn classify_risk(title: &str) -> RiskLevel {
    if DANGEROUS_COMMAND_MARKERS
        .iter()
        .any(|marker| title.contains(marker))
    {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    }
}

/// Rough token estimate at ~4 characters per token.
pub(crate) fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() + 3) / 4) as i64
}

fn chunk_text(update: &Value) -> Option<String> {
    update
        .get("content")
        .and_then(|content| content.get("text"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

fn decode_tool_call(update: &Value, is_new: bool) -> Option<ToolCall> {
    let id = update
        .get("toolCallId")
        .and_then(Value::as_str)
        .or_else(|| update.get("id").and_then(Value::as_str))?
        .to_string();
    let name = if is_new {
        update
            .get("title")
            .and_then(Value::as_str)
            .or_else(|| update.get("name").and_then(Value::as_str))
            .map(ToOwned::to_owned)
    } else {
        None
    };
    let status = update
        .get("status")
        .and_then(Value::as_str)
        .map(ToolCallStatus::parse)
        .unwrap_or(ToolCallStatus::Pending);

    Some(ToolCall {
        id,
        name,
        status,
        result: update.get("result").cloned(),
    })
}

fn param_str(message: &Value, key: &str) -> String {
    message
        .get("params")
        .and_then(|params| params.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn absolute_work_dir(work_dir: &PathBuf) -> Result<PathBuf, BridgeError> {
    if work_dir.is_absolute() {
        return Ok(work_dir.clone());
    }
    let current = std::env::current_dir()
        .map_err(|err| BridgeError::Config {
            message: format!("cannot resolve working directory: {err}"),
        })?;
    if work_dir.as_os_str().is_empty() || work_dir.as_os_str() == "." {
        Ok(current)
    } else {
        Ok(current.join(work_dir))
    }
}

async fn write_text_file(path: &str, content: &str) -> std::io::Result<()> {
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))
                    .await;
            }
        }
    }
    tokio::fs::write(&path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capabilities_are_structured() {
        let adapter = AcpAdapter::new();
        assert_eq!(adapter.name(), "acp");
        assert!(adapter.supports_permissions());
        assert!(adapter.supports_file_ops());
        assert!(adapter.supports_tool_calls());
        assert!(!adapter.is_connected());
    }

    #[test]
    fn permission_result_preserves_integer_id() {
        let frame = permission_result_frame(&json!(42), "allow_once");
        let encoded = serde_json::to_string(&frame).expect("serialize");
        assert!(encoded.contains("\"id\":42"));
        assert_eq!(frame["result"]["outcome"]["optionId"], "allow_once");
        assert_eq!(frame["result"]["outcome"]["outcome"], "selected");
    }

    #[test]
    fn permission_result_preserves_string_id() {
        let frame = permission_result_frame(&json!("abc"), "reject_once");
        let encoded = serde_json::to_string(&frame).expect("serialize");
        assert!(encoded.contains("\"id\":\"abc\""));
    }

    #[test]
    fn permission_request_decodes_options_and_risk() {
        let message = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "session/request_permission",
            "params": {
                "toolCall": {
                    "toolCallId": "call_1",
                    "title": "rm -rf /tmp/a",
                    "rawInput": { "command": "rm -rf /tmp/a" },
                },
                "options": [
                    { "optionId": "allow_once" },
                    "reject_once",
                    { "unrelated": true },
                ],
            },
        });

        let request = decode_permission_request(&message).expect("decode");
        assert_eq!(request.id, json!(7));
        assert_eq!(request.risk, RiskLevel::High);
        assert_eq!(request.options, vec!["allow_once", "reject_once"]);
        assert_eq!(
            request.tool_input.get("command").and_then(Value::as_str),
            Some("rm -rf /tmp/a")
        );
    }

    #[test]
    fn permission_request_without_id_falls_back_to_tool_call_id() {
        let message = json!({
            "jsonrpc": "2.0",
            "method": "session/request_permission",
            "params": {
                "toolCall": { "toolCallId": "call_9", "title": "ls" },
                "options": [],
            },
        });

        let request = decode_permission_request(&message).expect("decode");
        assert_eq!(request.id, json!("call_9"));
        assert_eq!(request.risk, RiskLevel::Medium);
    }

    #[test]
    fn risk_markers_cover_destructive_commands() {
        assert_eq!(classify_risk("sudo make install"), RiskLevel::High);
        assert_eq!(classify_risk("dd if=/dev/zero"), RiskLevel::High);
        assert_eq!(classify_risk("cat notes.txt"), RiskLevel::Medium);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("hi"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn tool_call_update_omits_name_and_keeps_result() {
        let update = json!({
            "sessionUpdate": "tool_call_update",
            "toolCallId": "call_2",
            "status": "completed",
            "result": { "ok": true },
        });
        let call = decode_tool_call(&update, false).expect("decode");
        assert_eq!(call.id, "call_2");
        assert!(call.name.is_none());
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.result, Some(json!({ "ok": true })));
    }
}
