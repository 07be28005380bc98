//! Router between the relay WebSocket and the local sessions.
//!
//! Inbound wire frames are dispatched to the session manager; adapter
//! messages flow back out one-to-one as wire frames. Permission requests pass
//! through the rule engine first and either short-circuit straight back to
//! the agent or get parked in the broker until the web client (or the
//! timeout) decides. A lost relay connection never touches the agents:
//! outbound frames are dropped with a log line until the reconnect loop
//! succeeds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_bridge_error::BridgeError;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::config::{self as config_store, BridgeConfig};
use crate::manager::duration_from_env_ms;
use crate::message::{now_ms, Message, MessagePayload, PermissionRequest, PermissionResponse};
use crate::permission::{PendingPermission, PermissionBroker, DEFAULT_PERMISSION_TIMEOUT_MS};
use crate::rules::{AutoApprovalRule, RuleAction, RulesEngine};
use crate::session::{CliKind, PermissionMode, SessionEvent, SessionManager, SessionSpec};

const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const RECONNECT_DELAY_ENV: &str = "AGENT_BRIDGE_RECONNECT_MS";
const PERMISSION_TIMEOUT_ENV: &str = "AGENT_BRIDGE_PERMISSION_TIMEOUT_MS";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// JSON envelope exchanged with the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: i64,
}

impl WireFrame {
    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
            timestamp: now_ms(),
        }
    }
}

pub struct Bridge {
    config: RwLock<BridgeConfig>,
    config_dir: PathBuf,
    sessions: Arc<SessionManager>,
    rules: RulesEngine,
    broker: Arc<PermissionBroker>,
    outbound: mpsc::UnboundedSender<WireFrame>,
}

impl Bridge {
    /// Build the router and return the outbound frame stream consumed by
    /// [`run`](Self::run) (or by a test harness).
    pub fn new(
        config: BridgeConfig,
        config_dir: PathBuf,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WireFrame>) {
        let (sessions, mut session_events) = SessionManager::new();
        let (broker, mut expired) = PermissionBroker::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let rules = RulesEngine::new(config.rules.clone());
        let bridge = Arc::new(Self {
            config: RwLock::new(config),
            config_dir,
            sessions,
            rules,
            broker,
            outbound,
        });

        let events_bridge = bridge.clone();
        tokio::spawn(async move {
            while let Some(event) = session_events.recv().await {
                events_bridge.handle_session_event(event).await;
            }
        });

        let expired_bridge = bridge.clone();
        tokio::spawn(async move {
            while let Some(entry) = expired.recv().await {
                expired_bridge.deny_pending(entry).await;
            }
        });

        (bridge, outbound_rx)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Drive the relay connection: connect, pump frames both ways, reconnect
    /// with a fixed back-off on any failure. Outbound frames produced while
    /// offline are logged and discarded; sessions keep running.
    pub async fn run(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<WireFrame>) {
        loop {
            let url = self.relay_url().await;
            let Some(url) = url else {
                tracing::warn!("no relay URL configured; running offline");
                while let Some(frame) = outbound_rx.recv().await {
                    tracing::debug!(kind = %frame.kind, "offline: dropping frame");
                }
                return;
            };

            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::info!("connected to relay");
                    let (mut sink, mut incoming) = stream.split();

                    let device_id = self.device_id().await;
                    let online = WireFrame::new(
                        "device:online",
                        json!({
                            "deviceId": device_id,
                            "deviceName": device_name(),
                        }),
                    );
                    if let Ok(encoded) = serde_json::to_string(&online) {
                        let _ = sink.send(WsMessage::Text(encoded)).await;
                    }

                    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
                    heartbeat.tick().await;

                    loop {
                        tokio::select! {
                            frame = outbound_rx.recv() => match frame {
                                Some(frame) => {
                                    let Ok(encoded) = serde_json::to_string(&frame) else {
                                        continue;
                                    };
                                    if let Err(err) = sink.send(WsMessage::Text(encoded)).await {
                                        tracing::warn!(error = %err, "relay write failed");
                                        break;
                                    }
                                }
                                None => return,
                            },
                            received = incoming.next() => match received {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match serde_json::from_str::<WireFrame>(&text) {
                                        Ok(frame) => self.handle_frame(frame).await,
                                        Err(err) => {
                                            tracing::warn!(error = %err, "unparseable relay frame");
                                        }
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => {
                                    tracing::warn!("relay closed the connection");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    tracing::warn!(error = %err, "relay read failed");
                                    break;
                                }
                            },
                            _ = heartbeat.tick() => {
                                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not connect to relay");
                }
            }

            // Back-off before the next attempt, shedding outbound frames so
            // sessions never block on a dead socket.
            tracing::info!("reconnecting to relay");
            let deadline = tokio::time::Instant::now() + reconnect_delay();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            tracing::debug!(kind = %frame.kind, "offline: dropping frame");
                        }
                        None => return,
                    },
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        self.sessions.stop_all().await;
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    pub async fn handle_frame(self: &Arc<Self>, frame: WireFrame) {
        let WireFrame { kind, payload, .. } = frame;
        tracing::debug!(kind = %kind, "relay frame");
        match kind.as_str() {
            "session:start" => {
                let bridge = self.clone();
                tokio::spawn(async move {
                    bridge.handle_session_start(payload).await;
                });
            }
            "session:send" => self.handle_session_send(&payload).await,
            "session:cancel" => self.handle_session_cancel(&payload).await,
            "session:stop" => self.handle_session_stop(&payload).await,
            "session:resize" => self.handle_session_resize(&payload).await,
            "chat:send" => {
                let bridge = self.clone();
                tokio::spawn(async move {
                    bridge.handle_chat_send(payload).await;
                });
            }
            "permission:response" => self.handle_permission_response(&payload).await,
            "config:sync" => self.handle_config_sync(&payload).await,
            "rules:sync" => self.handle_rules_sync(&payload).await,
            "storage:sync" => self.handle_storage_sync(&payload).await,
            "control:takeover" => {
                tracing::info!(
                    session_id = %payload_str(&payload, "sessionId"),
                    "web client took control"
                );
            }
            other => {
                tracing::debug!(kind = other, "ignoring unknown frame type");
            }
        }
    }

    async fn handle_session_start(self: Arc<Self>, payload: Value) {
        let session_id = payload_str(&payload, "sessionId");
        let cli_type = payload_str(&payload, "cliType");
        let work_dir = payload_str(&payload, "workDir");
        let initial_command = payload_str(&payload, "command");

        let cli = if cli_type.is_empty() {
            CliKind::Kiro
        } else {
            CliKind::parse(&cli_type)
        };
        let work_dir = if work_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(work_dir)
        };

        let spec = SessionSpec {
            session_id: (!session_id.is_empty()).then_some(session_id),
            cli: cli.clone(),
            work_dir: work_dir.clone(),
            cols: payload_u16(&payload, "cols", 120),
            rows: payload_u16(&payload, "rows", 30),
            permission_mode: PermissionMode::parse(&payload_str(&payload, "permissionMode")),
        };

        match self.sessions.create(spec).await {
            Ok(session) => {
                let device_id = self.device_id().await;
                self.send_frame(WireFrame::new(
                    "session:started",
                    json!({
                        "sessionId": session.id,
                        "deviceId": device_id,
                        "cliType": cli.as_str(),
                        "workDir": work_dir.to_string_lossy(),
                    }),
                ));
                if !initial_command.is_empty() {
                    if let Err(err) = session.send(initial_command).await {
                        tracing::warn!(session_id = %session.id, error = %err, "initial send failed");
                    }
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to create session");
                self.send_session_error(None, &err);
            }
        }
    }

    async fn handle_session_send(&self, payload: &Value) {
        let session_id = payload_str(payload, "sessionId");
        let content = payload_str(payload, "content");

        let Some(session) = self.sessions.get(&session_id).await else {
            tracing::warn!(session_id = %session_id, "send for unknown session");
            return;
        };
        if let Err(err) = session.send(content).await {
            tracing::warn!(session_id = %session_id, error = %err, "send failed");
            self.send_session_error(Some(&session_id), &err);
        }
    }

    async fn handle_session_cancel(&self, payload: &Value) {
        let session_id = payload_str(payload, "sessionId");
        let Some(session) = self.sessions.get(&session_id).await else {
            tracing::warn!(session_id = %session_id, "cancel for unknown session");
            return;
        };

        // Idempotent: each frame maps to one session/cancel request and
        // nothing else changes.
        if let Err(err) = session.cancel("user_cancelled".to_string()).await {
            tracing::warn!(session_id = %session_id, error = %err, "cancel failed");
        }
        let device_id = self.device_id().await;
        self.send_frame(WireFrame::new(
            "session:cancelled",
            json!({
                "sessionId": session_id,
                "deviceId": device_id,
            }),
        ));
    }

    async fn handle_session_stop(&self, payload: &Value) {
        let session_id = payload_str(payload, "sessionId");
        if let Err(err) = self.sessions.stop(&session_id).await {
            tracing::warn!(session_id = %session_id, error = %err, "stop failed");
        }
        let device_id = self.device_id().await;
        self.send_frame(WireFrame::new(
            "session:stopped",
            json!({
                "sessionId": session_id,
                "deviceId": device_id,
            }),
        ));
    }

    async fn handle_session_resize(&self, payload: &Value) {
        let session_id = payload_str(payload, "sessionId");
        let cols = payload_u16(payload, "cols", 80);
        let rows = payload_u16(payload, "rows", 24);
        tracing::debug!(session_id = %session_id, cols, rows, "resize");
        if let Err(err) = self.sessions.resize(&session_id, cols, rows).await {
            tracing::warn!(session_id = %session_id, error = %err, "resize failed");
        }
    }

    /// Like `session:send`, but creates a default session on demand.
    async fn handle_chat_send(self: Arc<Self>, payload: Value) {
        let session_id = payload_str(&payload, "sessionId");
        let content = payload_str(&payload, "content");

        let session = match self.sessions.get(&session_id).await {
            Some(session) => session,
            None => {
                let spec = SessionSpec {
                    session_id: (!session_id.is_empty()).then_some(session_id.clone()),
                    cli: CliKind::Kiro,
                    work_dir: PathBuf::from("."),
                    cols: 120,
                    rows: 30,
                    permission_mode: PermissionMode::Default,
                };
                match self.sessions.create(spec).await {
                    Ok(session) => session,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to create chat session");
                        return;
                    }
                }
            }
        };

        if let Err(err) = session.send(content).await {
            tracing::warn!(session_id = %session.id, error = %err, "chat send failed");
        }
    }

    async fn handle_permission_response(&self, payload: &Value) {
        let id = payload.get("id").cloned().unwrap_or(Value::Null);
        let approved = payload
            .get("approved")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let option_id = payload
            .get("optionId")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        tracing::info!(id = %id, approved, option_id = ?option_id, "permission response");
        let resolved = self.broker.resolve(&id).await;

        if let Some(option_id) = option_id {
            // The in-flight JSON-RPC id binds the reply to the right agent
            // request, so every active ACP session can receive it.
            for session in self.sessions.list().await {
                if session.protocol.supports_permissions().await {
                    let reply = Message::outbound(MessagePayload::PermissionReply(
                        PermissionResponse {
                            id: id.clone(),
                            option_id: option_id.clone(),
                        },
                    ));
                    if let Err(err) = session.protocol.send(reply).await {
                        tracing::warn!(session_id = %session.id, error = %err, "permission reply failed");
                    }
                }
            }
            return;
        }

        // No explicit option: fall back to the option vocabulary of the
        // original request.
        if let Some(entry) = resolved {
            let option = pick_option(&entry.request.options, approved);
            self.respond_to_session(&entry.session_id, entry.request.id, option)
                .await;
        }
    }

    async fn handle_config_sync(&self, payload: &Value) {
        {
            let mut config = self.config.write().await;
            if let Some(env_vars) = payload.get("envVars").and_then(Value::as_object) {
                config.env_vars.clear();
                for (key, value) in env_vars {
                    if let Some(value) = value.as_str() {
                        config.env_vars.insert(key.clone(), value.to_string());
                        std::env::set_var(key, value);
                    }
                }
                tracing::info!(count = config.env_vars.len(), "synced environment variables");
            }
            if let Some(cli_enabled) = payload.get("cliEnabled").and_then(Value::as_object) {
                config.cli_enabled.clear();
                for (key, value) in cli_enabled {
                    if let Some(value) = value.as_bool() {
                        config.cli_enabled.insert(key.clone(), value);
                    }
                }
            }
            if let Some(permissions) = payload.get("permissions").and_then(Value::as_object) {
                config.permissions.clear();
                for (key, value) in permissions {
                    if let Some(value) = value.as_bool() {
                        config.permissions.insert(key.clone(), value);
                    }
                }
            }
        }
        self.persist_config().await;

        let device_id = self.device_id().await;
        self.send_frame(WireFrame::new(
            "config:synced",
            json!({ "deviceId": device_id }),
        ));
    }

    async fn handle_rules_sync(&self, payload: &Value) {
        let rules = payload
            .get("rules")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        serde_json::from_value::<AutoApprovalRule>(entry.clone()).ok()
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let count = rules.len();
        self.rules.update_rules(rules.clone());
        self.config.write().await.rules = rules;
        self.persist_config().await;
        tracing::info!(count, "synced auto-approval rules");

        let device_id = self.device_id().await;
        self.send_frame(WireFrame::new(
            "rules:synced",
            json!({ "deviceId": device_id, "count": count }),
        ));
    }

    async fn handle_storage_sync(&self, payload: &Value) {
        let storage_type = payload_str(payload, "storageType");
        self.config.write().await.storage_type = Some(storage_type.clone());
        self.persist_config().await;
        tracing::info!(storage_type = %storage_type, "storage type set");

        let device_id = self.device_id().await;
        self.send_frame(WireFrame::new(
            "storage:synced",
            json!({ "deviceId": device_id, "storageType": storage_type }),
        ));
    }

    // -----------------------------------------------------------------------
    // Outbound messages
    // -----------------------------------------------------------------------

    async fn handle_session_event(self: &Arc<Self>, event: SessionEvent) {
        let SessionEvent {
            session_id,
            message,
        } = event;
        let protocol = message.protocol().unwrap_or("unknown").to_string();
        let device_id = self.device_id().await;
        let raw = message.is_raw() || protocol == "pty";

        match message.payload {
            MessagePayload::Content(content) if raw => {
                self.send_frame(WireFrame::new(
                    "session:output",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "outputType": "stdout",
                        "content": content,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::Content(content) => {
                self.send_frame(WireFrame::new(
                    "chat:response",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "content": content,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::Thought(content) => {
                self.send_frame(WireFrame::new(
                    "chat:thought",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "content": content,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::ToolCall(call) => {
                self.send_frame(WireFrame::new(
                    "tool:call",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "toolCall": call,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::Permission(request) => {
                self.handle_permission(&session_id, request, &protocol).await;
            }
            MessagePayload::Status(status) => {
                self.send_frame(WireFrame::new(
                    "agent:status",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "status": status.as_str(),
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::Plan(plan) => {
                self.send_frame(WireFrame::new(
                    "agent:plan",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "plan": plan,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::Usage(usage) => {
                self.send_frame(WireFrame::new(
                    "agent:usage",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "usage": usage,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::Error(error) => {
                self.send_frame(WireFrame::new(
                    "session:error",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "error": error,
                        "protocol": protocol,
                    }),
                ));
            }
            MessagePayload::PermissionReply(_) | MessagePayload::Cancel(_) => {}
        }
    }

    /// Rule-engine gate for agent permission requests: auto-approve and deny
    /// answer the agent without touching the relay; ask parks the request and
    /// forwards it.
    async fn handle_permission(
        self: &Arc<Self>,
        session_id: &str,
        request: PermissionRequest,
        protocol: &str,
    ) {
        let path = request
            .tool_input
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let command = request
            .tool_input
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let (action, rule_id) = self.rules.evaluate(&request.tool_name, path, command);
        match action {
            RuleAction::AutoApprove => {
                tracing::info!(
                    rule = ?rule_id,
                    tool = %request.tool_name,
                    "auto-approved by rule"
                );
                let option = pick_option(&request.options, true);
                self.respond_to_session(session_id, request.id, option).await;
            }
            RuleAction::Deny => {
                tracing::info!(rule = ?rule_id, tool = %request.tool_name, "auto-denied by rule");
                let option = pick_option(&request.options, false);
                self.respond_to_session(session_id, request.id, option).await;
            }
            RuleAction::Ask => {
                self.broker
                    .register(
                        PendingPermission {
                            session_id: session_id.to_string(),
                            request: request.clone(),
                        },
                        permission_timeout(),
                    )
                    .await;

                let device_id = self.device_id().await;
                self.send_frame(WireFrame::new(
                    "permission:request",
                    json!({
                        "sessionId": session_id,
                        "deviceId": device_id,
                        "id": request.id,
                        "toolName": request.tool_name,
                        "toolInput": request.tool_input,
                        "description": request.description,
                        "risk": request.risk.as_str(),
                        "options": request.options,
                        "protocol": protocol,
                    }),
                ));
            }
        }
    }

    /// Timed-out ask entries are denied toward the agent so it never hangs.
    async fn deny_pending(self: &Arc<Self>, entry: PendingPermission) {
        let option = pick_option(&entry.request.options, false);
        self.respond_to_session(&entry.session_id, entry.request.id, option)
            .await;
    }

    async fn respond_to_session(&self, session_id: &str, id: Value, option_id: String) {
        let Some(session) = self.sessions.get(session_id).await else {
            tracing::warn!(session_id = %session_id, "permission reply for unknown session");
            return;
        };
        let reply = Message::outbound(MessagePayload::PermissionReply(PermissionResponse {
            id,
            option_id,
        }));
        if let Err(err) = session.protocol.send(reply).await {
            tracing::warn!(session_id = %session_id, error = %err, "permission reply failed");
        }
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    pub fn send_frame(&self, frame: WireFrame) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!("outbound channel closed");
        }
    }

    fn send_session_error(&self, session_id: Option<&str>, err: &BridgeError) {
        let mut payload = err.to_payload();
        if let (Some(object), Some(session_id)) = (payload.as_object_mut(), session_id) {
            object.insert("sessionId".to_string(), Value::String(session_id.to_string()));
        }
        self.send_frame(WireFrame::new("session:error", payload));
    }

    async fn device_id(&self) -> String {
        self.config.read().await.device_id.clone()
    }

    async fn relay_url(&self) -> Option<String> {
        let config = self.config.read().await;
        if config.server_url.is_empty() {
            return None;
        }
        Some(build_relay_url(
            &config.server_url,
            &config.user_id,
            &config.device_id,
            &config.device_token,
        ))
    }

    async fn persist_config(&self) {
        let config = self.config.read().await.clone();
        if let Err(err) = config_store::save(&self.config_dir, &config) {
            tracing::warn!(error = %err, "failed to save config");
        }
    }
}

/// Map an approval decision onto the option vocabulary the agent offered.
pub(crate) fn pick_option(options: &[String], approve: bool) -> String {
    let markers: &[&str] = if approve {
        &["allow", "approve", "accept", "yes"]
    } else {
        &["reject", "deny", "cancel", "no"]
    };

    if let Some(option) = options
        .iter()
        .find(|option| markers.iter().any(|marker| option.contains(marker)))
    {
        return option.clone();
    }

    if approve {
        options
            .first()
            .cloned()
            .unwrap_or_else(|| "allow".to_string())
    } else {
        options
            .last()
            .cloned()
            .unwrap_or_else(|| "reject".to_string())
    }
}

pub(crate) fn build_relay_url(
    server_url: &str,
    user_id: &str,
    device_id: &str,
    device_token: &str,
) -> String {
    let base = server_url.trim_end_matches('/');
    format!("{base}/ws/{user_id}?type=bridge&deviceId={device_id}&token={device_token}")
}

fn device_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-device".to_string())
}

fn reconnect_delay() -> Duration {
    duration_from_env_ms(RECONNECT_DELAY_ENV, DEFAULT_RECONNECT_DELAY_MS)
}

fn permission_timeout() -> Duration {
    duration_from_env_ms(PERMISSION_TIMEOUT_ENV, DEFAULT_PERMISSION_TIMEOUT_MS)
}

fn payload_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn payload_u16(payload: &Value, key: &str, default: u16) -> u16 {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|value| u16::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_picking_prefers_matching_vocabulary() {
        let options = vec![
            "allow_once".to_string(),
            "allow_always".to_string(),
            "reject_once".to_string(),
        ];
        assert_eq!(pick_option(&options, true), "allow_once");
        assert_eq!(pick_option(&options, false), "reject_once");
    }

    #[test]
    fn option_picking_falls_back_to_position() {
        let options = vec!["first".to_string(), "last".to_string()];
        assert_eq!(pick_option(&options, true), "first");
        assert_eq!(pick_option(&options, false), "last");

        assert_eq!(pick_option(&[], true), "allow");
        assert_eq!(pick_option(&[], false), "reject");
    }

    #[test]
    fn relay_url_carries_identity() {
        let url = build_relay_url("wss://relay.example/", "u1", "d1", "t1");
        assert_eq!(url, "wss://relay.example/ws/u1?type=bridge&deviceId=d1&token=t1");
    }

    #[tokio::test]
    async fn unknown_frame_types_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, mut outbound) =
            Bridge::new(BridgeConfig::default(), dir.path().to_path_buf());

        bridge
            .handle_frame(WireFrame::new("mystery:frame", json!({})))
            .await;
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_stop_acknowledges_even_for_unknown_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, mut outbound) =
            Bridge::new(BridgeConfig::default(), dir.path().to_path_buf());

        bridge
            .handle_frame(WireFrame::new(
                "session:stop",
                json!({ "sessionId": "missing" }),
            ))
            .await;

        let frame = outbound.recv().await.expect("stopped frame");
        assert_eq!(frame.kind, "session:stopped");
        assert_eq!(frame.payload["sessionId"], "missing");
    }

    #[tokio::test]
    async fn rules_sync_replaces_rule_set_and_acknowledges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, mut outbound) =
            Bridge::new(BridgeConfig::default(), dir.path().to_path_buf());

        bridge
            .handle_frame(WireFrame::new(
                "rules:sync",
                json!({
                    "rules": [
                        { "id": "r1", "tool": "fs_write", "pattern": "/tmp/**", "action": "auto-approve" },
                    ],
                }),
            ))
            .await;

        let frame = outbound.recv().await.expect("synced frame");
        assert_eq!(frame.kind, "rules:synced");
        assert_eq!(frame.payload["count"], 1);

        let (action, _) = bridge.rules.evaluate("fs_write", "/tmp/a.log", "");
        assert_eq!(action, RuleAction::AutoApprove);
    }
}
