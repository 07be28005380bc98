//! Per-session protocol selection: probe ACP first, fall back to PTY.
//!
//! A CLI that completes the ACP handshake emits a `status` message (the
//! `session/new` response produces one) within the probe window; anything
//! else is treated as a plain terminal program and restarted under a PTY.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agent_bridge_error::BridgeError;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::acp::AcpAdapter;
use crate::adapter::{AdapterConfig, MessageSink, TransportAdapter};
use crate::message::{Message, MessagePayload};
use crate::pty::PtyAdapter;

const DEFAULT_ACP_INIT_TIMEOUT_MS: u64 = 3_000;
const ACP_INIT_TIMEOUT_ENV: &str = "AGENT_BRIDGE_ACP_INIT_TIMEOUT_MS";

/// Owns exactly one adapter for the lifetime of a session and exposes the
/// same send/subscribe surface the adapters do.
pub struct ProtocolManager {
    adapter: Mutex<Option<Arc<dyn TransportAdapter>>>,
    sink: Arc<StdMutex<Option<MessageSink>>>,
}

impl ProtocolManager {
    pub fn new() -> Self {
        Self {
            adapter: Mutex::new(None),
            sink: Arc::new(StdMutex::new(None)),
        }
    }

    /// Install the message sink. Replaces any previous sink, including on an
    /// already-connected adapter.
    pub async fn subscribe(&self, sink: MessageSink) {
        *self.sink.lock().expect("manager sink lock") = Some(sink.clone());
        if let Some(adapter) = self.adapter.lock().await.as_ref() {
            adapter.subscribe(sink);
        }
    }

    pub async fn connect(&self, config: AdapterConfig) -> Result<(), BridgeError> {
        tracing::info!(command = %config.command, "auto-detecting protocol");

        match self.try_acp(config.clone()).await {
            Ok(()) => {
                tracing::info!("using ACP protocol");
                return Ok(());
            }
            Err(err) => {
                tracing::info!(error = %err, "ACP probe failed, falling back to PTY");
            }
        }

        self.try_pty(config).await
    }

    async fn try_acp(&self, config: AdapterConfig) -> Result<(), BridgeError> {
        let adapter: Arc<dyn TransportAdapter> = Arc::new(AcpAdapter::new());

        // Intercept adapter output during the probe: the first status message
        // is the initialized signal, everything is forwarded to the user sink.
        let (probe_tx, mut probe_rx) = mpsc::unbounded_channel::<Message>();
        let (init_tx, init_rx) = oneshot::channel::<()>();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let mut init_tx = Some(init_tx);
            while let Some(message) = probe_rx.recv().await {
                if matches!(message.payload, MessagePayload::Status(_)) {
                    if let Some(tx) = init_tx.take() {
                        let _ = tx.send(());
                    }
                }
                let sink = sink.lock().expect("manager sink lock").clone();
                if let Some(sink) = sink {
                    let _ = sink.send(message);
                }
            }
        });

        adapter.subscribe(probe_tx);
        adapter.connect(config).await?;

        match tokio::time::timeout(acp_init_timeout(), init_rx).await {
            Ok(Ok(())) => {
                // Initialized: hand the adapter the user sink directly, which
                // also winds down the probe forwarder.
                let sink = self.sink.lock().expect("manager sink lock").clone();
                if let Some(sink) = sink {
                    adapter.subscribe(sink);
                }
                *self.adapter.lock().await = Some(adapter);
                tracing::info!("ACP initialized");
                Ok(())
            }
            _ => {
                let _ = adapter.disconnect().await;
                Err(BridgeError::Timeout {
                    message: Some("ACP initialization timeout".to_string()),
                })
            }
        }
    }

    async fn try_pty(&self, config: AdapterConfig) -> Result<(), BridgeError> {
        let adapter: Arc<dyn TransportAdapter> = Arc::new(PtyAdapter::new());
        let sink = self.sink.lock().expect("manager sink lock").clone();
        if let Some(sink) = sink {
            adapter.subscribe(sink);
        }

        adapter.connect(config).await?;
        *self.adapter.lock().await = Some(adapter);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        let adapter = self.adapter.lock().await.take();
        match adapter {
            Some(adapter) => adapter.disconnect().await,
            None => Ok(()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self.adapter.lock().await.as_ref() {
            Some(adapter) => adapter.is_connected(),
            None => false,
        }
    }

    pub async fn send(&self, message: Message) -> Result<(), BridgeError> {
        let adapter = self.adapter.lock().await.clone();
        match adapter {
            Some(adapter) => adapter.send(message).await,
            None => Err(BridgeError::NotConnected),
        }
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), BridgeError> {
        let adapter = self.adapter.lock().await.clone();
        match adapter {
            Some(adapter) => adapter.resize(cols, rows).await,
            None => Ok(()),
        }
    }

    pub async fn protocol_name(&self) -> &'static str {
        match self.adapter.lock().await.as_ref() {
            Some(adapter) => adapter.name(),
            None => "none",
        }
    }

    pub async fn supports_permissions(&self) -> bool {
        match self.adapter.lock().await.as_ref() {
            Some(adapter) => adapter.supports_permissions(),
            None => false,
        }
    }
}

impl Default for ProtocolManager {
    fn default() -> Self {
        Self::new()
    }
}

fn acp_init_timeout() -> Duration {
    duration_from_env_ms(ACP_INIT_TIMEOUT_ENV, DEFAULT_ACP_INIT_TIMEOUT_MS)
}

pub(crate) fn duration_from_env_ms(var_name: &str, default_ms: u64) -> Duration {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default_ms))
}
