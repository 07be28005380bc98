//! Pending-permission table for the router's ask flow.
//!
//! Every permission forwarded to the relay is parked here until a
//! `permission:response` frame resolves it or the timeout expires; expired
//! entries are handed back so the router can auto-deny them toward the agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::message::PermissionRequest;

pub const DEFAULT_PERMISSION_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub session_id: String,
    pub request: PermissionRequest,
}

pub struct PermissionBroker {
    pending: Mutex<HashMap<String, PendingPermission>>,
    expired_tx: mpsc::UnboundedSender<PendingPermission>,
}

impl PermissionBroker {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingPermission>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                pending: Mutex::new(HashMap::new()),
                expired_tx,
            }),
            expired_rx,
        )
    }

    /// Key pending entries by the serialized JSON-RPC id so integer and
    /// string ids of the same spelling cannot collide.
    pub fn id_key(id: &Value) -> String {
        serde_json::to_string(id).unwrap_or_else(|_| "null".to_string())
    }

    /// Park a request and arm its timeout. The entry is either resolved by
    /// [`resolve`](Self::resolve) or delivered on the expired channel.
    pub async fn register(self: &Arc<Self>, entry: PendingPermission, timeout: Duration) {
        let key = Self::id_key(&entry.request.id);
        self.pending.lock().await.insert(key.clone(), entry);

        let broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(expired) = broker.pending.lock().await.remove(&key) {
                tracing::warn!(
                    session_id = %expired.session_id,
                    id = %expired.request.id,
                    "permission request timed out"
                );
                let _ = broker.expired_tx.send(expired);
            }
        });
    }

    /// Resolve a pending entry by id. Returns the entry on first resolution,
    /// None if it was unknown, already resolved, or already expired.
    pub async fn resolve(&self, id: &Value) -> Option<PendingPermission> {
        self.pending.lock().await.remove(&Self::id_key(id))
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RiskLevel;
    use serde_json::json;

    fn request(id: Value) -> PermissionRequest {
        PermissionRequest {
            id,
            tool_name: "fs_write".to_string(),
            tool_input: serde_json::Map::new(),
            description: "write".to_string(),
            risk: RiskLevel::Medium,
            options: vec!["allow_once".to_string(), "reject_once".to_string()],
        }
    }

    #[tokio::test]
    async fn resolve_returns_entry_once() {
        let (broker, _expired) = PermissionBroker::new();
        broker
            .register(
                PendingPermission {
                    session_id: "s1".to_string(),
                    request: request(json!(7)),
                },
                Duration::from_secs(60),
            )
            .await;

        assert_eq!(broker.pending_count().await, 1);
        assert!(broker.resolve(&json!(7)).await.is_some());
        assert!(broker.resolve(&json!(7)).await.is_none());
    }

    #[tokio::test]
    async fn integer_and_string_ids_do_not_collide() {
        let (broker, _expired) = PermissionBroker::new();
        broker
            .register(
                PendingPermission {
                    session_id: "s1".to_string(),
                    request: request(json!(7)),
                },
                Duration::from_secs(60),
            )
            .await;

        assert!(broker.resolve(&json!("7")).await.is_none());
        assert!(broker.resolve(&json!(7)).await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_surface_on_the_channel() {
        let (broker, mut expired) = PermissionBroker::new();
        broker
            .register(
                PendingPermission {
                    session_id: "s1".to_string(),
                    request: request(json!("abc")),
                },
                Duration::from_millis(20),
            )
            .await;

        let entry = expired.recv().await.expect("expired entry");
        assert_eq!(entry.session_id, "s1");
        assert!(broker.resolve(&json!("abc")).await.is_none());
    }
}
