//! The operation runner.
//!
//! Mutating requests either run inline (sync) or are wrapped into an
//! operation: a background unit of work addressable by id, carrying the
//! affected container names, opaque JSON metadata, optional websocket side
//! channels and a terminal result the client polls for.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::WebSocket;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde_json::{Value, json};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;

/// API version prefix used in operation and container URLs.
pub const API_VERSION: &str = "1.0";

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failure,
}

/// An asynchronous unit of work.
pub struct Operation {
    /// Operation id.
    pub id: Uuid,
    /// Current status.
    pub status: OperationStatus,
    /// Names of the containers this operation affects.
    pub containers: Vec<String>,
    /// Opaque metadata; replaced by the body's result on success.
    pub metadata: Value,
    /// Failure message, when the body failed.
    pub error: Option<String>,
    /// Websocket side channels, when the operation carries any.
    pub websockets: Option<Arc<WsChannels>>,
}

impl Operation {
    /// Renders the operation document returned by `GET /operations/{id}`.
    #[must_use]
    pub fn render(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "status": self.status,
            "resources": {"containers": self.containers},
            "metadata": self.metadata,
            "may_cancel": false,
            "err": self.error,
        })
    }
}

/// Registry and runner for operations.
#[derive(Clone, Default)]
pub struct Operations {
    ops: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Operation>>>>>,
}

impl Operations {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an operation by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<Operation>>> {
        self.ops.read().get(&id).cloned()
    }

    /// Schedules `body` on a background worker and returns the new
    /// operation's id. The operation starts out with the websocket secret
    /// map (when present) as its metadata; the body's value replaces it on
    /// success.
    pub fn spawn<F>(
        &self,
        containers: Vec<String>,
        websockets: Option<Arc<WsChannels>>,
        body: F,
    ) -> Uuid
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let metadata = websockets
            .as_ref()
            .map_or(Value::Null, |channels| channels.metadata());

        let operation = Arc::new(Mutex::new(Operation {
            id,
            status: OperationStatus::Pending,
            containers,
            metadata,
            error: None,
            websockets,
        }));
        self.ops.write().insert(id, operation.clone());

        tokio::spawn(async move {
            operation.lock().status = OperationStatus::Running;
            let result = body.await;
            let mut op = operation.lock();
            match result {
                Ok(metadata) => {
                    op.status = OperationStatus::Success;
                    if !metadata.is_null() {
                        op.metadata = metadata;
                    }
                }
                Err(err) => {
                    tracing::warn!(operation = %id, error = %err, "operation failed");
                    op.status = OperationStatus::Failure;
                    op.error = Some(err.to_string());
                }
            }
        });

        id
    }

    /// Builds the async HTTP response referencing an operation.
    #[must_use]
    pub fn async_response(&self, id: Uuid) -> Response {
        let metadata = self
            .get(id)
            .map_or(Value::Null, |op| op.lock().metadata.clone());
        let body = json!({
            "type": "async",
            "status": "OK",
            "operation": format!("/{API_VERSION}/operations/{id}"),
            "metadata": metadata,
        });
        (StatusCode::ACCEPTED, Json(body)).into_response()
    }
}

/// Builds a synchronous success response.
#[must_use]
pub fn sync_response(metadata: Value) -> Response {
    let body = json!({
        "type": "sync",
        "status": "Success",
        "metadata": metadata,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Websocket side channels of an operation: one named slot per stream, each
/// guarded by a cryptographically random secret, with a barrier that
/// releases once every slot has been redeemed.
pub struct WsChannels {
    names: Vec<String>,
    secrets: Vec<String>,
    slots: tokio::sync::Mutex<Vec<Option<WebSocket>>>,
    notify: Notify,
}

impl WsChannels {
    /// Allocates channels with the given slot names.
    #[must_use]
    pub fn new(names: &[&str]) -> Self {
        let secrets = names.iter().map(|_| random_secret()).collect();
        let slots = (0..names.len()).map(|_| None).collect();
        Self {
            names: names.iter().map(ToString::to_string).collect(),
            secrets,
            slots: tokio::sync::Mutex::new(slots),
            notify: Notify::new(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The published metadata: a map from slot name to secret.
    #[must_use]
    pub fn metadata(&self) -> Value {
        let fds: serde_json::Map<String, Value> = self
            .names
            .iter()
            .zip(&self.secrets)
            .map(|(name, secret)| (name.clone(), Value::String(secret.clone())))
            .collect();
        json!({ "fds": fds })
    }

    /// The secret for a named slot, used when handing secrets to a peer.
    #[must_use]
    pub fn secret(&self, name: &str) -> Option<&str> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(&self.secrets[index])
    }

    /// Resolves a presented secret to its slot index.
    #[must_use]
    pub fn slot_for_secret(&self, secret: &str) -> Option<usize> {
        self.secrets.iter().position(|s| s == secret)
    }

    /// Binds a websocket to a slot, waking the barrier once all slots are
    /// bound. Rebinding a slot replaces the previous connection.
    pub async fn bind(&self, slot: usize, socket: WebSocket) {
        let mut slots = self.slots.lock().await;
        slots[slot] = Some(socket);
        if slots.iter().all(Option::is_some) {
            self.notify.notify_waiters();
        }
    }

    /// Waits until every slot is bound, then takes the connections in slot
    /// order. This is the rendezvous barrier: the execution body runs only
    /// after it returns.
    pub async fn wait_all(&self) -> Vec<WebSocket> {
        loop {
            let notified = self.notify.notified();
            {
                let mut slots = self.slots.lock().await;
                if slots.iter().all(Option::is_some) {
                    return slots.iter_mut().filter_map(Option::take).collect();
                }
            }
            notified.await;
        }
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    #[tokio::test]
    async fn spawned_operation_reaches_success() {
        let ops = Operations::new();
        let id = ops.spawn(vec!["web".to_string()], None, async {
            Ok(json!({"return": 0}))
        });

        // Poll until the worker finishes.
        for _ in 0..100 {
            let op = ops.get(id).unwrap();
            if op.lock().status == OperationStatus::Success {
                assert_eq!(op.lock().metadata, json!({"return": 0}));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("operation never completed");
    }

    #[tokio::test]
    async fn failed_operation_records_the_error() {
        let ops = Operations::new();
        let id = ops.spawn(vec![], None, async {
            Err(ApiError::Internal("boom".to_string()))
        });

        for _ in 0..100 {
            let op = ops.get(id).unwrap();
            if op.lock().status == OperationStatus::Failure {
                assert_eq!(op.lock().error.as_deref(), Some("boom"));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("operation never failed");
    }

    #[test]
    fn secrets_are_unique_per_slot() {
        let channels = WsChannels::new(&["0", "1", "2"]);
        assert_eq!(channels.len(), 3);
        let metadata = channels.metadata();
        let fds = metadata["fds"].as_object().unwrap();
        assert_eq!(fds.len(), 3);

        let s0 = channels.secret("0").unwrap();
        let s1 = channels.secret("1").unwrap();
        assert_ne!(s0, s1);
        assert_eq!(channels.slot_for_secret(s1), Some(1));
        assert_eq!(channels.slot_for_secret("wrong"), None);
    }
}
