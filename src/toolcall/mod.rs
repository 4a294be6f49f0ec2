//! JSON-RPC tool connection (component D).
//!
//! Hand-rolled rather than delegated to the teacher's `rmcp` dependency:
//! `rmcp`'s streamable-HTTP transport assumes session semantics this
//! spec's plain POST/response contract doesn't have. Grounded on the
//! teacher's own conventions elsewhere: an `async_trait` trait object
//! (`dyn ToolConnection`), a `thiserror`-based error enum shaped like
//! `mcp::registry::RegistryError`, and the client-singleton idiom from
//! `outbound.rs` for the HTTP transport.

pub mod config;
pub mod http;
pub mod stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::error::ToolCallError;

/// Lifecycle of a tool connection. `Active` is the only state where
/// `call`/`notify` are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initializing,
    Active,
    Closing,
    Closed,
    Failed,
}

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response, either a result or an error.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Generates request ids unique across reconnects: a monotonic counter
/// combined with a timestamp, serialized as a string so the wire shape is
/// uniform whether an id is conceptually a string or a number.
pub fn next_request_id(counter: &AtomicU64) -> Value {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    Value::String(format!("{ts}-{n}"))
}

pub fn build_request(method: &str, params: Option<Value>, id: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id,
        method: method.to_string(),
        params,
    }
}

/// One outstanding request: the sender resolves it when a matching
/// response arrives, and an optional timer handle cancels the request if
/// a response never comes.
pub struct PendingEntry {
    pub resolve: oneshot::Sender<Result<Value, ToolCallError>>,
    pub timer: Option<tokio::task::JoinHandle<()>>,
}

/// `id -> pending entry`, shared between a connection's writer and its
/// background reader/exit-watcher tasks.
#[derive(Default, Clone)]
pub struct PendingTable {
    inner: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: String, entry: PendingEntry) {
        self.inner.lock().await.insert(id, entry);
    }

    /// Removes and resolves the entry matching `id`, if still pending.
    /// Returns `true` if an entry was found (a late or duplicate response
    /// resolves nothing and the caller should just drop it).
    pub async fn resolve(&self, id: &str, result: Result<Value, ToolCallError>) -> bool {
        let entry = self.inner.lock().await.remove(id);
        match entry {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                let _ = entry.resolve.send(result);
                true
            }
            None => false,
        }
    }

    /// Rejects every still-pending entry with `reason`, used when the
    /// underlying transport closes or the process exits.
    pub async fn reject_all(&self, reason: ToolCallError) {
        let mut table = self.inner.lock().await;
        for (_, entry) in table.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            let _ = entry.resolve.send(Err(match &reason {
                ToolCallError::SubprocessExited { code, signal } => {
                    ToolCallError::SubprocessExited {
                        code: *code,
                        signal: *signal,
                    }
                }
                ToolCallError::ClosedWhilePending => ToolCallError::ClosedWhilePending,
                other => ToolCallError::ParseError(other.to_string()),
            }));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

fn id_to_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn response_to_result(response: JsonRpcResponse) -> Result<Value, ToolCallError> {
    if let Some(error) = response.error {
        return Err(ToolCallError::JsonRpcApplicationError {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

/// Dispatches a raw line/body of JSON text: parses it as either a response
/// (has `id`) and resolves the pending table, or a notification (no `id`)
/// and logs it, matching both transports' "id-bearing lines resolve,
/// notifications are logged and dropped" behaviour.
pub async fn dispatch_incoming(pending: &PendingTable, raw: &str) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("dropping unparseable JSON-RPC line: {e}");
            return;
        }
    };

    if value.get("id").is_none() {
        log::debug!("dropping JSON-RPC notification: {raw}");
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(response) => {
            let key = id_to_key(&response.id);
            let result = crate::toolcall::response_to_result(response);
            pending.resolve(&key, result).await;
        }
        Err(e) => log::debug!("dropping malformed JSON-RPC response: {e}"),
    }
}

/// A single JSON-RPC tool connection, over either transport.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Issues a call and awaits its response, bounded by `timeout`.
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ToolCallError>;

    /// Sends a notification; no response is awaited.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolCallError>;

    /// Closes the connection, rejecting any still-pending calls.
    async fn close(&self);
}
