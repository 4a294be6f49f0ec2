//! HTTP JSON-RPC transport: one POST per call.
//!
//! Uses the same client-singleton idiom as `runtime::native` (a single
//! `reqwest::Client` behind a `once_cell::sync::Lazy`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ToolCallError;
use crate::toolcall::{
    build_request, next_request_id, response_to_result, ConnectionState, JsonRpcNotification,
    ToolConnection,
};

static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to build the shared reqwest client")
});

pub struct HttpToolConnection {
    name: String,
    url: url::Url,
    counter: AtomicU64,
    active: AtomicBool,
    closed: AtomicBool,
    /// Set when a call or notification hits a genuine transport failure
    /// (the request couldn't be sent at all, or timed out) rather than a
    /// JSON-RPC application error or a non-2xx HTTP status — the parallel
    /// `Failed` state absorbs transport-level errors, not business ones.
    failed: AtomicBool,
    init_lock: Mutex<()>,
}

impl HttpToolConnection {
    /// Connects and initializes with a single `ping` call, validating
    /// status, `jsonrpc` version, and response content-type before marking
    /// the connection `Active`.
    pub async fn connect(name: String, url: url::Url) -> Result<Self, ToolCallError> {
        let conn = Self {
            name,
            url,
            counter: AtomicU64::new(0),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        };
        conn.initialize().await?;
        Ok(conn)
    }

    async fn initialize(&self) -> Result<(), ToolCallError> {
        let _guard = self.init_lock.lock().await;
        self.post_call("ping", None, Duration::from_secs(10))
            .await
            .map_err(|e| ToolCallError::InitFailed(e.to_string()))?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn post_call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ToolCallError> {
        let id = next_request_id(&self.counter);
        let request = build_request(method, params, id);
        let body = serde_json::to_vec(&request).map_err(|e| ToolCallError::ParseError(e.to_string()))?;

        let send = CLIENT
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .body(body)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| {
                self.failed.store(true, Ordering::SeqCst);
                ToolCallError::RequestTimeout
            })?
            .map_err(|e| {
                self.failed.store(true, Ordering::SeqCst);
                ToolCallError::HttpError {
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolCallError::HttpError {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
        {
            return Err(ToolCallError::InvalidContentType(content_type));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolCallError::ParseError(e.to_string()))?;
        let parsed: crate::toolcall::JsonRpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| ToolCallError::ParseError(e.to_string()))?;

        if let Some(version) = &parsed.jsonrpc {
            if version != "2.0" {
                return Err(ToolCallError::InvalidJsonRpcVersion(version.clone()));
            }
        }

        response_to_result(parsed)
    }

    /// Posts a true JSON-RPC notification (no `id`) and doesn't await or
    /// parse a response body — the HTTP transport's reply to a notification
    /// POST, if any, is not part of the JSON-RPC wire contract (spec §6).
    async fn post_notification(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<(), ToolCallError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_vec(&notification)
            .map_err(|e| ToolCallError::ParseError(e.to_string()))?;

        let send = CLIENT
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .body(body)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| {
                self.failed.store(true, Ordering::SeqCst);
                ToolCallError::RequestTimeout
            })?
            .map_err(|e| {
                self.failed.store(true, Ordering::SeqCst);
                ToolCallError::HttpError {
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolCallError::HttpError {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ToolConnection for HttpToolConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            ConnectionState::Closed
        } else if self.failed.load(Ordering::SeqCst) {
            ConnectionState::Failed
        } else if self.active.load(Ordering::SeqCst) {
            ConnectionState::Active
        } else {
            ConnectionState::Initializing
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ToolCallError> {
        if self.state() != ConnectionState::Active {
            return Err(ToolCallError::Inactive);
        }
        self.post_call(method, params, timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolCallError> {
        if self.state() != ConnectionState::Active {
            return Err(ToolCallError::Inactive);
        }
        self.post_notification(method, params, Duration::from_secs(10))
            .await
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connect_to(server: &MockServer) -> HttpToolConnection {
        let url = url::Url::parse(&server.uri()).unwrap();
        HttpToolConnection::connect("mock".into(), url).await.unwrap()
    }

    #[tokio::test]
    async fn connect_marks_active_after_ping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": "x", "result": {}})),
            )
            .mount(&server)
            .await;

        let conn = connect_to(&server).await;
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn call_returns_jsonrpc_application_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": "x",
                        "error": {"code": -32601, "message": "not found"}
                    })),
            )
            .mount(&server)
            .await;

        let conn = connect_to(&server).await;
        let err = conn.call("missing", None, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ToolCallError::JsonRpcApplicationError { code: -32601, .. }
        ));
    }

    #[tokio::test]
    async fn notify_does_not_parse_a_jsonrpc_body() {
        let server = MockServer::start().await;
        // Every POST (ping and the notification) gets a 204 with no body;
        // if `notify` tried to parse a JSON-RPC response like `call` does,
        // this would fail.
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let url = url::Url::parse(&server.uri()).unwrap();
        // `connect` requires a parseable ping response, so build the
        // connection by hand instead, marking it active directly.
        let conn = HttpToolConnection {
            name: "mock".into(),
            url,
            counter: AtomicU64::new(0),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        };

        conn.notify("progress", Some(serde_json::json!({"pct": 50})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transport_failure_transitions_state_to_failed() {
        // No server is listening on this port, so the send itself fails
        // before any HTTP response exists — a transport-level error, which
        // should surface as `Failed`, distinct from a non-2xx response.
        let url = url::Url::parse("http://127.0.0.1:1").unwrap();
        let conn = HttpToolConnection {
            name: "mock".into(),
            url,
            counter: AtomicU64::new(0),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        };

        let err = conn.call("anything", None, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ToolCallError::HttpError { .. }));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn close_transitions_state_to_closed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": "x", "result": {}})),
            )
            .mount(&server)
            .await;

        let conn = connect_to(&server).await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.call("anything", None, Duration::from_secs(1)).await,
            Err(ToolCallError::Inactive)
        ));
    }
}
