//! Child-process JSON-RPC transport.
//!
//! Spawned with stdio `{piped, piped, inherit}`, exactly the shape the
//! teacher's `McpServerTransportConfig::start`'s `Stdio` arm configures,
//! generalized from "no raw bytes, `rmcp` owns the protocol" to this
//! crate's explicit pending-request table and per-write timeout.

use std::process::Stdio;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::Instrument;

use crate::error::ToolCallError;
use crate::toolcall::{
    build_request, dispatch_incoming, next_request_id, ConnectionState, PendingEntry, PendingTable,
    ToolConnection,
};

const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct StdioToolConnection {
    name: String,
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<tokio::process::ChildStdin>>,
    pending: PendingTable,
    counter: AtomicU64,
    state: Arc<StdMutex<ConnectionState>>,
    reader_task: tokio::task::JoinHandle<()>,
    waiter_task: tokio::task::JoinHandle<()>,
}

impl StdioToolConnection {
    pub async fn spawn(
        name: String,
        command: String,
        args: Vec<String>,
    ) -> Result<Self, ToolCallError> {
        let mut child = Command::new(&command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ToolCallError::SubprocessSpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolCallError::SubprocessSpawnFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolCallError::SubprocessSpawnFailed("no stdout handle".into()))?;

        let pending = PendingTable::new();
        let state = Arc::new(StdMutex::new(ConnectionState::Active));

        let reader_pending = pending.clone();
        let reader_name = name.clone();
        let reader_task = tokio::spawn(
            async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => dispatch_incoming(&reader_pending, &line).await,
                        Ok(None) => {
                            tracing::debug!("stdout closed, stopping reader");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!("stdio reader error: {e}");
                            break;
                        }
                    }
                }
            }
            .instrument(tracing::debug_span!("mcp_stdio_reader", server = %reader_name)),
        );

        let child = Arc::new(Mutex::new(child));
        let waiter_child = child.clone();
        let waiter_pending = pending.clone();
        let waiter_state = state.clone();
        let waiter_name = name.clone();
        let waiter_task = tokio::spawn(
            async move {
                let status = waiter_child.lock().await.wait().await;
                // A `Closing` state means `close()` is mid-teardown and is
                // the one that will settle this to `Closed`; any other
                // state at this point means the process went away on its
                // own, which is a failure, not a graceful close.
                {
                    let mut guard = waiter_state.lock().unwrap();
                    if !matches!(*guard, ConnectionState::Closing | ConnectionState::Closed) {
                        *guard = ConnectionState::Failed;
                    }
                }
                let (code, signal) = match status {
                    #[cfg(unix)]
                    Ok(status) => (
                        status.code(),
                        std::os::unix::process::ExitStatusExt::signal(&status),
                    ),
                    #[cfg(not(unix))]
                    Ok(status) => (status.code(), None),
                    Err(_) => (None, None),
                };
                tracing::info!(?code, ?signal, "subprocess exited");
                waiter_pending
                    .reject_all(ToolCallError::SubprocessExited { code, signal })
                    .await;
            }
            .instrument(tracing::info_span!("mcp_stdio_waiter", server = %waiter_name)),
        );

        Ok(Self {
            name,
            child,
            stdin: Arc::new(Mutex::new(stdin)),
            pending,
            counter: AtomicU64::new(0),
            state,
            reader_task,
            waiter_task,
        })
    }

    async fn write_line(&self, line: String) -> Result<(), ToolCallError> {
        let mut stdin = self.stdin.lock().await;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        match tokio::time::timeout(STDIN_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ToolCallError::StdinWriteError(e.to_string())),
            Err(_) => Err(ToolCallError::StdinWriteTimeout),
        }
    }
}

#[async_trait]
impl ToolConnection for StdioToolConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
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

        let id = next_request_id(&self.counter);
        let key = match &id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let request = build_request(method, params, id);
        let line = serde_json::to_string(&request).map_err(|e| ToolCallError::ParseError(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .insert(key.clone(), PendingEntry { resolve: tx, timer: None })
            .await;

        self.write_line(line).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolCallError::ClosedWhilePending),
            Err(_) => {
                self.pending.resolve(&key, Err(ToolCallError::RequestTimeout)).await;
                Err(ToolCallError::RequestTimeout)
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolCallError> {
        if self.state() != ConnectionState::Active {
            return Err(ToolCallError::Inactive);
        }
        let notification = crate::toolcall::JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.to_string(),
            params,
        };
        let line = serde_json::to_string(&notification)
            .map_err(|e| ToolCallError::ParseError(e.to_string()))?;
        self.write_line(line).await
    }

    /// Sends SIGTERM, waits up to the grace period, then force-kills. On
    /// non-Unix targets falls back directly to `start_kill` since stable
    /// tokio has no portable graceful-then-force primitive.
    async fn close(&self) {
        {
            let mut guard = self.state.lock().unwrap();
            if matches!(*guard, ConnectionState::Closed | ConnectionState::Failed) {
                return;
            }
            *guard = ConnectionState::Closing;
        }

        self.pending.reject_all(ToolCallError::ClosedWhilePending).await;

        #[cfg(unix)]
        {
            let pid = self.child.lock().await.id();
            if let Some(pid) = pid {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
                let waited = tokio::time::timeout(KILL_GRACE_PERIOD, async {
                    self.child.lock().await.wait().await
                })
                .await;
                if waited.is_err() {
                    let _ = self.child.lock().await.start_kill();
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.lock().await.start_kill();
        }

        self.reader_task.abort();
        self.waiter_task.abort();

        let mut guard = self.state.lock().unwrap();
        if *guard != ConnectionState::Failed {
            *guard = ConnectionState::Closed;
        }
    }
}
