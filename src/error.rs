//! Typed error taxonomy shared across the crate.
//!
//! Every fallible boundary returns (or is mapped into) [`LLMError`].
//! Subsystems with their own nested failure modes (the platform runtime,
//! tool connections, cancellation) define their own `thiserror` enum and
//! fold it into [`LLMError`] via `#[from]`.

use std::time::SystemTime;

/// Top-level error type returned by every public operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    /// Bad input at a public boundary: schema violations, malformed model
    /// id, missing required field.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request names an unknown provider, an unknown model, or a
    /// plugin that doesn't support the requested model.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider returned an error status or a payload that doesn't
    /// match the unified shape.
    #[error("provider error: {0}")]
    Provider(String),

    /// Transport failure from the platform runtime.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Failure from a JSON-RPC tool connection.
    #[error(transparent)]
    ToolCall(#[from] ToolCallError),

    /// Cancellation of an in-flight operation.
    #[error(transparent)]
    Cancellation(#[from] CancellationError),

    /// JSON (de)serialization failure outside of a more specific kind.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<http::Error> for LLMError {
    fn from(err: http::Error) -> Self {
        LLMError::Runtime(RuntimeError::new(
            RuntimeOperation::Fetch,
            "",
            err.to_string(),
            "native",
        ))
    }
}

impl From<url::ParseError> for LLMError {
    fn from(err: url::ParseError) -> Self {
        LLMError::Validation(format!("invalid url: {err}"))
    }
}

/// Operations a [`RuntimeError`] can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOperation {
    Fetch,
    Stream,
    SetTimeout,
    SetInterval,
    ReadFile,
    WriteFile,
    FileExists,
    CreateMcpConnection,
}

impl std::fmt::Display for RuntimeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeOperation::Fetch => "fetch",
            RuntimeOperation::Stream => "stream",
            RuntimeOperation::SetTimeout => "setTimeout",
            RuntimeOperation::SetInterval => "setInterval",
            RuntimeOperation::ReadFile => "readFile",
            RuntimeOperation::WriteFile => "writeFile",
            RuntimeOperation::FileExists => "fileExists",
            RuntimeOperation::CreateMcpConnection => "createMcpConnection",
        };
        f.write_str(s)
    }
}

/// Transport failure raised by a [`crate::runtime::PlatformRuntime`].
#[derive(Debug, thiserror::Error)]
#[error("runtime error during {operation} on {platform}: {message}")]
pub struct RuntimeError {
    pub operation: RuntimeOperation,
    pub input: String,
    pub message: String,
    pub platform: &'static str,
}

impl RuntimeError {
    pub fn new(
        operation: RuntimeOperation,
        input: impl Into<String>,
        message: impl Into<String>,
        platform: &'static str,
    ) -> Self {
        Self {
            operation,
            input: input.into(),
            message: message.into(),
            platform,
        }
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        RuntimeError::new(RuntimeOperation::Fetch, "", err.to_string(), "native")
    }
}

/// Failure modes specific to a JSON-RPC tool connection (component D).
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("invalid url scheme: {0}")]
    InvalidProtocol(String),
    #[error("remote-only platform requires https to a non-loopback host")]
    RemoteOnlyViolation,
    #[error("security violation: {0}")]
    SecurityViolation(String),
    #[error("connection initialization failed: {0}")]
    InitFailed(String),
    #[error("HTTP error: status {status}")]
    HttpError { status: u16 },
    #[error("expected a JSON response body, got content-type {0:?}")]
    InvalidContentType(Option<String>),
    #[error("unsupported jsonrpc version: {0}")]
    InvalidJsonRpcVersion(String),
    #[error("failed to parse JSON-RPC message: {0}")]
    ParseError(String),
    #[error("connection is not active")]
    Inactive,
    #[error("failed to spawn subprocess: {0}")]
    SubprocessSpawnFailed(String),
    #[error("subprocess exited (code={code:?}, signal={signal:?})")]
    SubprocessExited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    #[error("failed to write to subprocess stdin: {0}")]
    StdinWriteError(String),
    #[error("timed out writing to subprocess stdin")]
    StdinWriteTimeout,
    #[error("request timed out")]
    RequestTimeout,
    #[error("connection closed while request was pending")]
    ClosedWhilePending,
    #[error("jsonrpc application error {code}: {message}")]
    JsonRpcApplicationError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

/// The phase a cancellation or its cleanup pass occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPhase {
    Initialization,
    Execution,
    ToolCalls,
    Streaming,
    Cleanup,
}

/// Cancellation of an in-flight operation.
#[derive(Debug, thiserror::Error)]
pub enum CancellationError {
    #[error("operation cancelled{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Cancelled {
        reason: Option<String>,
        phase: CancellationPhase,
        cleanup_completed: bool,
    },
    #[error("graceful cleanup exceeded its {timeout_ms}ms budget during {phase:?}")]
    GracefulTimeout {
        phase: CancellationPhase,
        timeout_ms: u64,
        cleanup_attempted: bool,
    },
}

impl CancellationError {
    pub fn phase(&self) -> CancellationPhase {
        match self {
            CancellationError::Cancelled { phase, .. } => *phase,
            CancellationError::GracefulTimeout { phase, .. } => *phase,
        }
    }

    /// Stable wire representation surfaced to callers (spec §6).
    pub fn to_wire(&self) -> serde_json::Value {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        match self {
            CancellationError::Cancelled {
                reason,
                phase,
                cleanup_completed,
            } => serde_json::json!({
                "name": "CancellationError",
                "message": self.to_string(),
                "code": "CANCELLATION_ERROR",
                "reason": reason,
                "phase": phase,
                "cleanupCompleted": cleanup_completed,
                "timestamp": timestamp,
            }),
            CancellationError::GracefulTimeout {
                phase,
                timeout_ms,
                cleanup_attempted,
            } => serde_json::json!({
                "name": "CancellationError",
                "message": self.to_string(),
                "code": "GRACEFUL_CANCELLATION_TIMEOUT",
                "phase": phase,
                "cleanupCompleted": false,
                "timeoutMs": timeout_ms,
                "cleanupAttempted": cleanup_attempted,
                "timestamp": timestamp,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_wire_shape_carries_code() {
        let err = CancellationError::Cancelled {
            reason: Some("user requested".into()),
            phase: CancellationPhase::Streaming,
            cleanup_completed: true,
        };
        let wire = err.to_wire();
        assert_eq!(wire["code"], "CANCELLATION_ERROR");
        assert_eq!(wire["phase"], "streaming");
        assert_eq!(wire["cleanupCompleted"], true);
    }

    #[test]
    fn graceful_timeout_wire_shape() {
        let err = CancellationError::GracefulTimeout {
            phase: CancellationPhase::Cleanup,
            timeout_ms: 5000,
            cleanup_attempted: true,
        };
        let wire = err.to_wire();
        assert_eq!(wire["code"], "GRACEFUL_CANCELLATION_TIMEOUT");
        assert_eq!(wire["timeoutMs"], 5000);
    }

    #[test]
    fn runtime_error_display_includes_operation_and_platform() {
        let err = RuntimeError::new(RuntimeOperation::Fetch, "https://x", "boom", "native");
        let msg = err.to_string();
        assert!(msg.contains("fetch"));
        assert!(msg.contains("native"));
    }
}
