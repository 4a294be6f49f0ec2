//! Platform runtime abstraction (component A).
//!
//! Generalizes the teacher's `outbound::call_outbound` (a single
//! `reqwest::Client` behind a `once_cell::sync::Lazy`, converting
//! `http::Request<Vec<u8>>` to/from `reqwest`) into the full capability set
//! named in spec §4.A: `{fetch, stream, timers, filesystem, child_process}`.
//! The capability flags exist so an embedder could swap in an alternate
//! backend (the teacher's own wasm32 stub in `outbound.rs` is the precedent
//! for a capability-gated alternate backend without implementing one fully)
//! but only [`native::NativeRuntime`] ships in this crate.

pub mod native;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::toolcall::ToolConnection;

/// Declares which operations a [`PlatformRuntime`] actually backs. Every
/// implementation reports this truthfully rather than failing at call time,
/// so callers can branch ahead of making a doomed request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeCapabilities {
    pub fetch: bool,
    pub stream: bool,
    pub timers: bool,
    pub filesystem: bool,
    pub child_process: bool,
}

/// Metadata and lazy body of a streamed HTTP response.
pub struct StreamedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: BoxStream<'static, Result<Bytes, RuntimeError>>,
}

/// The host capabilities the core crate needs but doesn't implement itself:
/// HTTP fetch/streaming-fetch, timers, filesystem, and child-process/MCP
/// connection spawning.
#[async_trait]
pub trait PlatformRuntime: Send + Sync {
    fn capabilities(&self) -> RuntimeCapabilities;

    /// A single request/response round trip, racing `token` the same way
    /// [`Self::stream`] does — spec.md §4.A's `fetch(url, {..., signal?})`
    /// and §6's "the runtime adds the cancellation signal" apply here too,
    /// not just to streaming.
    async fn fetch(
        &self,
        request: http::Request<Vec<u8>>,
        token: CancellationToken,
    ) -> Result<http::Response<Vec<u8>>, RuntimeError>;

    /// A request whose body is read incrementally, cancellable via `token`.
    async fn stream(
        &self,
        request: http::Request<Vec<u8>>,
        token: CancellationToken,
    ) -> Result<StreamedResponse, RuntimeError>;

    async fn sleep(&self, duration: Duration);

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError>;

    async fn file_exists(&self, path: &str) -> bool;

    /// Dispatches to a stdio or HTTP JSON-RPC transport depending on
    /// whether `config` names a `command` or a `url` (component D).
    async fn create_mcp_connection(
        &self,
        config: crate::toolcall::config::McpServerConfig,
    ) -> Result<Box<dyn ToolConnection>, RuntimeError>;
}
