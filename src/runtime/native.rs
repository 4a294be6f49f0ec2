//! Production [`PlatformRuntime`]: tokio + reqwest.
//!
//! Grounded directly on the teacher's `outbound::call_outbound`: one
//! `reqwest::Client` behind a `once_cell::sync::Lazy`, `http::Request<Vec<u8>>`
//! converted to a `reqwest::Request` and the response converted back.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, RuntimeOperation};
use crate::runtime::{PlatformRuntime, RuntimeCapabilities, StreamedResponse};
use crate::toolcall::config::McpServerConfig;
use crate::toolcall::{http::HttpToolConnection, stdio::StdioToolConnection, ToolConnection};

static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to build the shared reqwest client")
});

const PLATFORM: &str = "native";

/// The only [`PlatformRuntime`] this crate ships: tokio for timers and
/// child processes, reqwest for HTTP fetch and streaming fetch, and
/// `tokio::fs` for the filesystem operations.
pub struct NativeRuntime;

impl NativeRuntime {
    pub fn new() -> Self {
        Self
    }

    async fn to_reqwest(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<reqwest::Request, RuntimeError> {
        let (parts, body) = request.into_parts();
        let url = reqwest::Url::parse(&parts.uri.to_string()).map_err(|e| {
            RuntimeError::new(RuntimeOperation::Fetch, parts.uri.to_string(), e.to_string(), PLATFORM)
        })?;
        let mut builder = CLIENT.request(parts.method, url).body(body);
        for (name, value) in parts.headers.iter() {
            builder = builder.header(name, value);
        }
        builder.build().map_err(|e| {
            RuntimeError::new(RuntimeOperation::Fetch, "", e.to_string(), PLATFORM)
        })
    }
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformRuntime for NativeRuntime {
    fn capabilities(&self) -> RuntimeCapabilities {
        RuntimeCapabilities {
            fetch: true,
            stream: true,
            timers: true,
            filesystem: true,
            child_process: cfg!(unix),
        }
    }

    async fn fetch(
        &self,
        request: http::Request<Vec<u8>>,
        token: CancellationToken,
    ) -> Result<http::Response<Vec<u8>>, RuntimeError> {
        let req = self.to_reqwest(request).await?;

        // Races the whole round trip against the token, the same idiom
        // `stream()` uses per-chunk: a cancellation firing mid-request wins
        // the select and the response is never awaited further.
        let resp = tokio::select! {
            _ = token.cancelled() => {
                return Err(RuntimeError::new(RuntimeOperation::Fetch, "", "request cancelled", PLATFORM));
            }
            result = CLIENT.execute(req) => result.map_err(|e| {
                RuntimeError::new(RuntimeOperation::Fetch, "", e.to_string(), PLATFORM)
            })?,
        };

        let mut builder = http::Response::builder().status(resp.status());
        for (name, value) in resp.headers().iter() {
            builder = builder.header(name, value);
        }
        let body = tokio::select! {
            _ = token.cancelled() => {
                return Err(RuntimeError::new(RuntimeOperation::Fetch, "", "request cancelled", PLATFORM));
            }
            result = resp.bytes() => result.map_err(|e| {
                RuntimeError::new(RuntimeOperation::Fetch, "", e.to_string(), PLATFORM)
            })?,
        };
        builder
            .body(body.to_vec())
            .map_err(|e| RuntimeError::new(RuntimeOperation::Fetch, "", e.to_string(), PLATFORM))
    }

    async fn stream(
        &self,
        request: http::Request<Vec<u8>>,
        token: CancellationToken,
    ) -> Result<StreamedResponse, RuntimeError> {
        let req = self.to_reqwest(request).await?;
        let resp = CLIENT.execute(req).await.map_err(|e| {
            RuntimeError::new(RuntimeOperation::Stream, "", e.to_string(), PLATFORM)
        })?;

        let status = resp.status().as_u16();
        let status_text = resp
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();
        let headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let upstream = resp.bytes_stream();
        // Races each chunk poll against the cancellation token, the same
        // idiom the pack's siumai cancellation helper uses for cancellable
        // streams (`tokio::select!` inside an `async_stream::stream!`).
        let body: BoxStream<'static, Result<Bytes, RuntimeError>> = Box::pin(async_stream::stream! {
            futures::pin_mut!(upstream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = upstream.next() => {
                        match next {
                            Some(Ok(bytes)) => yield Ok(bytes),
                            Some(Err(e)) => {
                                yield Err(RuntimeError::new(RuntimeOperation::Stream, "", e.to_string(), PLATFORM));
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(StreamedResponse {
            status,
            status_text,
            headers,
            body,
        })
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| RuntimeError::new(RuntimeOperation::ReadFile, path, e.to_string(), PLATFORM))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| RuntimeError::new(RuntimeOperation::WriteFile, path, e.to_string(), PLATFORM))
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn create_mcp_connection(
        &self,
        config: McpServerConfig,
    ) -> Result<Box<dyn ToolConnection>, RuntimeError> {
        match config {
            McpServerConfig::Http { name, url } => {
                let conn = HttpToolConnection::connect(name, url).await.map_err(|e| {
                    RuntimeError::new(RuntimeOperation::CreateMcpConnection, "", e.to_string(), PLATFORM)
                })?;
                Ok(Box::new(conn))
            }
            McpServerConfig::Stdio { name, command, args } => {
                let conn = StdioToolConnection::spawn(name, command, args)
                    .await
                    .map_err(|e| {
                        RuntimeError::new(
                            RuntimeOperation::CreateMcpConnection,
                            "",
                            e.to_string(),
                            PLATFORM,
                        )
                    })?;
                Ok(Box::new(conn))
            }
        }
    }
}
