//! The externally-visible request/response shapes for the bridge client
//! (spec §6's public interface).

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::toolcall::ToolConnection;

/// Description of an outbound HTTP call, returned by
/// [`crate::plugin::ProviderPlugin::translate_request`] and executed by the
/// platform runtime. Mirrors the teacher's own `http::Request<Vec<u8>>`
/// convention (see `outbound::call_outbound`) rather than inventing a new
/// request shape.
#[derive(Debug, Clone)]
pub struct HttpRequestDescriptor {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequestDescriptor {
    pub fn into_http_request(self) -> Result<http::Request<Vec<u8>>, http::Error> {
        let mut builder = http::Request::builder().method(self.method).uri(self.url);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder.body(self.body)
    }

    /// Appends extra headers onto an already-translated request. Used to
    /// splice a plugin's `cache_headers()` in ahead of dispatch, without
    /// every plugin's `translate_request` needing to know about caching.
    pub fn with_extra_headers(mut self, extra: Vec<(String, String)>) -> Self {
        self.headers.extend(extra);
        self
    }
}

/// A request for a single chat turn, optionally streamed.
///
/// `tool_connections` carries live, already-connected [`ToolConnection`]s
/// scoped to this one call (spec §3's ownership table keeps these out of
/// the bridge's own lifetime-long state: only the registries and the
/// platform runtime live there). It can't be serialized or schema-checked
/// like the rest of the request, so it's excluded from both. `ToolConnection`
/// isn't `Debug`, so `ChatRequest` implements it by hand below rather than
/// deriving it (`#[serde(skip)]` doesn't extend to `derive(Debug)`).
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip, default)]
    #[schemars(skip)]
    pub tool_connections: Option<HashMap<String, Arc<dyn ToolConnection>>>,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("model", &self.model)
            .field("messages", &self.messages)
            .field("stream", &self.stream)
            .field("tools", &self.tools)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("metadata", &self.metadata)
            .field(
                "tool_connections",
                &self
                    .tool_connections
                    .as_ref()
                    .map(|conns| conns.keys().collect::<Vec<_>>()),
            )
            .finish()
    }
}

/// A tool made available to the model for this turn.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// The outcome of a non-streaming chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
}
