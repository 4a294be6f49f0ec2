//! Bridge client (component H): the public entry point.
//!
//! Generalizes the teacher's `LLMProviderFromHTTP` "translate → call_outbound
//! → parse" pipeline into the full dispatch algorithm, adding what that
//! pipeline doesn't need because it has no tool loop or cancellation manager
//! at that layer: spinning up a [`CancellationManager`] per call and, for
//! streamed turns, splicing in an inline tool-call loop (grounded on
//! `tool_decorator::ToolEnabledProvider::call_tool`'s name-keyed dispatch,
//! generalized from one provider's local tool registry to a per-request map
//! of [`ToolConnection`]s the caller supplies on `ChatRequest` itself), and
//! guaranteeing `dispose()` on every exit path.

pub mod request;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use tokio_util::sync::CancellationToken;

use crate::cancel::CancellationManager;
use crate::error::{CancellationPhase, LLMError};
use crate::message::{ContentPart, Message, Role, StreamDelta, ToolCall};
use crate::model_id::ModelId;
use crate::plugin::apply_cache_headers;
use crate::registry::{ModelRegistry, ProviderRegistry};
use crate::runtime::PlatformRuntime;
use crate::stream::StreamCancellationHandler;
use crate::toolcall::ToolConnection;

use request::{ChatRequest, ChatResponse};

const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STREAM_CHECK_INTERVAL: Duration = Duration::from_millis(250);
const MAX_TOOL_LOOP_ITERATIONS: usize = 8;

/// Dispatches one tool call by name against the per-request connection map
/// (spec §6's `toolConnections`): the part before the first `.` selects the
/// server, the rest is the method name passed to it.
async fn dispatch_tool_call(
    tools: &HashMap<String, Arc<dyn ToolConnection>>,
    name: &str,
    arguments: serde_json::Value,
) -> Result<serde_json::Value, LLMError> {
    let (server, method) = name.split_once('.').unwrap_or((name, name));
    let conn = tools
        .get(server)
        .ok_or_else(|| LLMError::Configuration(format!("no tool connection provided for {server}")))?;
    conn.call(method, Some(arguments), DEFAULT_TOOL_CALL_TIMEOUT)
        .await
        .map_err(LLMError::from)
}

/// Owns the model/provider registries and the platform runtime for its
/// lifetime (spec §3's ownership table): tool connections are scoped to a
/// single [`ChatRequest`] instead, never held here.
pub struct BridgeClient {
    runtime: Arc<dyn PlatformRuntime>,
    models: ModelRegistry,
    providers: ProviderRegistry,
}

impl BridgeClient {
    pub fn new(runtime: Arc<dyn PlatformRuntime>) -> Self {
        Self {
            runtime,
            models: ModelRegistry::new(),
            providers: ProviderRegistry::new(),
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Step 1: validate the request against its derived schema before
    /// anything else runs.
    fn validate_request(request: &ChatRequest) -> Result<(), LLMError> {
        let value = serde_json::to_value(request)?;
        crate::validation::validate_chat_request_shape(&value)
    }

    /// Step 1-3: resolve the model id and the plugin that serves it (latest
    /// registered version for that provider). A model missing from the
    /// model registry is permitted — model metadata is advisory, not a
    /// precondition for dispatch (spec §4.H step 2); only a missing plugin
    /// is a configuration error.
    fn resolve_plugin(&self, model_id: &str) -> Result<(ModelId, Arc<dyn crate::plugin::ProviderPlugin>), LLMError> {
        let parsed = ModelId::parse(model_id)?;
        let plugin = self
            .providers
            .latest(parsed.provider())
            .ok_or_else(|| LLMError::Configuration(format!("no plugin registered for provider {}", parsed.provider())))?;
        if !plugin.supports_model(model_id) {
            return Err(LLMError::Configuration(format!(
                "plugin {} does not support model {model_id}",
                plugin.id()
            )));
        }
        Ok((parsed, plugin))
    }

    /// Non-streaming chat turn (spec §4.H). A single request/response round
    /// trip: validate (1), resolve the plugin (2-3), spin up a cancellation
    /// manager and start its periodic checks (4), translate, merge cache
    /// headers, fetch, and parse (5-7). Unlike [`Self::chat_stream`], there
    /// is no tool-call loop here — a response carrying tool calls is simply
    /// handed back to the caller to act on and re-submit as a follow-up
    /// turn.
    pub async fn chat(
        &self,
        request: ChatRequest,
        external_cancel: Option<CancellationToken>,
    ) -> Result<ChatResponse, LLMError> {
        Self::validate_request(&request)?;
        let (_model_id, plugin) = self.resolve_plugin(&request.model)?;
        let manager = Arc::new(CancellationManager::new(external_cancel, DEFAULT_GRACEFUL_TIMEOUT));
        manager.throw_if_cancelled(CancellationPhase::Initialization)?;
        manager.schedule_periodic_checks().await;

        let result = self.chat_inner(&request, plugin, &manager).await;

        // Step 10: dispose on every exit path, success or failure.
        let _ = manager.run_cleanup(CancellationPhase::Cleanup).await;
        manager.dispose().await;
        result
    }

    async fn chat_inner(
        &self,
        request: &ChatRequest,
        plugin: Arc<dyn crate::plugin::ProviderPlugin>,
        manager: &CancellationManager,
    ) -> Result<ChatResponse, LLMError> {
        manager.throw_if_cancelled(CancellationPhase::Execution)?;

        let messages = plugin.mark_for_caching(request.messages.clone());
        let descriptor = plugin.translate_request(&request.model, &messages, false)?;
        let descriptor = apply_cache_headers(plugin.as_ref(), descriptor);
        let http_request = descriptor.into_http_request().map_err(LLMError::from)?;
        let response = self.runtime.fetch(http_request, manager.signal().clone()).await?;

        let (parts, body) = response.into_parts();
        if !parts.status.is_success() {
            return Err(plugin.normalize_error(parts.status.as_u16(), &body));
        }

        let message = plugin.parse_response(&body)?;
        Ok(ChatResponse { message })
    }

    /// Streaming chat turn (spec §4.H step 8): same validation and
    /// resolution as [`Self::chat`], but the HTTP body is wrapped by a
    /// [`StreamCancellationHandler`] (component C), and a response delta
    /// carrying tool calls drives an inline loop — pause the handler,
    /// dispatch each call against `request.tool_connections`, splice the
    /// results back into the message history, resume, and re-submit a new
    /// upstream request — instead of returning control to the caller.
    pub async fn chat_stream(
        &self,
        request: ChatRequest,
        external_cancel: Option<CancellationToken>,
    ) -> Result<futures::stream::BoxStream<'static, Result<StreamDelta, LLMError>>, LLMError> {
        Self::validate_request(&request)?;
        let (_model_id, plugin) = self.resolve_plugin(&request.model)?;
        let manager = Arc::new(CancellationManager::new(external_cancel, DEFAULT_GRACEFUL_TIMEOUT));
        manager.throw_if_cancelled(CancellationPhase::Initialization)?;
        manager.schedule_periodic_checks().await;

        let tool_connections = request.tool_connections.clone().unwrap_or_default();
        let mut messages = plugin.mark_for_caching(request.messages.clone());
        let model = request.model.clone();

        let token = manager.signal().clone();
        let handler = Arc::new(StreamCancellationHandler::new(token.clone()));
        let runtime = self.runtime.clone();

        let stream: futures::stream::BoxStream<'static, Result<StreamDelta, LLMError>> =
            Box::pin(async_stream::stream! {
                use futures::StreamExt;

                let mut iterations = 0usize;

                'outer: loop {
                    if let Err(e) = manager.throw_if_cancelled(CancellationPhase::Execution) {
                        yield Err(LLMError::Cancellation(e));
                        break 'outer;
                    }

                    let descriptor = match plugin.translate_request(&model, &messages, true) {
                        Ok(d) => d,
                        Err(e) => {
                            yield Err(e);
                            break 'outer;
                        }
                    };
                    let descriptor = apply_cache_headers(plugin.as_ref(), descriptor);
                    let http_request = match descriptor.into_http_request() {
                        Ok(r) => r,
                        Err(e) => {
                            yield Err(LLMError::from(e));
                            break 'outer;
                        }
                    };

                    let streamed = match runtime.stream(http_request, token.clone()).await {
                        Ok(s) => s,
                        Err(e) => {
                            yield Err(LLMError::from(e));
                            break 'outer;
                        }
                    };

                    if streamed.status >= 400 {
                        let mut body = streamed.body;
                        let mut error_body = Vec::new();
                        while let Some(chunk) = body.next().await {
                            match chunk {
                                Ok(bytes) => error_body.extend_from_slice(&bytes),
                                Err(e) => {
                                    yield Err(LLMError::from(e));
                                    break 'outer;
                                }
                            }
                        }
                        yield Err(plugin.normalize_error(streamed.status, &error_body));
                        break 'outer;
                    }

                    handler.start_stream_monitoring();

                    let plugin_inner = plugin.clone();
                    let upstream: futures::stream::BoxStream<'static, Result<StreamDelta, LLMError>> =
                        Box::pin(async_stream::stream! {
                            let mut body = streamed.body;
                            while let Some(chunk) = body.next().await {
                                match chunk {
                                    Ok(bytes) => match plugin_inner.parse_stream_delta(&bytes) {
                                        Ok(Some(delta)) => yield Ok(delta),
                                        Ok(None) => continue,
                                        Err(e) => {
                                            yield Err(e);
                                            break;
                                        }
                                    },
                                    Err(e) => {
                                        yield Err(LLMError::from(e));
                                        break;
                                    }
                                }
                            }
                        });

                    let mut wrapped = handler.clone().wrap(upstream, DEFAULT_STREAM_CHECK_INTERVAL);
                    let mut pending_tool_calls: Vec<ToolCall> = Vec::new();
                    let mut stop = false;

                    while let Some(item) = wrapped.next().await {
                        match item {
                            Ok(delta) => {
                                if let Some(calls) = &delta.delta.tool_calls {
                                    pending_tool_calls.extend(calls.iter().cloned());
                                }
                                let finished = delta.finished;
                                yield Ok(delta);
                                if finished {
                                    break;
                                }
                            }
                            Err(e) => {
                                stop = true;
                                yield Err(e);
                                break;
                            }
                        }
                    }

                    if stop || pending_tool_calls.is_empty() || iterations >= MAX_TOOL_LOOP_ITERATIONS {
                        break 'outer;
                    }

                    if let Err(e) = manager.throw_if_cancelled(CancellationPhase::ToolCalls) {
                        yield Err(LLMError::Cancellation(e));
                        break 'outer;
                    }

                    handler.pause();

                    messages.push(Message {
                        role: Role::Assistant,
                        content: pending_tool_calls
                            .iter()
                            .map(|c| ContentPart::ToolCall {
                                id: c.id.clone(),
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            })
                            .collect(),
                    });

                    for call in &pending_tool_calls {
                        let result =
                            dispatch_tool_call(&tool_connections, &call.name, call.arguments.clone()).await;
                        messages.push(Message {
                            role: Role::Tool,
                            content: vec![ContentPart::ToolResult {
                                id: call.id.clone(),
                                result: result.map_err(|e| e.to_string()),
                            }],
                        });
                    }

                    iterations += 1;
                    handler.resume();
                }

                let _ = manager.run_cleanup(CancellationPhase::Cleanup).await;
                manager.dispose().await;
            });

        Ok(stream)
    }

    pub fn register_provider(&self, id: impl Into<String>, version: Version, plugin: Arc<dyn crate::plugin::ProviderPlugin>) {
        self.providers.register(id, version, plugin);
    }

    /// Every provider id with at least one registered plugin version (spec
    /// §4.H `listAvailableProviders()`).
    pub fn list_available_providers(&self) -> Vec<String> {
        self.providers.ids()
    }

    /// Registered model descriptors, optionally filtered to one provider
    /// (spec §4.H `listAvailableModels(providerFilter?)`). Advisory, like
    /// the rest of the model registry — a provider can serve models this
    /// list doesn't know about.
    pub fn list_available_models(
        &self,
        provider_filter: Option<&str>,
    ) -> Vec<crate::registry::ModelDescriptor> {
        self.models.list(provider_filter)
    }

    /// Looks up a model's advertised capabilities (spec §4.H
    /// `getModelCapabilities(modelId)`).
    pub fn get_model_capabilities(&self, model_id: &str) -> Option<crate::registry::ModelCapabilities> {
        self.models.get(model_id).map(|d| d.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::request::HttpRequestDescriptor;
    use crate::registry::{ModelCapabilities, ModelDescriptor};
    use crate::runtime::{RuntimeCapabilities, StreamedResponse};
    use async_trait::async_trait;

    struct EchoPlugin;

    #[async_trait]
    impl crate::plugin::ProviderPlugin for EchoPlugin {
        fn id(&self) -> &str {
            "echo"
        }

        fn translate_request(
            &self,
            _model: &str,
            _messages: &[Message],
            _stream: bool,
        ) -> Result<HttpRequestDescriptor, LLMError> {
            Ok(HttpRequestDescriptor {
                method: http::Method::POST,
                url: "https://example.invalid/chat".into(),
                headers: vec![],
                body: vec![],
            })
        }

        fn parse_response(&self, _body: &[u8]) -> Result<Message, LLMError> {
            Ok(Message::text(Role::Assistant, "hello"))
        }

        fn parse_stream_delta(&self, _chunk: &[u8]) -> Result<Option<StreamDelta>, LLMError> {
            Ok(None)
        }

        fn normalize_error(&self, status: u16, _body: &[u8]) -> LLMError {
            LLMError::Provider(format!("echo status {status}"))
        }
    }

    struct StubRuntime;

    #[async_trait]
    impl PlatformRuntime for StubRuntime {
        fn capabilities(&self) -> RuntimeCapabilities {
            RuntimeCapabilities::default()
        }

        async fn fetch(
            &self,
            _request: http::Request<Vec<u8>>,
            _token: CancellationToken,
        ) -> Result<http::Response<Vec<u8>>, crate::error::RuntimeError> {
            Ok(http::Response::builder().status(200).body(vec![]).unwrap())
        }

        async fn stream(
            &self,
            _request: http::Request<Vec<u8>>,
            _token: CancellationToken,
        ) -> Result<StreamedResponse, crate::error::RuntimeError> {
            unimplemented!("not exercised in this test")
        }

        async fn sleep(&self, _duration: Duration) {}

        async fn read_file(&self, _path: &str) -> Result<Vec<u8>, crate::error::RuntimeError> {
            unimplemented!()
        }

        async fn write_file(&self, _path: &str, _contents: &[u8]) -> Result<(), crate::error::RuntimeError> {
            unimplemented!()
        }

        async fn file_exists(&self, _path: &str) -> bool {
            false
        }

        async fn create_mcp_connection(
            &self,
            _config: crate::toolcall::config::McpServerConfig,
        ) -> Result<Box<dyn ToolConnection>, crate::error::RuntimeError> {
            unimplemented!()
        }
    }

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor {
            id: "echo:v1".into(),
            name: "Echo".into(),
            provider: "echo".into(),
            capabilities: ModelCapabilities {
                streaming: false,
                tool_calls: false,
                images: false,
                documents: false,
                temperature: None,
                prompt_caching: None,
            },
            max_tokens: None,
            supported_content_types: vec![],
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn chat_resolves_plugin_and_returns_message() {
        let client = BridgeClient::new(Arc::new(StubRuntime));
        client.models().register(descriptor()).unwrap();
        client.register_provider("echo", Version::parse("1.0.0").unwrap(), Arc::new(EchoPlugin));

        let request = ChatRequest {
            model: "echo:v1".into(),
            messages: vec![Message::text(Role::User, "hi")],
            stream: false,
            tools: None,
            temperature: None,
            max_tokens: None,
            metadata: None,
            tool_connections: None,
        };

        let response = client.chat(request, None).await.unwrap();
        assert_eq!(response.message.text_content(), "hello");
    }

    #[tokio::test]
    async fn chat_allows_model_absent_from_registry() {
        // Model metadata is advisory (spec §4.H step 2): dispatch must not
        // fail just because nothing was registered under this model id, as
        // long as a plugin exists for the provider and accepts the model.
        let client = BridgeClient::new(Arc::new(StubRuntime));
        client.register_provider("echo", Version::parse("1.0.0").unwrap(), Arc::new(EchoPlugin));
        assert!(!client.models().has("echo:v1"));

        let request = ChatRequest {
            model: "echo:v1".into(),
            messages: vec![Message::text(Role::User, "hi")],
            stream: false,
            tools: None,
            temperature: None,
            max_tokens: None,
            metadata: None,
            tool_connections: None,
        };

        let response = client.chat(request, None).await.unwrap();
        assert_eq!(response.message.text_content(), "hello");
    }

    #[tokio::test]
    async fn chat_rejects_unknown_model() {
        let client = BridgeClient::new(Arc::new(StubRuntime));
        let request = ChatRequest {
            model: "echo:v1".into(),
            messages: vec![],
            stream: false,
            tools: None,
            temperature: None,
            max_tokens: None,
            metadata: None,
            tool_connections: None,
        };
        assert!(client.chat(request, None).await.is_err());
    }

    #[tokio::test]
    async fn chat_honours_already_cancelled_token() {
        let client = BridgeClient::new(Arc::new(StubRuntime));
        client.models().register(descriptor()).unwrap();
        client.register_provider("echo", Version::parse("1.0.0").unwrap(), Arc::new(EchoPlugin));

        let token = CancellationToken::new();
        token.cancel();

        let request = ChatRequest {
            model: "echo:v1".into(),
            messages: vec![Message::text(Role::User, "hi")],
            stream: false,
            tools: None,
            temperature: None,
            max_tokens: None,
            metadata: None,
            tool_connections: None,
        };

        let err = client.chat(request, Some(token)).await.unwrap_err();
        assert!(matches!(err, LLMError::Cancellation(_)));
    }

    #[test]
    fn convenience_accessors_reflect_registered_state() {
        let client = BridgeClient::new(Arc::new(StubRuntime));
        client.models().register(descriptor()).unwrap();
        client.register_provider("echo", Version::parse("1.0.0").unwrap(), Arc::new(EchoPlugin));

        assert_eq!(client.list_available_providers(), vec!["echo".to_string()]);
        assert_eq!(client.list_available_models(None).len(), 1);
        assert_eq!(client.list_available_models(Some("other")).len(), 0);
        assert!(client.get_model_capabilities("echo:v1").is_some());
        assert!(client.get_model_capabilities("missing:model").is_none());
    }
}
