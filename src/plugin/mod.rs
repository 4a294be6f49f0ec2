//! Provider-plugin contract (component G).
//!
//! Directly generalizes the teacher's `chat::http::HTTPChatProvider`
//! two-method shape (`chat_request`/`parse_chat`) to the four-operation
//! contract: translate a request, parse a completed response, parse one
//! streaming delta, and normalize a non-2xx status into an [`LLMError`].
//! The optional caching trio is queried the same way the teacher's
//! `handle_http_error!` macro centralizes HTTP-error mapping, generalized
//! here so every plugin maps errors the same way instead of each call site
//! hand-rolling status-code branches.

use async_trait::async_trait;

use crate::bridge::request::HttpRequestDescriptor;
use crate::error::LLMError;
use crate::message::{Message, StreamDelta};

/// A single provider's HTTP/JSON dialect, hidden behind a uniform contract.
///
/// Implementations are registered into a [`crate::registry::ProviderRegistry`]
/// keyed by `(id, version)`. Every method is synchronous: plugins describe
/// what to send and how to interpret what comes back, but never perform I/O
/// themselves — that's the platform runtime's job (component A), so a
/// plugin can be exercised in tests without a network.
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// Stable identifier this plugin registers under, e.g. `"openai"`.
    fn id(&self) -> &str;

    /// Builds the HTTP request for one chat turn.
    fn translate_request(
        &self,
        model: &str,
        messages: &[Message],
        stream: bool,
    ) -> Result<HttpRequestDescriptor, LLMError>;

    /// Parses a completed (non-streaming) response body into a [`Message`].
    fn parse_response(&self, body: &[u8]) -> Result<Message, LLMError>;

    /// Parses one chunk of a streaming response into a delta, if the chunk
    /// carries one (some provider wire formats emit keep-alive chunks that
    /// carry nothing).
    fn parse_stream_delta(&self, chunk: &[u8]) -> Result<Option<StreamDelta>, LLMError>;

    /// Maps a non-2xx status and body into a typed [`LLMError`].
    fn normalize_error(&self, status: u16, body: &[u8]) -> LLMError;

    /// Capability check consulted by the bridge client before dispatch
    /// (spec §4.H step 3): does this plugin serve `model_id`? The default
    /// accepts any id whose `provider:` prefix matches [`Self::id`];
    /// plugins that only serve a subset of their provider's models should
    /// override this.
    fn supports_model(&self, model_id: &str) -> bool {
        model_id
            .split_once(':')
            .is_some_and(|(provider, _)| provider == self.id())
    }

    /// Whether this plugin's provider supports prompt caching.
    fn supports_caching(&self) -> bool {
        false
    }

    /// Extra headers to attach when caching is requested. Only consulted
    /// when [`Self::supports_caching`] returns `true`.
    fn cache_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Marks which messages should be flagged cacheable before translation,
    /// returning the (possibly annotated) message list. The default is a
    /// no-op passthrough.
    fn mark_for_caching(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
    }
}

/// Merges a plugin's cache headers into an outgoing request, but only when
/// the plugin actually opts into caching (spec §4.G): `supports_caching()`
/// must return `true` and `cache_headers()` must yield at least one header,
/// alongside `mark_for_caching()` having already run over the messages
/// earlier in the pipeline. A plugin using the caching trio's defaults is
/// untouched.
pub fn apply_cache_headers(
    plugin: &dyn ProviderPlugin,
    descriptor: crate::bridge::request::HttpRequestDescriptor,
) -> crate::bridge::request::HttpRequestDescriptor {
    if !plugin.supports_caching() {
        return descriptor;
    }
    let headers = plugin.cache_headers();
    if headers.is_empty() {
        return descriptor;
    }
    descriptor.with_extra_headers(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPlugin;

    #[async_trait]
    impl ProviderPlugin for NoopPlugin {
        fn id(&self) -> &str {
            "noop"
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
            Ok(Message::text(crate::message::Role::Assistant, ""))
        }

        fn parse_stream_delta(&self, _chunk: &[u8]) -> Result<Option<StreamDelta>, LLMError> {
            Ok(None)
        }

        fn normalize_error(&self, status: u16, _body: &[u8]) -> LLMError {
            LLMError::Provider(format!("noop status {status}"))
        }
    }

    #[test]
    fn default_caching_trio_is_inert() {
        let plugin = NoopPlugin;
        assert!(!plugin.supports_caching());
        assert!(plugin.cache_headers().is_empty());
        let messages = vec![Message::text(crate::message::Role::User, "hi")];
        assert_eq!(plugin.mark_for_caching(messages.clone()), messages);
    }

    struct CachingPlugin;

    #[async_trait]
    impl ProviderPlugin for CachingPlugin {
        fn id(&self) -> &str {
            "caching"
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
            Ok(Message::text(crate::message::Role::Assistant, ""))
        }

        fn parse_stream_delta(&self, _chunk: &[u8]) -> Result<Option<StreamDelta>, LLMError> {
            Ok(None)
        }

        fn normalize_error(&self, status: u16, _body: &[u8]) -> LLMError {
            LLMError::Provider(format!("caching status {status}"))
        }

        fn supports_caching(&self) -> bool {
            true
        }

        fn cache_headers(&self) -> Vec<(String, String)> {
            vec![("cache-control".into(), "ephemeral".into())]
        }
    }

    #[test]
    fn apply_cache_headers_merges_when_plugin_opts_in() {
        let plugin = CachingPlugin;
        let descriptor = plugin.translate_request("caching:v1", &[], false).unwrap();
        let merged = apply_cache_headers(&plugin, descriptor);
        assert!(merged
            .headers
            .iter()
            .any(|(k, v)| k == "cache-control" && v == "ephemeral"));
    }

    #[test]
    fn apply_cache_headers_is_noop_for_non_caching_plugin() {
        let plugin = NoopPlugin;
        let descriptor = plugin.translate_request("noop:v1", &[], false).unwrap();
        let merged = apply_cache_headers(&plugin, descriptor.clone());
        assert_eq!(merged.headers, descriptor.headers);
    }
}
