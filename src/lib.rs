//! A provider-agnostic client library for LLM chat services.
//!
//! Callers hand this crate a typed request (model id, messages, optional
//! tools, optional streaming flag, optional cancellation handle) and get
//! back either a completed assistant message or a lazy sequence of
//! streaming deltas. Behind that interface: per-provider HTTP/JSON dialects
//! (the plugin contract in [`plugin`]), model capability bookkeeping
//! ([`registry`]), cooperative-cancellation stream multiplexing
//! ([`cancel`] and [`stream`]), and a JSON-RPC 2.0 tool-call loop over
//! local subprocesses or remote HTTP servers ([`toolcall`]).

pub mod bridge;
pub mod cancel;
pub mod error;
pub mod message;
pub mod model_id;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod stream;
pub mod toolcall;
pub mod validation;

pub use bridge::request::{ChatRequest, ChatResponse, HttpRequestDescriptor, ToolDescriptor};
pub use bridge::BridgeClient;
pub use error::LLMError;
pub use message::{ContentPart, Message, Role, StreamDelta, ToolCall, ToolResult};
pub use model_id::ModelId;
pub use plugin::ProviderPlugin;
pub use registry::{ModelCapabilities, ModelDescriptor, ModelRegistry, ProviderRegistry};
pub use runtime::native::NativeRuntime;
pub use runtime::PlatformRuntime;
