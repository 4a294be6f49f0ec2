//! Model registry (component E): a typed store of model descriptors keyed
//! by `provider:model`, trimmed from the teacher's `ProvidersRegistry`
//! catalog shape down to the fields spec §3 names.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::LLMError;
use crate::model_id::ModelId;

/// Strict capability flags for a model (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub tool_calls: bool,
    pub images: bool,
    pub documents: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<bool>,
    /// Defaults to `false` when absent (spec §9 open question resolution).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_caching: Option<bool>,
}

impl ModelCapabilities {
    pub fn prompt_caching(&self) -> bool {
        self.prompt_caching.unwrap_or(false)
    }
}

/// Metadata describing one registered model.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub capabilities: ModelCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub supported_content_types: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, serde_json::Value>,
}

/// A live, mutable, in-memory store the bridge client owns. Unlike the
/// teacher's `ProvidersRegistry` (a static catalog fetched from models.dev),
/// entries here are registered directly by callers.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, validating its id and forcing `descriptor.id`
    /// to match the registration key.
    pub fn register(&self, mut descriptor: ModelDescriptor) -> Result<(), LLMError> {
        let parsed = ModelId::parse(&descriptor.id)?;
        if let Some(max_tokens) = descriptor.max_tokens {
            if max_tokens == 0 {
                return Err(LLMError::Validation(
                    "max_tokens must be greater than zero when present".into(),
                ));
            }
        }
        let key = parsed.to_string();
        descriptor.id = key.clone();
        self.models
            .write()
            .expect("model registry lock poisoned")
            .insert(key, descriptor);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.models
            .read()
            .expect("model registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.models
            .read()
            .expect("model registry lock poisoned")
            .contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<ModelDescriptor> {
        self.models
            .write()
            .expect("model registry lock poisoned")
            .remove(id)
    }

    /// Removes `id`, reporting whether an entry was actually present.
    pub fn unregister(&self, id: &str) -> bool {
        self.remove(id).is_some()
    }

    /// All descriptors, or only those belonging to `provider` when given.
    pub fn list(&self, provider: Option<&str>) -> Vec<ModelDescriptor> {
        self.models
            .read()
            .expect("model registry lock poisoned")
            .values()
            .filter(|d| provider.map_or(true, |p| d.provider == p))
            .cloned()
            .collect()
    }

    /// All descriptors where a boolean capability is `true`, or where an
    /// optional numeric/object capability is present (non-absent).
    pub fn get_by_capability(&self, capability: &str) -> Vec<ModelDescriptor> {
        self.models
            .read()
            .expect("model registry lock poisoned")
            .values()
            .filter(|d| match capability {
                "streaming" => d.capabilities.streaming,
                "toolCalls" | "tool_calls" => d.capabilities.tool_calls,
                "images" => d.capabilities.images,
                "documents" => d.capabilities.documents,
                "temperature" => d.capabilities.temperature.is_some(),
                "promptCaching" | "prompt_caching" => d.capabilities.prompt_caching.is_some(),
                "maxTokens" | "max_tokens" => d.max_tokens.is_some(),
                _ => false,
            })
            .cloned()
            .collect()
    }
}
