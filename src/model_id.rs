//! Opaque `provider:model` identifiers (spec §3).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LLMError;

static MODEL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+:[A-Za-z0-9._-]+$").unwrap());

/// A validated `provider:model` identifier.
///
/// Constructed only through [`ModelId::parse`], which enforces the 3–100
/// character length bound and the `provider:model` shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    provider: String,
    model: String,
}

impl ModelId {
    pub fn parse(raw: &str) -> Result<Self, LLMError> {
        if raw.len() < 3 || raw.len() > 100 {
            return Err(LLMError::Validation(format!(
                "model id must be 3-100 characters, got {}",
                raw.len()
            )));
        }
        if !MODEL_ID_RE.is_match(raw) {
            return Err(LLMError::Validation(format!(
                "model id {raw:?} must match provider:model using [A-Za-z0-9._-]"
            )));
        }
        let (provider, model) = raw.split_once(':').expect("regex guarantees a colon");
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl TryFrom<String> for ModelId {
    type Error = LLMError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModelId::parse(&value)
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.to_string()
    }
}
