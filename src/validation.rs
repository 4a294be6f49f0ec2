//! Schema-driven boundary validation (component I).
//!
//! Uses `schemars` to derive JSON Schema for externally-visible
//! request/config shapes and `jsonschema` to compile and evaluate it once
//! per shape. Both crates already sit in the teacher's dependency graph
//! (gated there behind its `mcp` feature); here they're load-bearing.

use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde_json::Value;

use crate::error::LLMError;

/// A compiled schema validator for one externally-visible shape `T`.
pub struct SchemaValidator {
    compiled: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn for_type<T: JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        let schema_value = serde_json::to_value(schema).expect("schema always serializes");
        let compiled = jsonschema::validator_for(&schema_value)
            .expect("derived schema must compile");
        Self { compiled }
    }

    pub fn validate(&self, value: &Value) -> Result<(), LLMError> {
        let errors: Vec<String> = self
            .compiled
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LLMError::Validation(errors.join("; ")))
        }
    }
}

static MCP_SERVER_CONFIG_SCHEMA: Lazy<SchemaValidator> =
    Lazy::new(SchemaValidator::for_type::<crate::toolcall::config::RawMcpServerConfig>);

/// Validates a raw MCP server config JSON value against its derived
/// schema, ahead of the field-level XOR check in
/// [`crate::toolcall::config::validate_server_config`].
pub fn validate_mcp_server_config_shape(value: &Value) -> Result<(), LLMError> {
    MCP_SERVER_CONFIG_SCHEMA.validate(value)
}

static MESSAGE_SCHEMA: Lazy<SchemaValidator> =
    Lazy::new(SchemaValidator::for_type::<crate::message::Message>);

/// Validates a single message JSON value against its derived schema.
pub fn validate_message_shape(value: &Value) -> Result<(), LLMError> {
    MESSAGE_SCHEMA.validate(value)
}

static CHAT_REQUEST_SCHEMA: Lazy<SchemaValidator> =
    Lazy::new(SchemaValidator::for_type::<crate::bridge::request::ChatRequest>);

/// Validates an incoming chat request against its derived schema, the first
/// step of the bridge client's dispatch algorithm (spec §4.H step 1).
pub fn validate_chat_request_shape(value: &Value) -> Result<(), LLMError> {
    CHAT_REQUEST_SCHEMA.validate(value)
}
