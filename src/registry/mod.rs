//! Model and provider-plugin registries (components E and F).

pub mod models;
pub mod providers;

pub use models::{ModelCapabilities, ModelDescriptor, ModelRegistry};
pub use providers::ProviderRegistry;
