//! Provider-plugin registry (component F): plugins keyed by `(id, semver)`,
//! with semver-sorted listing and latest-version resolution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use semver::Version;

use crate::error::LLMError;
use crate::plugin::ProviderPlugin;

#[derive(Default)]
pub struct ProviderRegistry {
    plugins: RwLock<HashMap<(String, Version), Arc<dyn ProviderPlugin>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin keyed by `(id, version)`. A duplicate key
    /// overwrites the existing entry; a malformed version string is
    /// rejected by the caller before this is invoked (`version` is already
    /// a parsed [`Version`]).
    pub fn register(&self, id: impl Into<String>, version: Version, plugin: Arc<dyn ProviderPlugin>) {
        self.plugins
            .write()
            .expect("provider registry lock poisoned")
            .insert((id.into(), version), plugin);
    }

    /// Registers from a raw semver string, surfacing a parse failure as a
    /// validation error rather than panicking.
    pub fn register_str(
        &self,
        id: impl Into<String>,
        version: &str,
        plugin: Arc<dyn ProviderPlugin>,
    ) -> Result<(), LLMError> {
        let parsed = Version::parse(version)
            .map_err(|e| LLMError::Validation(format!("invalid plugin version {version:?}: {e}")))?;
        self.register(id, parsed, plugin);
        Ok(())
    }

    pub fn get(&self, id: &str, version: &Version) -> Option<Arc<dyn ProviderPlugin>> {
        self.plugins
            .read()
            .expect("provider registry lock poisoned")
            .get(&(id.to_string(), version.clone()))
            .cloned()
    }

    /// Exact match when `version` is given, else the latest registered
    /// version of `id` (spec §4.F `get(id, version?)`).
    pub fn get_or_latest(&self, id: &str, version: Option<&Version>) -> Option<Arc<dyn ProviderPlugin>> {
        match version {
            Some(v) => self.get(id, v),
            None => self.latest(id),
        }
    }

    pub fn get_latest(&self, id: &str) -> Option<Arc<dyn ProviderPlugin>> {
        self.latest(id)
    }

    /// Existence by exact `(id, version)` key, or by `id` alone when
    /// `version` is omitted.
    pub fn has(&self, id: &str, version: Option<&Version>) -> bool {
        match version {
            Some(v) => self.get(id, v).is_some(),
            None => !self.versions(id).is_empty(),
        }
    }

    /// All registered plugins, or all versions of one `id` when given.
    pub fn list(&self, id: Option<&str>) -> Vec<Arc<dyn ProviderPlugin>> {
        self.plugins
            .read()
            .expect("provider registry lock poisoned")
            .iter()
            .filter(|((plugin_id, _), _)| id.map_or(true, |wanted| plugin_id == wanted))
            .map(|(_, plugin)| plugin.clone())
            .collect()
    }

    /// Removes the exact `(id, version)` key, or every version of `id` when
    /// `version` is omitted. Returns whether anything was removed.
    pub fn unregister(&self, id: &str, version: Option<&Version>) -> bool {
        let mut plugins = self.plugins.write().expect("provider registry lock poisoned");
        match version {
            Some(v) => plugins.remove(&(id.to_string(), v.clone())).is_some(),
            None => {
                let keys: Vec<_> = plugins
                    .keys()
                    .filter(|(plugin_id, _)| plugin_id == id)
                    .cloned()
                    .collect();
                let removed = !keys.is_empty();
                for key in keys {
                    plugins.remove(&key);
                }
                removed
            }
        }
    }

    /// Every version registered for `id`, ascending by semver precedence.
    pub fn versions(&self, id: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .plugins
            .read()
            .expect("provider registry lock poisoned")
            .keys()
            .filter(|(plugin_id, _)| plugin_id == id)
            .map(|(_, version)| version.clone())
            .collect();
        versions.sort();
        versions
    }

    /// Version strings for `id` in descending semver order (spec §4.F
    /// `getVersions`), e.g. `["2.1.0", "1.5.0", "1.0.0"]`.
    pub fn get_versions(&self, id: &str) -> Vec<Version> {
        let mut versions = self.versions(id);
        versions.reverse();
        versions
    }

    /// The highest-precedence version registered for `id`, if any.
    pub fn latest(&self, id: &str) -> Option<Arc<dyn ProviderPlugin>> {
        let version = self.versions(id).into_iter().next_back()?;
        self.get(id, &version)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .plugins
            .read()
            .expect("provider registry lock poisoned")
            .keys()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::request::HttpRequestDescriptor;
    use crate::message::{Message, StreamDelta};
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct StubPlugin;

    #[async_trait]
    impl ProviderPlugin for StubPlugin {
        fn id(&self) -> &str {
            "stub"
        }

        fn translate_request(
            &self,
            _model: &str,
            _messages: &[Message],
            _stream: bool,
        ) -> Result<HttpRequestDescriptor, LLMError> {
            unimplemented!("not exercised in this test")
        }

        fn parse_response(&self, _body: &[u8]) -> Result<Message, LLMError> {
            unimplemented!("not exercised in this test")
        }

        fn parse_stream_delta(&self, _chunk: &[u8]) -> Result<Option<StreamDelta>, LLMError> {
            unimplemented!("not exercised in this test")
        }

        fn normalize_error(&self, status: u16, _body: &[u8]) -> LLMError {
            LLMError::Provider(format!("stub status {status}"))
        }
    }

    #[test]
    fn latest_picks_highest_semver() {
        let registry = ProviderRegistry::new();
        registry
            .register_str("stub", "1.0.0", Arc::new(StubPlugin))
            .unwrap();
        registry
            .register_str("stub", "1.2.0", Arc::new(StubPlugin))
            .unwrap();
        registry
            .register_str("stub", "1.1.9", Arc::new(StubPlugin))
            .unwrap();

        let versions = registry.versions("stub");
        assert_eq!(
            versions,
            vec![
                Version::parse("1.0.0").unwrap(),
                Version::parse("1.1.9").unwrap(),
                Version::parse("1.2.0").unwrap(),
            ]
        );
        assert!(registry.latest("stub").is_some());
    }

    #[test]
    fn register_str_rejects_malformed_semver() {
        let registry = ProviderRegistry::new();
        assert!(registry
            .register_str("stub", "not-a-version", Arc::new(StubPlugin))
            .is_err());
    }

    #[test]
    fn duplicate_key_overwrites() {
        let registry = ProviderRegistry::new();
        registry
            .register_str("stub", "1.0.0", Arc::new(StubPlugin))
            .unwrap();
        registry
            .register_str("stub", "1.0.0", Arc::new(StubPlugin))
            .unwrap();
        assert_eq!(registry.versions("stub").len(), 1);
    }

    #[test]
    fn get_versions_is_descending() {
        let registry = ProviderRegistry::new();
        registry.register_str("p", "1.0.0", Arc::new(StubPlugin)).unwrap();
        registry.register_str("p", "1.5.0", Arc::new(StubPlugin)).unwrap();
        registry.register_str("p", "2.1.0", Arc::new(StubPlugin)).unwrap();

        assert_eq!(
            registry.get_versions("p"),
            vec![
                Version::parse("2.1.0").unwrap(),
                Version::parse("1.5.0").unwrap(),
                Version::parse("1.0.0").unwrap(),
            ]
        );
        assert_eq!(
            registry.get_latest("p").is_some(),
            registry.get_or_latest("p", None).is_some()
        );
    }

    #[test]
    fn has_and_unregister_by_id_and_version() {
        let registry = ProviderRegistry::new();
        registry.register_str("p", "1.0.0", Arc::new(StubPlugin)).unwrap();
        registry.register_str("p", "2.0.0", Arc::new(StubPlugin)).unwrap();

        assert!(registry.has("p", None));
        assert!(registry.has("p", Some(&Version::parse("1.0.0").unwrap())));
        assert!(!registry.has("p", Some(&Version::parse("9.9.9").unwrap())));

        assert!(registry.unregister("p", Some(&Version::parse("1.0.0").unwrap())));
        assert_eq!(registry.list(Some("p")).len(), 1);

        assert!(registry.unregister("p", None));
        assert!(!registry.has("p", None));
        assert!(!registry.unregister("p", None));
    }

    #[test]
    fn list_without_id_returns_every_plugin() {
        let registry = ProviderRegistry::new();
        registry.register_str("a", "1.0.0", Arc::new(StubPlugin)).unwrap();
        registry.register_str("b", "1.0.0", Arc::new(StubPlugin)).unwrap();
        assert_eq!(registry.list(None).len(), 2);
        assert_eq!(registry.list(Some("a")).len(), 1);
    }
}
