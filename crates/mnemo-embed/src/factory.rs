//! Provider construction and instance reuse.
//!
//! [`EmbedderFactory`] is the only place provider variants are built. It is
//! an owned registry, passed to whoever needs embedders, that reuses a live
//! instance for an identical [`EmbedderSpec`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CachedEmbedder;
use crate::embedder::{Embedder, SharedEmbedder};
use crate::error::{EmbedError, Result};
use crate::local::LocalEmbedderConfig;
use crate::mock::{DEFAULT_MOCK_DIMENSIONS, MockEmbedder};
use crate::openai::{OpenAiEmbedder, OpenAiEmbedderConfig};
use crate::process::{ProcessEmbedder, ProcessEmbedderConfig};

/// Which provider to build, with its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    Mock { dimensions: usize },
    #[serde(rename = "openai")]
    OpenAi(OpenAiEmbedderConfig),
    Local(LocalEmbedderConfig),
    Process(ProcessEmbedderConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Mock { .. } => "mock",
            ProviderConfig::OpenAi(_) => "openai",
            ProviderConfig::Local(_) => "local",
            ProviderConfig::Process(_) => "process",
        }
    }

    /// Dimensions the built provider will produce.
    pub fn dimensions(&self) -> usize {
        match self {
            ProviderConfig::Mock { dimensions } => *dimensions,
            ProviderConfig::OpenAi(c) => c.effective_dimensions(),
            ProviderConfig::Local(c) => c.dimensions,
            ProviderConfig::Process(c) => c.dimensions,
        }
    }
}

/// A request for an embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderSpec {
    /// Provider to build. `None` means the deterministic mock.
    pub provider: Option<ProviderConfig>,
    /// Wrap the provider in a [`CachedEmbedder`].
    pub cache: bool,
    /// Use the mock when the provider cannot be reached during initialization.
    pub fallback_to_mock: bool,
    /// Mock dimensions when no provider is given.
    pub fallback_dimensions: usize,
}

impl Default for EmbedderSpec {
    fn default() -> Self {
        Self {
            provider: None,
            cache: true,
            fallback_to_mock: true,
            fallback_dimensions: DEFAULT_MOCK_DIMENSIONS,
        }
    }
}

impl EmbedderSpec {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }

    pub fn mock(dimensions: usize) -> Self {
        Self::new(ProviderConfig::Mock { dimensions })
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_fallback(mut self, fallback_to_mock: bool) -> Self {
        self.fallback_to_mock = fallback_to_mock;
        self
    }

    pub fn kind(&self) -> &'static str {
        self.provider.as_ref().map_or("mock", ProviderConfig::kind)
    }

    pub fn dimensions(&self) -> usize {
        self.provider
            .as_ref()
            .map_or(self.fallback_dimensions, ProviderConfig::dimensions)
    }

    /// Registry key: provider kind plus its serialized options.
    pub fn cache_key(&self) -> Result<String> {
        let options = match &self.provider {
            Some(p) => serde_json::to_string(p)?,
            None => format!("{{\"dimensions\":{}}}", self.fallback_dimensions),
        };
        Ok(format!(
            "{}:{}:cache={}:fallback={}",
            self.kind(),
            options,
            self.cache,
            self.fallback_to_mock
        ))
    }
}

/// Registry of live embedders keyed by [`EmbedderSpec::cache_key`].
#[derive(Default)]
pub struct EmbedderFactory {
    instances: Mutex<HashMap<String, SharedEmbedder>>,
}

impl EmbedderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live embedder for `spec`, building and initializing one if
    /// none is cached or the cached one is no longer ready.
    pub async fn create(&self, spec: &EmbedderSpec) -> Result<SharedEmbedder> {
        let key = spec.cache_key()?;
        let mut instances = self.instances.lock().await;

        if let Some(existing) = instances.get(&key) {
            if existing.is_ready() {
                debug!(kind = spec.kind(), "Reusing embedder");
                return Ok(Arc::clone(existing));
            }
            instances.remove(&key);
        }

        let embedder = self.create_new(spec).await?;
        instances.insert(key, Arc::clone(&embedder));
        Ok(embedder)
    }

    /// Build and initialize a fresh embedder without touching the registry.
    pub async fn create_new(&self, spec: &EmbedderSpec) -> Result<SharedEmbedder> {
        let provider = build_provider(spec)?;
        let provider = initialize_or_fallback(provider, spec).await?;

        info!(
            provider = provider.name(),
            dimensions = provider.dimensions(),
            cache = spec.cache,
            "Embedder created"
        );

        if spec.cache {
            Ok(Arc::new(CachedEmbedder::new(provider)))
        } else {
            Ok(provider)
        }
    }

    /// Dispose every cached instance and empty the registry.
    pub async fn dispose_all(&self) {
        let drained: Vec<(String, SharedEmbedder)> =
            self.instances.lock().await.drain().collect();
        for (key, embedder) in drained {
            if let Err(e) = embedder.dispose().await {
                warn!(key = %key, error = %e, "Failed to dispose embedder");
            }
        }
    }

    /// Number of cached instances.
    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn build_provider(spec: &EmbedderSpec) -> Result<SharedEmbedder> {
    let Some(provider) = &spec.provider else {
        return Ok(Arc::new(MockEmbedder::new(spec.fallback_dimensions)));
    };

    match provider {
        ProviderConfig::Mock { dimensions } => Ok(Arc::new(MockEmbedder::new(*dimensions))),
        ProviderConfig::OpenAi(config) => Ok(Arc::new(OpenAiEmbedder::new(config.clone())?)),
        ProviderConfig::Process(config) => Ok(Arc::new(ProcessEmbedder::new(config.clone())?)),
        #[cfg(feature = "local-embeddings")]
        ProviderConfig::Local(config) => Ok(Arc::new(crate::local::LocalEmbedder::new(
            config.clone(),
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        ProviderConfig::Local(config) => {
            if !spec.fallback_to_mock {
                return Err(EmbedError::Configuration(
                    "Local embeddings requested but the 'local-embeddings' feature is not enabled"
                        .to_string(),
                ));
            }
            warn!(
                "Local embeddings requested but 'local-embeddings' feature is not enabled. \
                 Falling back to mock embedder."
            );
            Ok(Arc::new(MockEmbedder::new(config.dimensions)))
        }
    }
}

/// Initialize `provider`; on a transient failure, substitute the mock when allowed.
async fn initialize_or_fallback(
    provider: SharedEmbedder,
    spec: &EmbedderSpec,
) -> Result<SharedEmbedder> {
    match provider.initialize().await {
        Ok(()) => Ok(provider),
        Err(e) if e.is_retryable() && spec.fallback_to_mock => {
            warn!(
                provider = provider.name(),
                error = %e,
                "Embedding provider unavailable. Falling back to mock embedder."
            );
            let mock: SharedEmbedder = Arc::new(MockEmbedder::new(provider.dimensions()));
            mock.initialize().await?;
            Ok(mock)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::embedder::{Lifecycle, ProviderState};

    /// Provider whose initialization always fails transiently.
    struct Unreachable {
        lifecycle: Lifecycle,
    }

    #[async_trait]
    impl Embedder for Unreachable {
        async fn initialize(&self) -> Result<()> {
            self.lifecycle.begin_initialize()?;
            self.lifecycle.finish_initialize(false);
            Err(EmbedError::ProviderUnavailable("connection refused".into()))
        }

        fn state(&self) -> ProviderState {
            self.lifecycle.state()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.lifecycle.ensure_ready()?;
            Ok(vec![0.0; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "unreachable"
        }

        async fn dispose(&self) -> Result<()> {
            self.lifecycle.dispose();
            Ok(())
        }
    }

    fn unreachable() -> SharedEmbedder {
        Arc::new(Unreachable {
            lifecycle: Lifecycle::new("unreachable"),
        })
    }

    #[tokio::test]
    async fn test_create_reuses_live_instance() {
        let factory = EmbedderFactory::new();
        let spec = EmbedderSpec::mock(32);

        let a = factory.create(&spec).await.unwrap();
        let b = factory.create(&spec).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.len().await, 1);
    }

    #[tokio::test]
    async fn test_different_options_get_different_instances() {
        let factory = EmbedderFactory::new();
        let a = factory.create(&EmbedderSpec::mock(32)).await.unwrap();
        let b = factory.create(&EmbedderSpec::mock(64)).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.dimensions(), 32);
        assert_eq!(b.dimensions(), 64);
        assert_eq!(factory.len().await, 2);
    }

    #[tokio::test]
    async fn test_create_new_bypasses_registry() {
        let factory = EmbedderFactory::new();
        let spec = EmbedderSpec::mock(16);
        let cached = factory.create(&spec).await.unwrap();
        let fresh = factory.create_new(&spec).await.unwrap();

        assert!(!Arc::ptr_eq(&cached, &fresh));
        assert_eq!(factory.len().await, 1);
    }

    #[tokio::test]
    async fn test_disposed_instance_is_replaced() {
        let factory = EmbedderFactory::new();
        let spec = EmbedderSpec::mock(16);
        let first = factory.create(&spec).await.unwrap();
        first.dispose().await.unwrap();

        let second = factory.create(&spec).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_ready());
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let factory = EmbedderFactory::new();
        factory.dispose_all().await;

        let embedder = factory.create(&EmbedderSpec::default()).await.unwrap();
        factory.dispose_all().await;

        assert!(factory.is_empty().await);
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbedError::Disposed(_))
        ));
    }

    #[tokio::test]
    async fn test_no_provider_is_mock() {
        let factory = EmbedderFactory::new();
        let embedder = factory
            .create(&EmbedderSpec::default().with_cache(false))
            .await
            .unwrap();
        assert_eq!(embedder.name(), "mock");
        assert_eq!(embedder.dimensions(), DEFAULT_MOCK_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_cache_wraps_provider() {
        let factory = EmbedderFactory::new();
        let embedder = factory.create(&EmbedderSpec::mock(8)).await.unwrap();
        let a = embedder.embed("same").await.unwrap();
        let b = embedder.embed("same").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unreachable_provider_falls_back_to_mock() {
        let spec = EmbedderSpec::default();
        let embedder = initialize_or_fallback(unreachable(), &spec).await.unwrap();
        assert_eq!(embedder.name(), "mock");
        assert_eq!(embedder.dimensions(), 8);
        assert!(embedder.is_ready());
    }

    #[tokio::test]
    async fn test_unreachable_provider_without_fallback_errors() {
        let spec = EmbedderSpec::default().with_fallback(false);
        let err = initialize_or_fallback(unreachable(), &spec)
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_openai_without_key_is_configuration_error() {
        let factory = EmbedderFactory::new();
        let spec = EmbedderSpec::new(ProviderConfig::OpenAi(OpenAiEmbedderConfig::default()));
        assert!(matches!(
            factory.create(&spec).await,
            Err(EmbedError::Configuration(_))
        ));
        assert!(factory.is_empty().await);
    }

    #[test]
    fn test_cache_key_distinguishes_options() {
        let a = EmbedderSpec::mock(8).cache_key().unwrap();
        let b = EmbedderSpec::mock(9).cache_key().unwrap();
        let c = EmbedderSpec::mock(8).with_cache(false).cache_key().unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("mock:"));
    }

    #[test]
    fn test_provider_config_serde() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"kind": "process", "command": "embed", "dimensions": 3}"#)
                .unwrap();
        assert_eq!(config.kind(), "process");
        assert_eq!(config.dimensions(), 3);
    }
}
