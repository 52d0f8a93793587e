//! Wiring from loaded configuration to a ready [`MemoryService`].

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use mnemo_config::{
    EmbeddingConfig, LlmConfig, MnemoConfig, OPENAI_API_KEY_ENV, PolicyConfig, ProviderKind,
    StoreBackend, StoreConfig, resolve_api_key,
};
use mnemo_embed::{
    DEFAULT_MAX_CONCURRENCY, EmbedderFactory, EmbedderSpec, LocalEmbedderConfig,
    OpenAiEmbedderConfig, ProcessEmbedderConfig, ProviderConfig,
};
use mnemo_service::{
    ChatCompletionClient, ChatCompletionConfig, ChatCompletionFilter, ChatCompletionTransform,
    MemoryService, ServicePolicy,
};
use mnemo_store::{BackendKind, open_store};

/// A service plus the factory that owns its embedder.
pub struct App {
    pub service: MemoryService,
    factory: EmbedderFactory,
}

impl App {
    /// Open the configured store and provider.
    pub async fn build(config: &MnemoConfig) -> Result<Self> {
        let spec = embedder_spec(&config.embedding())?;
        let backend = backend_kind(&config.store())?;
        let store = open_store(&backend, spec.dimensions()).context("Failed to open store")?;

        let factory = EmbedderFactory::new();
        let mut service = MemoryService::from_factory(store, &factory, &spec)
            .await
            .context("Failed to initialize memory service")?
            .with_policy(service_policy(&config.policy()));

        if let Some(ref llm) = config.llm {
            let client = chat_client(llm)?;
            service = service
                .with_transform(Arc::new(ChatCompletionTransform::new(client.clone())))
                .with_filter(Arc::new(ChatCompletionFilter::new(client)));
        }

        Ok(Self { service, factory })
    }

    /// Release provider resources.
    pub async fn shutdown(self) {
        self.factory.dispose_all().await;
    }

    /// Shut down, then hand back the outcome of the work done with the app.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        self.shutdown().await;
        result
    }
}

/// Translate `[embedding]` into a factory request.
pub fn embedder_spec(embedding: &EmbeddingConfig) -> Result<EmbedderSpec> {
    let dimensions = embedding.effective_dimensions();
    let max_concurrency = embedding.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY);

    let provider = match embedding.provider {
        ProviderKind::Mock => ProviderConfig::Mock { dimensions },
        ProviderKind::OpenAi => {
            let section = embedding.openai.clone().unwrap_or_default();
            let api_key = resolve_api_key(section.api_key.as_deref(), OPENAI_API_KEY_ENV)
                .map(|s| {
                    debug!(source = ?s.source, "Resolved OpenAI API key");
                    s.value
                })
                .unwrap_or_default();
            if api_key.is_empty() {
                warn!("No OpenAI API key in config or {}", OPENAI_API_KEY_ENV);
            }
            let mut openai = OpenAiEmbedderConfig::new(api_key);
            if let Some(url) = section.base_url {
                openai = openai.with_base_url(url);
            }
            if let Some(ref model) = embedding.model {
                openai = openai.with_model(model.clone());
            }
            ProviderConfig::OpenAi(openai.with_dimensions(dimensions))
        }
        ProviderKind::Local => {
            let section = embedding.local.clone().unwrap_or_default();
            let defaults = LocalEmbedderConfig::default();
            ProviderConfig::Local(LocalEmbedderConfig {
                model_path: section.model_path,
                tokenizer_path: section.tokenizer_path,
                dimensions,
                threads: section.threads.unwrap_or(defaults.threads),
                max_concurrency,
            })
        }
        ProviderKind::Process => {
            let section = embedding.require_process()?;
            let mut process = ProcessEmbedderConfig::new(section.command.clone(), dimensions);
            process.args = section.args.clone();
            process.max_concurrency = max_concurrency;
            if section.timeout_secs.is_some() {
                process.timeout_secs = section.timeout_secs;
            }
            ProviderConfig::Process(process)
        }
    };

    Ok(EmbedderSpec::new(provider)
        .with_cache(embedding.cache)
        .with_fallback(embedding.fallback_to_mock))
}

/// Translate `[store]` into a backend choice.
pub fn backend_kind(store: &StoreConfig) -> Result<BackendKind> {
    Ok(match store.backend {
        StoreBackend::Memory => BackendKind::Memory,
        StoreBackend::Sqlite => BackendKind::Sqlite {
            path: store.effective_path()?,
        },
    })
}

pub fn service_policy(policy: &PolicyConfig) -> ServicePolicy {
    let defaults = ServicePolicy::default();
    ServicePolicy {
        strip_pii_by_default: policy.strip_pii_by_default,
        filter_by_default: policy.filter_by_default,
        default_importance: policy
            .default_importance
            .unwrap_or(defaults.default_importance),
        default_limit: policy.default_limit.unwrap_or(defaults.default_limit),
    }
}

fn chat_client(llm: &LlmConfig) -> Result<ChatCompletionClient> {
    let api_key =
        resolve_api_key(llm.api_key.as_deref(), OPENAI_API_KEY_ENV).map(|s| s.value);
    let mut config = ChatCompletionConfig::new(api_key);
    if let Some(ref url) = llm.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(ref model) = llm.model {
        config = config.with_model(model.clone());
    }
    Ok(ChatCompletionClient::new(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_config::{OpenAiSection, ProcessSection};

    #[test]
    fn test_default_config_is_mock() {
        let spec = embedder_spec(&EmbeddingConfig::default()).unwrap();
        assert_eq!(spec.kind(), "mock");
        assert_eq!(spec.dimensions(), 384);
        assert!(spec.cache);
        assert!(spec.fallback_to_mock);
    }

    #[test]
    fn test_openai_spec_uses_config_key() {
        let embedding = EmbeddingConfig {
            provider: ProviderKind::OpenAi,
            model: Some("text-embedding-3-large".into()),
            openai: Some(OpenAiSection {
                api_key: Some("sk-config".into()),
                base_url: Some("http://localhost:9999/v1".into()),
            }),
            ..Default::default()
        };
        let spec = embedder_spec(&embedding).unwrap();
        let Some(ProviderConfig::OpenAi(openai)) = spec.provider else {
            panic!("expected openai provider");
        };
        assert_eq!(openai.api_key, "sk-config");
        assert_eq!(openai.base_url, "http://localhost:9999/v1");
        assert_eq!(openai.effective_dimensions(), 3072);
    }

    #[test]
    fn test_process_requires_section() {
        let mut embedding = EmbeddingConfig {
            provider: ProviderKind::Process,
            dimensions: Some(8),
            ..Default::default()
        };
        assert!(embedder_spec(&embedding).is_err());

        embedding.process = Some(ProcessSection {
            command: "embed".into(),
            args: vec!["--json".into()],
            timeout_secs: Some(5),
        });
        let spec = embedder_spec(&embedding).unwrap();
        let Some(ProviderConfig::Process(process)) = spec.provider else {
            panic!("expected process provider");
        };
        assert_eq!(process.dimensions, 8);
        assert_eq!(process.args, vec!["--json"]);
        assert_eq!(process.timeout_secs, Some(5));
    }

    #[test]
    fn test_policy_defaults_fill_gaps() {
        let policy = service_policy(&PolicyConfig {
            default_limit: Some(3),
            ..Default::default()
        });
        assert_eq!(policy.default_limit, 3);
        assert_eq!(policy.default_importance, ServicePolicy::default().default_importance);
    }

    fn in_memory_config() -> MnemoConfig {
        MnemoConfig::from_toml("[store]\nbackend = \"memory\"\n").unwrap()
    }

    #[test]
    fn test_default_store_is_sqlite() {
        let backend = backend_kind(&StoreConfig {
            path: Some("/tmp/mnemo-default.db".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(backend, BackendKind::Sqlite { .. }));
    }

    #[tokio::test]
    async fn test_build_in_memory_app() {
        let app = App::build(&in_memory_config()).await.unwrap();
        assert_eq!(app.service.embedder().dimensions(), 384);
        assert_eq!(app.service.stats().unwrap().backend, "memory");
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_finish_disposes_even_on_error() {
        let app = App::build(&in_memory_config()).await.unwrap();
        let embedder = app.service.embedder().clone();

        let result: Result<()> = app.finish(Err(anyhow::anyhow!("command failed"))).await;
        assert_eq!(result.unwrap_err().to_string(), "command failed");
        assert_eq!(embedder.state(), mnemo_embed::ProviderState::Disposed);
    }
}
