//! OpenAI-compatible embeddings API client.
//!
//! Sends whole batches in one round trip to `{base_url}/embeddings`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedder::{Embedder, Lifecycle, ProviderState};
use crate::error::{EmbedError, Result};

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// Configuration for OpenAI embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiEmbedderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Model to use for embeddings.
    pub model: String,
    /// Requested output dimensions. `None` uses the model's native size.
    pub dimensions: Option<usize>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OpenAiEmbedderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            dimensions: None,
            timeout_secs: 60,
        }
    }
}

impl OpenAiEmbedderConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request reduced output dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Output size: explicit override, else the model's native size.
    pub fn effective_dimensions(&self) -> usize {
        if let Some(d) = self.dimensions {
            return d;
        }
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }
}

/// OpenAI embeddings API client.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
    dimensions: usize,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("dimensions", &self.dimensions)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder.
    ///
    /// Fails with [`EmbedError::Configuration`] if the API key is empty.
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EmbedError::Configuration(
                "OpenAI embedding provider requires an API key. \
                 Set OPENAI_API_KEY or configure [embedding.openai] api_key."
                    .to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        let dimensions = config.effective_dimensions();

        Ok(Self {
            client,
            config,
            dimensions,
            lifecycle: Lifecycle::new("openai"),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &OpenAiEmbedderConfig {
        &self.config
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn initialize(&self) -> Result<()> {
        if self.lifecycle.begin_initialize()? {
            self.lifecycle.finish_initialize(true);
            debug!(model = %self.config.model, "OpenAI embedder ready");
        }
        Ok(())
    }

    fn state(&self) -> ProviderState {
        self.lifecycle.state()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Internal("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.lifecycle.ensure_ready()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.dimensions,
        };

        let response = self
            .client
            .post(self.embeddings_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::ProviderUnavailable(format!(
                "Embedding request failed: HTTP {status} - {body}"
            )));
        }

        let result: EmbeddingResponse = response.json().await?;

        if result.data.len() != texts.len() {
            return Err(EmbedError::Serialization(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Sort by index to ensure correct order
        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        let mut vectors = Vec::with_capacity(embeddings.len());
        for item in embeddings {
            if item.embedding.len() != self.dimensions {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }

        debug!(count = vectors.len(), "OpenAI batch embedded");
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle.dispose();
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn ready_embedder(server: &MockServer) -> OpenAiEmbedder {
        let config = OpenAiEmbedderConfig::new("test-key")
            .with_base_url(server.uri())
            .with_dimensions(3);
        let embedder = OpenAiEmbedder::new(config).unwrap();
        embedder.initialize().await.unwrap();
        embedder
    }

    #[test]
    fn test_openai_embedder_config() {
        let config = OpenAiEmbedderConfig::new("test-key");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.effective_dimensions(), 1536);
    }

    #[test]
    fn test_openai_embedder_config_builder() {
        let config = OpenAiEmbedderConfig::new("key")
            .with_base_url("http://custom.api")
            .with_model("text-embedding-3-large");

        assert_eq!(config.base_url, "http://custom.api");
        assert_eq!(config.model, "text-embedding-3-large");
        assert_eq!(config.effective_dimensions(), 3072);
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let err = OpenAiEmbedder::new(OpenAiEmbedderConfig::default()).unwrap_err();
        assert!(matches!(err, EmbedError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_batch_is_one_round_trip_in_index_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"input": ["a", "b"], "dimensions": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = ready_embedder(&server).await;
        let vectors = embedder.embed_batch(&["a", "b"]).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_http_error_is_provider_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder = ready_embedder(&server).await;
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = ready_embedder(&server).await;
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let server = MockServer::start().await;
        let config = OpenAiEmbedderConfig::new("k").with_base_url(server.uri());
        let embedder = OpenAiEmbedder::new(config).unwrap();
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbedError::NotInitialized(_))
        ));
    }
}
