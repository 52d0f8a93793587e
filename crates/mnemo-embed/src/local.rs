//! Local embeddings using ONNX Runtime.
//!
//! [`LocalEmbedderConfig`] is always available so configuration can name the
//! provider. The embedder itself requires the `local-embeddings` feature.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::embedder::DEFAULT_MAX_CONCURRENCY;
use crate::error::{EmbedError, Result};

/// Configuration for the local ONNX embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalEmbedderConfig {
    /// Path to the ONNX model. Defaults to `<data_dir>/mnemo/models/embeddings/model.onnx`.
    pub model_path: Option<PathBuf>,
    /// Path to `tokenizer.json`. Defaults to the model directory.
    pub tokenizer_path: Option<PathBuf>,
    /// Output embedding dimensions.
    pub dimensions: usize,
    /// Intra-op threads for the ONNX session.
    pub threads: usize,
    /// Concurrent single-text calls during batch fan-out.
    pub max_concurrency: usize,
}

impl Default for LocalEmbedderConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            tokenizer_path: None,
            dimensions: 384,
            threads: 1,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl LocalEmbedderConfig {
    /// Resolve model and tokenizer paths, falling back to the default model directory.
    ///
    /// Fails with [`EmbedError::Configuration`] when either file is missing.
    pub fn resolve_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let default_dir = default_local_model_dir();
        let model_path = self
            .model_path
            .clone()
            .or_else(|| default_dir.as_ref().map(|d| d.join("model.onnx")))
            .ok_or_else(|| {
                EmbedError::Configuration("No local model path configured".to_string())
            })?;
        let tokenizer_path = self
            .tokenizer_path
            .clone()
            .or_else(|| model_path.parent().map(|d| d.join("tokenizer.json")))
            .ok_or_else(|| {
                EmbedError::Configuration("No local tokenizer path configured".to_string())
            })?;

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(EmbedError::Configuration(format!(
                    "Local embedding file not found: {}. \
                     Download an all-MiniLM-L6-v2 ONNX export to ~/.local/share/mnemo/models/embeddings/",
                    path.display()
                )));
            }
        }
        Ok((model_path, tokenizer_path))
    }
}

/// Default directory for local embedding model files.
pub fn default_local_model_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("mnemo").join("models").join("embeddings"))
}

/// Mean-pool a `(1, seq_len, hidden)` token output over the attention mask and
/// L2-normalize the result.
#[cfg_attr(not(feature = "local-embeddings"), allow(dead_code))]
fn mean_pool(shape: &[i64], data: &[f32], mask: &[i64], dimensions: usize) -> Result<Vec<f32>> {
    let hidden = shape
        .get(2)
        .ok_or_else(|| EmbedError::Internal(format!("Bad output shape: {shape:?}")))?;
    let hidden = usize::try_from(*hidden)
        .map_err(|e| EmbedError::Internal(format!("Bad output shape: {e}")))?;
    if hidden == 0 {
        return Err(EmbedError::Internal("Model output has no hidden units".to_string()));
    }
    if hidden != dimensions {
        return Err(EmbedError::DimensionMismatch {
            expected: dimensions,
            actual: hidden,
        });
    }
    if data.len() < mask.len() * hidden {
        return Err(EmbedError::Internal(format!(
            "Output has {} values, expected {}",
            data.len(),
            mask.len() * hidden
        )));
    }

    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;
    for (row, &m) in data.chunks_exact(hidden).zip(mask) {
        if m > 0 {
            for (acc, v) in sum.iter_mut().zip(row) {
                *acc += v;
            }
            count += 1.0;
        }
    }
    if count > 0.0 {
        for v in &mut sum {
            *v /= count;
        }
    }

    Ok(crate::vector::normalize(&sum))
}

#[cfg(feature = "local-embeddings")]
pub use onnx::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod onnx {
    use std::path::PathBuf;
    use std::sync::Arc;

    use async_trait::async_trait;
    use ort::session::Session;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use tokenizers::Tokenizer;
    use tracing::{debug, info};

    use super::LocalEmbedderConfig;
    use crate::embedder::{Embedder, Lifecycle, ProviderState};
    use crate::error::{EmbedError, Result};

    struct Runtime {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
    }

    /// Local embedder using ONNX Runtime.
    ///
    /// The session is loaded in `initialize()` and held until `dispose()`.
    /// Each `embed` runs one inference on the blocking pool; batches fan out
    /// through the bounded pool.
    pub struct LocalEmbedder {
        config: LocalEmbedderConfig,
        model_path: PathBuf,
        tokenizer_path: PathBuf,
        runtime: Mutex<Option<Arc<Runtime>>>,
        lifecycle: Lifecycle,
    }

    impl std::fmt::Debug for LocalEmbedder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LocalEmbedder")
                .field("model_path", &self.model_path)
                .field("dimensions", &self.config.dimensions)
                .field("state", &self.lifecycle.state())
                .finish_non_exhaustive()
        }
    }

    impl LocalEmbedder {
        /// Create a local embedder. Model files must exist; nothing is loaded yet.
        pub fn new(config: LocalEmbedderConfig) -> Result<Self> {
            let (model_path, tokenizer_path) = config.resolve_paths()?;
            Ok(Self {
                config,
                model_path,
                tokenizer_path,
                runtime: Mutex::new(None),
                lifecycle: Lifecycle::new("local"),
            })
        }

        fn load(&self) -> Result<Runtime> {
            let unavailable = |e: &dyn std::fmt::Display| {
                EmbedError::ProviderUnavailable(format!(
                    "Failed to load ONNX model from {}: {e}",
                    self.model_path.display()
                ))
            };
            let session = Session::builder()
                .map_err(|e| unavailable(&e))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| unavailable(&e))?
                .with_intra_threads(self.config.threads.max(1))
                .map_err(|e| unavailable(&e))?
                .commit_from_file(&self.model_path)
                .map_err(|e| unavailable(&e))?;

            let tokenizer = Tokenizer::from_file(&self.tokenizer_path).map_err(|e| {
                EmbedError::ProviderUnavailable(format!(
                    "Failed to load tokenizer from {}: {e}",
                    self.tokenizer_path.display()
                ))
            })?;

            Ok(Runtime {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        fn runtime(&self) -> Result<Arc<Runtime>> {
            self.lifecycle.ensure_ready()?;
            self.runtime
                .lock()
                .clone()
                .ok_or_else(|| EmbedError::NotInitialized("local".to_string()))
        }
    }

    /// Tokenize, run the model, then mean-pool over the attention mask and L2-normalise.
    fn infer(runtime: &Runtime, text: &str, dimensions: usize) -> Result<Vec<f32>> {
        let encoding = runtime
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Internal(format!("Tokenization failed: {e}")))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&v| i64::from(v)).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&v| i64::from(v))
            .collect();
        let types: Vec<i64> = encoding.get_type_ids().iter().map(|&v| i64::from(v)).collect();
        let seq_len = ids.len();

        let tensor = |data: Vec<i64>| {
            Tensor::from_array(([1usize, seq_len], data))
                .map_err(|e| EmbedError::Internal(format!("Input error: {e}")))
        };
        let input_ids = tensor(ids)?;
        let attention_mask = tensor(mask.clone())?;
        let token_type_ids = tensor(types)?;

        let mut session = runtime.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| EmbedError::ProviderUnavailable(format!("ONNX inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Internal(format!("Output extraction failed: {e}")))?;

        super::mean_pool(&shape[..], data, &mask, dimensions)
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        async fn initialize(&self) -> Result<()> {
            if !self.lifecycle.begin_initialize()? {
                return Ok(());
            }
            match self.load() {
                Ok(runtime) => {
                    *self.runtime.lock() = Some(Arc::new(runtime));
                    self.lifecycle.finish_initialize(true);
                    info!(model = %self.model_path.display(), "Local embedder loaded");
                    Ok(())
                }
                Err(e) => {
                    self.lifecycle.finish_initialize(false);
                    Err(e)
                }
            }
        }

        fn state(&self) -> ProviderState {
            self.lifecycle.state()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let runtime = self.runtime()?;
            let text = text.to_string();
            let dimensions = self.config.dimensions;
            tokio::task::spawn_blocking(move || infer(&runtime, &text, dimensions))
                .await
                .map_err(|e| EmbedError::Internal(format!("Inference task failed: {e}")))?
        }

        fn dimensions(&self) -> usize {
            self.config.dimensions
        }

        fn name(&self) -> &str {
            "local"
        }

        fn max_concurrency(&self) -> usize {
            self.config.max_concurrency
        }

        async fn dispose(&self) -> Result<()> {
            if self.lifecycle.dispose() {
                self.runtime.lock().take();
                debug!("Local embedder released");
            }
            Ok(())
        }
    }
}
