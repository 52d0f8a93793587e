//! Text embeddings for mnemo.
//!
//! This crate turns text into vectors and ranks vectors against each other:
//!
//! - [`Embedder`]: the provider capability, with a shared [`Lifecycle`]
//! - [`MockEmbedder`], [`OpenAiEmbedder`], [`ProcessEmbedder`], and (with the
//!   `local-embeddings` feature) `LocalEmbedder`
//! - [`CachedEmbedder`]: exact-text memoisation with batch splitting
//! - [`EmbedderFactory`]: builds providers from an [`EmbedderSpec`] and reuses live instances
//! - [`vector`]: cosine similarity, normalisation, and k-nearest selection
//!
//! # Example
//!
//! ```rust,no_run
//! use mnemo_embed::{Embedder, EmbedderFactory, EmbedderSpec};
//!
//! # async fn example() -> mnemo_embed::Result<()> {
//! let factory = EmbedderFactory::new();
//! let embedder = factory.create(&EmbedderSpec::default()).await?;
//! let vector = embedder.embed("The user prefers dark mode").await?;
//! assert_eq!(vector.len(), embedder.dimensions());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod embedder;
pub mod error;
pub mod factory;
pub mod local;
pub mod mock;
pub mod openai;
pub mod pool;
pub mod process;
pub mod vector;

pub use cache::{CacheStats, CachedEmbedder, TimedEmbedding};
pub use embedder::{DEFAULT_MAX_CONCURRENCY, Embedder, Lifecycle, ProviderState, SharedEmbedder};
pub use error::{EmbedError, Result};
pub use factory::{EmbedderFactory, EmbedderSpec, ProviderConfig};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use local::LocalEmbedderConfig;
pub use mock::{DEFAULT_MOCK_DIMENSIONS, MockEmbedder};
pub use openai::{OpenAiEmbedder, OpenAiEmbedderConfig};
pub use process::{ProcessEmbedder, ProcessEmbedderConfig};
pub use vector::{Metric, cosine_similarity, k_nearest, normalize};
