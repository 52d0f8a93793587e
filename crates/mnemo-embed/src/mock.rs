//! Deterministic mock embedder.
//!
//! The embedding is a pure function of the text: a linear congruential
//! generator seeded with the sum of the text's character codes. The same
//! text yields bit-identical vectors across calls, instances, and process
//! restarts. Components are drawn from `[0, 1)` before normalisation, so any
//! two mock embeddings have positive cosine similarity.
//!
//! This is the provider used when nothing else is configured or reachable.

use async_trait::async_trait;

use crate::embedder::{Embedder, Lifecycle, ProviderState};
use crate::error::Result;

/// Default dimensions (same as all-MiniLM-L6-v2).
pub const DEFAULT_MOCK_DIMENSIONS: usize = 384;

/// A mock embedder for tests and offline fallback.
#[derive(Debug)]
pub struct MockEmbedder {
    dimensions: usize,
    lifecycle: Lifecycle,
}

impl MockEmbedder {
    /// Create a new mock embedder with the specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            lifecycle: Lifecycle::new("mock"),
        }
    }

    /// Compute the vector for `text` without touching the lifecycle.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = text
            .chars()
            .fold(0u64, |acc, c| acc.wrapping_add(u64::from(u32::from(c))));

        let mut embedding = vec![0.0f32; self.dimensions];
        let mut state = seed;
        for value in embedding.iter_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            *value = ((state >> 16) & 0x7fff) as f32 / 32768.0;
        }

        // Normalize to unit length
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn initialize(&self) -> Result<()> {
        if self.lifecycle.begin_initialize()? {
            self.lifecycle.finish_initialize(true);
        }
        Ok(())
    }

    fn state(&self) -> ProviderState {
        self.lifecycle.state()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.lifecycle.ensure_ready()?;
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.lifecycle.ensure_ready()?;
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle.dispose();
        Ok(())
    }
}
