//! Memoising wrapper around any embedder.
//!
//! Cache keys are the exact input text. The cache is unbounded and is only
//! emptied by [`CachedEmbedder::clear_cache`] or `dispose()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::embedder::{Embedder, ProviderState, SharedEmbedder};
use crate::error::{EmbedError, Result};

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the wrapped provider.
    pub misses: u64,
    /// Distinct texts currently cached.
    pub entries: usize,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
}

/// An embedding annotated with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEmbedding {
    pub vector: Vec<f32>,
    /// Time spent in the wrapped provider. Zero on a hit.
    pub latency: Duration,
    pub cached: bool,
}

/// Embedder that answers repeated texts from memory.
///
/// Lookups never hold the lock across an await. Two concurrent misses on the
/// same text may both reach the wrapped provider; the second write stores an
/// identical vector.
pub struct CachedEmbedder {
    inner: SharedEmbedder,
    cache: Mutex<HashMap<String, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CachedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEmbedder")
            .field("inner", &self.inner.name())
            .field("stats", &self.stats())
            .finish()
    }
}

impl CachedEmbedder {
    pub fn new(inner: SharedEmbedder) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &SharedEmbedder {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.cache.lock().len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Drop every cached vector. Counters are kept.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        self.cache.lock().get(text).cloned()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.inner.state() {
            ProviderState::Ready => Ok(()),
            ProviderState::Disposed => Err(EmbedError::Disposed(self.inner.name().to_string())),
            _ => Err(EmbedError::NotInitialized(self.inner.name().to_string())),
        }
    }

    /// Like [`Embedder::embed`], reporting whether the cache answered and how
    /// long the provider took otherwise.
    pub async fn embed_timed(&self, text: &str) -> Result<TimedEmbedding> {
        self.ensure_ready()?;

        if let Some(vector) = self.lookup(text) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(TimedEmbedding {
                vector,
                latency: Duration::ZERO,
                cached: true,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let vector = self.inner.embed(text).await?;
        let latency = started.elapsed();

        self.cache.lock().insert(text.to_string(), vector.clone());
        Ok(TimedEmbedding {
            vector,
            latency,
            cached: false,
        })
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    fn state(&self) -> ProviderState {
        self.inner.state()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_timed(text).await?.vector)
    }

    /// Answer hits from the cache and send the remaining distinct texts to
    /// the wrapped provider in a single `embed_batch` call.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.ensure_ready()?;

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        // Distinct missing texts in first-seen order
        let mut pending: Vec<&str> = Vec::new();
        let mut pending_slot: HashMap<&str, usize> = HashMap::new();
        // (result index, pending index)
        let mut waiting: Vec<(usize, usize)> = Vec::new();

        {
            let cache = self.cache.lock();
            for (index, text) in texts.iter().enumerate() {
                match cache.get(*text) {
                    Some(vector) => results.push(Some(vector.clone())),
                    None => {
                        let slot = *pending_slot.entry(*text).or_insert_with(|| {
                            pending.push(*text);
                            pending.len() - 1
                        });
                        waiting.push((index, slot));
                        results.push(None);
                    }
                }
            }
        }

        let hit_count = (texts.len() - waiting.len()) as u64;
        self.hits.fetch_add(hit_count, Ordering::Relaxed);
        self.misses
            .fetch_add(waiting.len() as u64, Ordering::Relaxed);

        if !pending.is_empty() {
            let computed = self.inner.embed_batch(&pending).await?;
            if computed.len() != pending.len() {
                return Err(EmbedError::Internal(format!(
                    "Provider returned {} embeddings for {} texts",
                    computed.len(),
                    pending.len()
                )));
            }

            {
                let mut cache = self.cache.lock();
                for (text, vector) in pending.iter().zip(&computed) {
                    cache.insert((*text).to_string(), vector.clone());
                }
            }

            for (index, slot) in waiting {
                results[index] = Some(computed[slot].clone());
            }
            debug!(
                hits = hit_count,
                computed = pending.len(),
                "Cached batch embedded"
            );
        }

        results
            .into_iter()
            .map(|v| v.ok_or_else(|| EmbedError::Internal("Unfilled batch slot".to_string())))
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency()
    }

    async fn dispose(&self) -> Result<()> {
        self.clear_cache();
        self.inner.dispose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use crate::mock::MockEmbedder;

    /// Mock that counts texts and batch calls reaching it.
    struct CountingEmbedder {
        mock: MockEmbedder,
        texts: AtomicUsize,
        batches: AtomicUsize,
        last_batch: Mutex<Vec<String>>,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                mock: MockEmbedder::new(16),
                texts: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
                last_batch: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn initialize(&self) -> Result<()> {
            self.mock.initialize().await
        }

        fn state(&self) -> ProviderState {
            self.mock.state()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.texts.fetch_add(1, Ordering::SeqCst);
            self.mock.embed(text).await
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            *self.last_batch.lock() = texts.iter().map(|t| t.to_string()).collect();
            self.mock.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            16
        }

        fn name(&self) -> &str {
            "counting"
        }

        async fn dispose(&self) -> Result<()> {
            self.mock.dispose().await
        }
    }

    async fn setup() -> (Arc<CountingEmbedder>, CachedEmbedder) {
        let inner = Arc::new(CountingEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone());
        cached.initialize().await.unwrap();
        (inner, cached)
    }

    #[tokio::test]
    async fn test_repeat_embed_calls_provider_once() {
        let (inner, cached) = setup().await;

        let first = cached.embed("x").await.unwrap();
        let second = cached.embed("x").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.texts.load(Ordering::SeqCst), 1);
        let stats = cached.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_hit_rate_zero_without_lookups() {
        let (_, cached) = setup().await;
        assert_eq!(cached.stats().hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_embed_timed_reports_hits() {
        let (_, cached) = setup().await;

        let miss = cached.embed_timed("hello").await.unwrap();
        assert!(!miss.cached);

        let hit = cached.embed_timed("hello").await.unwrap();
        assert!(hit.cached);
        assert_eq!(hit.latency, Duration::ZERO);
        assert_eq!(hit.vector, miss.vector);
    }

    #[tokio::test]
    async fn test_partial_batch_sends_only_misses_once() {
        let (inner, cached) = setup().await;
        cached.embed("b").await.unwrap();

        let texts = ["a", "b", "c", "a", "d"];
        let vectors = cached.embed_batch(&texts).await.unwrap();

        assert_eq!(inner.batches.load(Ordering::SeqCst), 1);
        assert_eq!(*inner.last_batch.lock(), vec!["a", "c", "d"]);

        let reference = MockEmbedder::new(16);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(*vector, reference.vector_for(text));
        }
        assert_eq!(cached.stats().entries, 4);
    }

    #[tokio::test]
    async fn test_fully_cached_batch_skips_provider() {
        let (inner, cached) = setup().await;
        cached.embed_batch(&["a", "b"]).await.unwrap();
        let calls = inner.batches.load(Ordering::SeqCst);

        cached.embed_batch(&["b", "a", "b"]).await.unwrap();
        assert_eq!(inner.batches.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let (_, cached) = setup().await;
        let texts = ["one", "two", "three"];
        let batch = cached.embed_batch(&texts).await.unwrap();

        let fresh = CachedEmbedder::new(Arc::new(CountingEmbedder::new()));
        fresh.initialize().await.unwrap();
        for (i, text) in texts.iter().enumerate() {
            assert_eq!(batch[i], fresh.embed(text).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_clear_cache_forces_recompute() {
        let (inner, cached) = setup().await;
        cached.embed("x").await.unwrap();
        cached.clear_cache();
        cached.embed("x").await.unwrap();
        assert_eq!(inner.texts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispose_clears_and_rejects() {
        let (_, cached) = setup().await;
        cached.embed("x").await.unwrap();
        cached.dispose().await.unwrap();

        assert_eq!(cached.stats().entries, 0);
        assert!(matches!(
            cached.embed("x").await,
            Err(EmbedError::Disposed(_))
        ));
    }
}
