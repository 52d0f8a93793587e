//! Bounded-concurrency fan-out for providers without native batching.
//!
//! Items are pulled from the input in order, at most `max_concurrency` are
//! in flight at once, and each result is written at its original index.
//! The call returns only after every item has finished, so one failing item
//! never cancels its neighbours.

use std::future::Future;

use futures::StreamExt;
use futures::stream;

use crate::embedder::Embedder;
use crate::error::Result;

/// Run `f` over `items` with at most `max_concurrency` futures in flight.
///
/// The output has the same length and order as `items`. A concurrency of
/// zero is treated as one.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, max_concurrency: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = max_concurrency.max(1);
    let mut slots: Vec<Option<R>> = Vec::with_capacity(items.len());
    slots.resize_with(items.len(), || None);

    let mut in_flight = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = f(item);
            async move { (index, fut.await) }
        })
        .buffer_unordered(limit);

    while let Some((index, result)) = in_flight.next().await {
        slots[index] = Some(result);
    }

    slots.into_iter().flatten().collect()
}

/// Embed each text independently through `embedder.embed`, bounded by
/// `max_concurrency`. Per-item results preserve input order.
pub async fn embed_each<E>(
    embedder: &E,
    texts: &[&str],
    max_concurrency: usize,
) -> Vec<Result<Vec<f32>>>
where
    E: Embedder + ?Sized,
{
    run_bounded(texts.to_vec(), max_concurrency, |text| embedder.embed(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::embedder::{Lifecycle, ProviderState};
    use crate::error::EmbedError;

    /// Embedder that records the peak number of concurrent `embed` calls.
    struct InstrumentedEmbedder {
        lifecycle: Lifecycle,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        max_concurrency: usize,
    }

    impl InstrumentedEmbedder {
        fn new(max_concurrency: usize) -> Self {
            let lifecycle = Lifecycle::new("instrumented");
            lifecycle.begin_initialize().unwrap();
            lifecycle.finish_initialize(true);
            Self {
                lifecycle,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                max_concurrency,
            }
        }
    }

    #[async_trait]
    impl Embedder for InstrumentedEmbedder {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        fn state(&self) -> ProviderState {
            self.lifecycle.state()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.lifecycle.ensure_ready()?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            // Vary latency so completions arrive out of order
            let delay = 5 + (text.len() as u64 * 7) % 13;
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if text == "fail" {
                return Err(EmbedError::ProviderUnavailable("boom".into()));
            }
            Ok(vec![text.len() as f32])
        }

        fn dimensions(&self) -> usize {
            1
        }

        fn name(&self) -> &str {
            "instrumented"
        }

        fn max_concurrency(&self) -> usize {
            self.max_concurrency
        }

        async fn dispose(&self) -> Result<()> {
            self.lifecycle.dispose();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batch_never_exceeds_max_concurrency() {
        let embedder = Arc::new(InstrumentedEmbedder::new(4));
        let owned: Vec<String> = (0..20).map(|i| "x".repeat(i + 1)).collect();
        let texts: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();

        let vectors = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 20);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 20);
        let peak = embedder.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency was {peak}");
        assert!(peak > 1, "batch ran sequentially");
        assert_eq!(embedder.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_results_land_at_original_index() {
        let embedder = InstrumentedEmbedder::new(3);
        let owned: Vec<String> = (0..12).map(|i| "y".repeat(12 - i)).collect();
        let texts: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();

        let vectors = embedder.embed_batch(&texts).await.unwrap();
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], texts[i].len() as f32);
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_item() {
        let embedder = InstrumentedEmbedder::new(2);
        let texts = ["a", "fail", "ccc", "dddd"];

        let results = embed_each(&embedder, &texts, 2).await;

        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert!(results[3].is_ok());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);

        // The batch surface reports the failure but every item still ran
        let err = embedder.embed_batch(&texts).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_treated_as_one() {
        let out = run_bounded(vec![1, 2, 3], 0, |n| async move { n * 2 }).await;
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out: Vec<i32> = run_bounded(Vec::<i32>::new(), 4, |n| async move { n }).await;
        assert!(out.is_empty());
    }
}
