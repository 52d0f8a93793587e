//! The [`Embedder`] capability and the lifecycle every provider shares.
//!
//! Embedders convert text into dense vectors. Every provider walks the same
//! state machine:
//!
//! ```text
//! Uninitialized ──initialize()──▶ Initializing ──ok──▶ Ready ──dispose()──▶ Disposed
//!                                      │
//!                                      └──err──▶ Uninitialized
//! ```
//!
//! `embed` and `embed_batch` fail with [`EmbedError::NotInitialized`] before
//! `Ready` and with [`EmbedError::Disposed`] afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{EmbedError, Result};
use crate::pool;

/// Default number of in-flight single-item calls when a provider has no
/// native batch endpoint.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

impl ProviderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Uninitialized => "uninitialized",
            ProviderState::Initializing => "initializing",
            ProviderState::Ready => "ready",
            ProviderState::Disposed => "disposed",
        }
    }
}

/// Thread-safe holder for a provider's [`ProviderState`].
///
/// Providers embed one of these and route `initialize`, `embed`, and
/// `dispose` through it so that every variant reports misuse identically.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    state: Mutex<ProviderState>,
}

impl Lifecycle {
    /// Create a lifecycle in the `Uninitialized` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ProviderState::Uninitialized),
        }
    }

    /// Current state.
    pub fn state(&self) -> ProviderState {
        *self.state.lock()
    }

    /// Whether the provider accepts `embed` calls.
    pub fn is_ready(&self) -> bool {
        self.state() == ProviderState::Ready
    }

    /// Claim the right to run initialization.
    ///
    /// Returns `Ok(true)` when the caller must perform the work and then call
    /// [`Lifecycle::finish_initialize`], `Ok(false)` when already ready.
    pub fn begin_initialize(&self) -> Result<bool> {
        let mut state = self.state.lock();
        match *state {
            ProviderState::Uninitialized => {
                *state = ProviderState::Initializing;
                Ok(true)
            }
            ProviderState::Ready => Ok(false),
            ProviderState::Initializing => Err(EmbedError::Internal(format!(
                "embedder '{}' is already initializing",
                self.name
            ))),
            ProviderState::Disposed => Err(EmbedError::Disposed(self.name.clone())),
        }
    }

    /// Complete an initialization started with [`Lifecycle::begin_initialize`].
    ///
    /// A failed attempt returns the provider to `Uninitialized` so it can be retried.
    pub fn finish_initialize(&self, succeeded: bool) {
        let mut state = self.state.lock();
        if *state == ProviderState::Initializing {
            *state = if succeeded {
                ProviderState::Ready
            } else {
                ProviderState::Uninitialized
            };
        }
    }

    /// Fail unless the provider is `Ready`.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ProviderState::Ready => Ok(()),
            ProviderState::Disposed => Err(EmbedError::Disposed(self.name.clone())),
            ProviderState::Uninitialized | ProviderState::Initializing => {
                Err(EmbedError::NotInitialized(self.name.clone()))
            }
        }
    }

    /// Move to `Disposed`. Returns `false` if it already was.
    pub fn dispose(&self) -> bool {
        let mut state = self.state.lock();
        let was_disposed = *state == ProviderState::Disposed;
        *state = ProviderState::Disposed;
        !was_disposed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for generating text embeddings.
///
/// The provider set is closed: instances are built by
/// [`EmbedderFactory`](crate::factory::EmbedderFactory) and used through
/// [`SharedEmbedder`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Acquire whatever the provider needs (runtime handles, process checks).
    ///
    /// Idempotent once `Ready`.
    async fn initialize(&self) -> Result<()>;

    /// Current lifecycle state.
    fn state(&self) -> ProviderState;

    /// Whether `embed` calls will be accepted.
    fn is_ready(&self) -> bool {
        self.state() == ProviderState::Ready
    }

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    ///
    /// The default fans out to [`Embedder::embed`] with at most
    /// [`Embedder::max_concurrency`] calls in flight. Every item runs to
    /// completion; the first failure (by input index) is returned.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        pool::embed_each(self, texts, self.max_concurrency())
            .await
            .into_iter()
            .collect()
    }

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Upper bound on concurrent single-item calls used by batch fan-out.
    fn max_concurrency(&self) -> usize {
        DEFAULT_MAX_CONCURRENCY
    }

    /// Release held resources. Later `embed` calls fail with `Disposed`.
    async fn dispose(&self) -> Result<()>;
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.state(), ProviderState::Uninitialized);
        assert!(matches!(
            lifecycle.ensure_ready(),
            Err(EmbedError::NotInitialized(_))
        ));

        assert!(lifecycle.begin_initialize().unwrap());
        assert_eq!(lifecycle.state(), ProviderState::Initializing);
        assert!(matches!(
            lifecycle.ensure_ready(),
            Err(EmbedError::NotInitialized(_))
        ));

        lifecycle.finish_initialize(true);
        assert!(lifecycle.is_ready());
        assert!(lifecycle.ensure_ready().is_ok());

        // Second initialize is a no-op
        assert!(!lifecycle.begin_initialize().unwrap());

        assert!(lifecycle.dispose());
        assert!(!lifecycle.dispose());
        assert!(matches!(
            lifecycle.ensure_ready(),
            Err(EmbedError::Disposed(_))
        ));
        assert!(matches!(
            lifecycle.begin_initialize(),
            Err(EmbedError::Disposed(_))
        ));
    }

    #[test]
    fn test_failed_initialize_can_retry() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.begin_initialize().unwrap());
        lifecycle.finish_initialize(false);
        assert_eq!(lifecycle.state(), ProviderState::Uninitialized);
        assert!(lifecycle.begin_initialize().unwrap());
    }

    #[test]
    fn test_concurrent_initialize_rejected() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.begin_initialize().unwrap());
        assert!(matches!(
            lifecycle.begin_initialize(),
            Err(EmbedError::Internal(_))
        ));
    }
}
