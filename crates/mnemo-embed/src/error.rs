//! Error types for the embedding crate.

use thiserror::Error;

/// Result type alias using the embedding error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Errors produced by embedding providers, the cache layer, and the factory.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// A provider could not be constructed (missing credential, binary, model file).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `embed` was called before `initialize` completed.
    #[error("Embedder '{0}' is not initialized")]
    NotInitialized(String),

    /// `embed` was called after `dispose`.
    #[error("Embedder '{0}' has been disposed")]
    Disposed(String),

    /// Two vectors that must agree in length did not.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The remote API or local runtime failed. Callers may retry.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A provider response could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invariant violation inside this crate.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmbedError {
    /// Whether the failure is transient and worth retrying with backoff.
    ///
    /// The cache layer never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::ProviderUnavailable(_))
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbedError::Serialization(err.to_string())
        } else {
            EmbedError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(err: serde_json::Error) -> Self {
        EmbedError::Serialization(err.to_string())
    }
}
