//! Error types for the memory service.

use mnemo_embed::EmbedError;
use mnemo_store::{StoreError, ValidationError};
use thiserror::Error;

/// Errors returned by [`MemoryService`](crate::MemoryService) operations.
///
/// A missing or foreign entity is not an error; lookups return `None`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The embedding provider failed.
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// The entity store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The request was rejected before any work was done.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A text transform or result filter failed.
    #[error("Transform error: {0}")]
    Transform(String),
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
