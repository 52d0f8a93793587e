//! Validation and clamping for entity data.
//!
//! The store rejects malformed embeddings and content. Clamping of
//! `importance` and `confidence` happens at the service boundary through the
//! helpers here; the store keeps whatever value it is given.

/// Allowed range for memory importance.
pub const IMPORTANCE_RANGE: (f32, f32) = (0.0, 10.0);

/// Default memory importance.
pub const DEFAULT_IMPORTANCE: f32 = 5.0;

/// Allowed range for fact confidence.
pub const CONFIDENCE_RANGE: (f32, f32) = (0.0, 1.0);

/// Default fact confidence.
pub const DEFAULT_CONFIDENCE: f32 = 1.0;

/// Specific validation error types for entity data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty or whitespace.
    #[error("content is empty")]
    EmptyContent,

    /// Content contains NUL bytes.
    #[error("content contains NUL bytes")]
    BinaryContent,

    /// A required identifier is empty.
    #[error("{0} is empty")]
    EmptyId(&'static str),

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding contains invalid values (NaN or Inf).
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues { count: usize },

    /// Unknown chat role.
    #[error("unknown chat role '{0}'")]
    InvalidRole(String),
}

/// Validate an embedding vector against the store dimension.
pub fn validate_embedding(embedding: &[f32], expected_dim: usize) -> Result<(), ValidationError> {
    if embedding.len() != expected_dim {
        return Err(ValidationError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding.iter().filter(|v| !v.is_finite()).count();
    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    Ok(())
}

/// Validate an optional embedding.
pub fn validate_optional_embedding(
    embedding: Option<&[f32]>,
    expected_dim: usize,
) -> Result<(), ValidationError> {
    embedding.map_or(Ok(()), |e| validate_embedding(e, expected_dim))
}

/// Validate a search query vector, when one is given.
pub fn validate_query(query: Option<&[f32]>, expected_dim: usize) -> Result<(), ValidationError> {
    validate_optional_embedding(query, expected_dim)
}

/// Validate text content for memories, facts, and chat messages.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.contains('\0') {
        return Err(ValidationError::BinaryContent);
    }
    Ok(())
}

/// Validate that an identifier is present.
pub fn validate_id(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyId(field));
    }
    Ok(())
}

/// Clamp importance into `[0, 10]`. Missing or NaN becomes the default.
pub fn clamp_importance(value: Option<f32>) -> f32 {
    clamp_or_default(value, IMPORTANCE_RANGE, DEFAULT_IMPORTANCE)
}

/// Clamp confidence into `[0, 1]`. Missing or NaN becomes the default.
pub fn clamp_confidence(value: Option<f32>) -> f32 {
    clamp_or_default(value, CONFIDENCE_RANGE, DEFAULT_CONFIDENCE)
}

fn clamp_or_default(value: Option<f32>, (lo, hi): (f32, f32), default: f32) -> f32 {
    match value {
        Some(v) if !v.is_nan() => v.clamp(lo, hi),
        _ => default,
    }
}
