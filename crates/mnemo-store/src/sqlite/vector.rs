//! Embedding blob encoding.
//!
//! Vectors are stored as native-endian `float32` bytes with no header.

use zerocopy::IntoBytes;

use crate::error::{Result, StoreError};

/// Encode an embedding as a `float32` blob.
pub fn to_blob(embedding: &[f32]) -> &[u8] {
    embedding.as_bytes()
}

/// Decode a `float32` blob.
pub fn from_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn optional_from_blob(blob: Option<Vec<u8>>) -> Result<Option<Vec<f32>>> {
    blob.as_deref().map(from_blob).transpose()
}
