//! Validation of vectors entering the cache, index and store.

use crate::error::{MemoryError, Result};

/// Check that `embedding` has `expected_dim` components and no NaN/Inf values.
pub fn validate_embedding(embedding: &[f32], expected_dim: usize) -> Result<()> {
    if embedding.len() != expected_dim {
        return Err(MemoryError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding
        .iter()
        .filter(|v| v.is_nan() || v.is_infinite())
        .count();

    if invalid_count > 0 {
        return Err(MemoryError::InvalidData(format!(
            "embedding contains {} invalid values (NaN or Inf)",
            invalid_count
        )));
    }

    Ok(())
}

/// Check a threshold-like parameter lies in [0, 1].
pub fn validate_unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(MemoryError::InvalidData(format!(
            "{} must be in [0.0, 1.0], got {}",
            name, value
        )));
    }
    Ok(())
}
