//! Text embedding capability.
//!
//! The engine never loads a model itself. The hosting process constructs a
//! provider (local model, remote inference service, ...) and injects it into
//! the recommenders that need one.

use crate::error::{AppError, Result};
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Check that `vector` has the expected length and only finite components.
pub fn validate_embedding(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(AppError::Embedding(format!(
            "expected {} components, got {}",
            dimension,
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::Embedding(
            "embedding contains non-finite components".to_string(),
        ));
    }
    Ok(())
}

/// Embed `text` with `provider` and validate the result.
pub async fn embed_checked(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let vector = provider.embed(text).await?;
    validate_embedding(&vector, provider.dimension())?;
    Ok(vector)
}
