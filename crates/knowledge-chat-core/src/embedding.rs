//! Embedding service trait and vector helpers.
//!
//! Concrete providers (Ollama, OpenAI) live in the `knowledge-chat` app
//! crate; this module only defines the seam they plug into.

use async_trait::async_trait;

use crate::error::ServiceError;

/// Maps text to fixed-dimension vectors.
///
/// The model name is persisted alongside a built index and compared on
/// load, so two embedders reporting the same name must produce compatible
/// vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Expected dimensionality, when known up front.
    fn dims(&self) -> Option<usize>;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, ServiceError> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::malformed("embedding", "empty embedding response"))
}

/// Compute cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
