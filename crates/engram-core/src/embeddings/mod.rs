//! Semantic embeddings
//!
//! The model seam for the engine: an [`Embedder`] turning text into 1024-dim
//! unit-norm vectors and a [`CrossEncoder`] scoring (query, document) pairs.
//! Production implementations run locally via fastembed (see [`local`] and
//! `search::reranker`); tests inject deterministic stand-ins.
//!
//! Vectors are stored and transported as little-endian raw f32 bytes
//! (`4 * dimensions` per vector); the blob conversion is a reinterpretation,
//! not a transform.

use serde::{Deserialize, Serialize};

#[cfg(feature = "embeddings")]
pub mod local;

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Embedding dimensions, constant across the whole database
pub const EMBEDDING_DIMENSIONS: usize = 1024;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding and reranking errors
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Model could not be initialized; retried on the next call
    #[error("model initialization failed: {0}")]
    ModelInit(String),
    /// Inference failed
    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),
    /// Empty text, mismatched dimensions, and similar caller errors
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// MODEL TRAITS
// ============================================================================

/// Text encoder contract: 1024-float unit-norm vectors, deterministic up to
/// cosine >= 0.99 for equal inputs
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts; semantically equivalent to sequential `embed`
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Vector width produced by this encoder
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

/// One reranked document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankItem {
    /// Index into the candidate slice passed to `rerank`
    pub index: usize,
    /// Sigmoid relevance in [0,1]
    pub score: f32,
    pub text: String,
}

/// Cross-encoder contract: joint (query, document) relevance scoring
pub trait CrossEncoder: Send + Sync {
    /// Score every document against the query, sorted by score descending,
    /// truncated to `top_k` when given
    fn rerank(
        &self,
        query: &str,
        docs: &[&str],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankItem>, EmbeddingError>;
}

// ============================================================================
// PURE HELPERS
// ============================================================================

/// Cosine similarity over equal-dimension inputs
///
/// Returns 0 when either norm is zero; rejects mismatched dimensions.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    if a.len() != b.len() {
        return Err(EmbeddingError::InvalidInput(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        Ok(dot / denominator)
    } else {
        Ok(0.0)
    }
}

/// Scale a vector to unit length in place; zero vectors are left untouched
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Pack a vector as tightly-packed little-endian f32 bytes
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Reinterpret a blob as a vector; `None` unless the length is a multiple of 4
pub fn blob_to_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Logistic squash of a raw cross-encoder logit into [0,1]
#[inline]
pub fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

// ============================================================================
// TESTS
// ============================================================================
