//! Shared test fixtures
//!
//! A deterministic token-hash encoder and a tempfile-backed store so the
//! full pipeline runs without model downloads. Token overlap maps onto
//! cosine similarity, which is all the write-path and consolidation
//! thresholds need.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use engram_core::{
    normalize, AddInput, Embedder, EmbeddingError, MemoryType, OverlapCrossEncoder, Storage,
    EMBEDDING_DIMENSIONS,
};

/// Bag-of-words encoder: each lowercased alphanumeric token hashes to one
/// of the 1024 dimensions. Identical texts embed identically; texts sharing
/// most tokens land above the merge threshold.
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }

        let mut vector = vec![0.0_f32; EMBEDDING_DIMENSIONS];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let slot = (hasher.finish() % EMBEDDING_DIMENSIONS as u64) as usize;
            vector[slot] += 1.0;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// A store on a throwaway database file with the deterministic models
pub fn test_store() -> (tempfile::TempDir, Storage) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Storage::with_models(
        Some(dir.path().join("engram.db")),
        Arc::new(HashEmbedder),
        Arc::new(OverlapCrossEncoder),
    )
    .expect("open store");
    (dir, storage)
}

/// Shorthand for a plain add
pub fn add(storage: &Storage, mem_type: MemoryType, title: &str, content: &str) -> i64 {
    storage
        .add(AddInput {
            mem_type,
            title: title.to_string(),
            content: content.to_string(),
            ..Default::default()
        })
        .expect("add")
        .id
}
