//! Cross-encoder reranking
//!
//! Second retrieval stage: the fused candidates are scored jointly with the
//! query by a cross-encoder, which is more accurate than bi-encoder cosine
//! at the cost of one inference per (query, document) pair.
//!
//! The production model is bge-reranker-base via fastembed (multilingual,
//! raw logits squashed through a sigmoid into [0,1]). A term-overlap scorer
//! is provided for environments without model files; tests use it too.

use crate::embeddings::{sigmoid, CrossEncoder, EmbeddingError, RerankItem};

#[cfg(feature = "embeddings")]
use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "embeddings")]
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

// ============================================================================
// LOCAL CROSS-ENCODER (fastembed)
// ============================================================================

#[cfg(feature = "embeddings")]
static RERANK_MODEL: Mutex<Option<TextRerank>> = Mutex::new(None);

/// Lock the global reranker slot, initializing it on first use.
/// Init errors are returned without poisoning the slot.
#[cfg(feature = "embeddings")]
fn model_guard() -> Result<MutexGuard<'static, Option<TextRerank>>, EmbeddingError> {
    let mut slot = RERANK_MODEL
        .lock()
        .map_err(|_| EmbeddingError::ModelInit("reranker lock poisoned".into()))?;

    if slot.is_none() {
        let cache_dir = crate::embeddings::local::model_cache_dir();
        let options = RerankInitOptions::new(RerankerModel::BGERerankerBase)
            .with_show_download_progress(true)
            .with_cache_dir(cache_dir);

        match TextRerank::try_new(options) {
            Ok(model) => *slot = Some(model),
            Err(e) => {
                return Err(EmbeddingError::ModelInit(format!(
                    "failed to initialize bge-reranker-base: {}",
                    e
                )));
            }
        }
    }

    Ok(slot)
}

/// Cross-encoder backed by the shared local model
#[cfg(feature = "embeddings")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCrossEncoder;

#[cfg(feature = "embeddings")]
impl LocalCrossEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Eagerly load the model; useful at startup to surface download errors
    pub fn init(&self) -> Result<(), EmbeddingError> {
        model_guard().map(|_| ())
    }
}

#[cfg(feature = "embeddings")]
impl CrossEncoder for LocalCrossEncoder {
    fn rerank(
        &self,
        query: &str,
        docs: &[&str],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankItem>, EmbeddingError> {
        if query.is_empty() {
            return Err(EmbeddingError::InvalidInput("query cannot be empty".into()));
        }
        if docs.is_empty() {
            return Ok(vec![]);
        }

        let mut guard = model_guard()?;
        let model = guard
            .as_mut()
            .expect("model slot populated by model_guard");

        let raw = model
            .rerank(query, docs, false, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let mut items: Vec<RerankItem> = raw
            .into_iter()
            .filter_map(|r| {
                docs.get(r.index).map(|doc| RerankItem {
                    index: r.index,
                    score: sigmoid(r.score),
                    text: (*doc).to_string(),
                })
            })
            .collect();

        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(k) = top_k {
            items.truncate(k);
        }
        Ok(items)
    }
}

// ============================================================================
// TERM-OVERLAP FALLBACK
// ============================================================================

/// BM25-flavoured term overlap between a query and a document.
/// Kept as a pure function so the scorer can be unit-tested directly.
pub fn score_overlap(query: &str, document: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let terms: Vec<&str> = query_lower.split_whitespace().collect();
    let doc_lower = document.to_lowercase();
    let doc_len = document.len() as f32;

    if doc_len == 0.0 || terms.is_empty() {
        return 0.0;
    }

    let k1 = 1.2_f32;
    let b = 0.75_f32;
    let avg_doc_len = 500.0_f32;

    let mut score = 0.0;
    for term in &terms {
        let tf = doc_lower.matches(term).count() as f32;
        if tf > 0.0 {
            score += (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len)));
        }
    }

    score / terms.len() as f32
}

/// Deterministic cross-encoder scoring by term overlap, for stores built
/// without the neural reranker and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlapCrossEncoder;

impl CrossEncoder for OverlapCrossEncoder {
    fn rerank(
        &self,
        query: &str,
        docs: &[&str],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankItem>, EmbeddingError> {
        if query.is_empty() {
            return Err(EmbeddingError::InvalidInput("query cannot be empty".into()));
        }

        let mut items: Vec<RerankItem> = docs
            .iter()
            .enumerate()
            .map(|(index, doc)| RerankItem {
                index,
                // squash into (0,1) so scores compose like the neural path
                score: sigmoid(score_overlap(query, doc) * 4.0 - 2.0),
                text: (*doc).to_string(),
            })
            .collect();

        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(k) = top_k {
            items.truncate(k);
        }
        Ok(items)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_prefers_matching_document() {
        let docs = ["the quick brown fox", "a sleeping cat", "fox jumps again"];
        let encoder = OverlapCrossEncoder;
        let items = encoder.rerank("fox", &docs, Some(2)).unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].text.contains("fox"));
        assert!(items[0].score > 0.0 && items[0].score < 1.0);
    }

    #[test]
    fn overlap_empty_query_is_rejected() {
        let encoder = OverlapCrossEncoder;
        assert!(encoder.rerank("", &["doc"], None).is_err());
    }

    #[test]
    fn overlap_empty_docs() {
        let encoder = OverlapCrossEncoder;
        assert!(encoder.rerank("q", &[], None).unwrap().is_empty());
    }

    #[test]
    fn score_overlap_zero_for_disjoint() {
        assert_eq!(score_overlap("fox", "completely unrelated"), 0.0);
        assert!(score_overlap("fox", "fox fox fox") > 0.0);
    }
}
