//! Search module
//!
//! Retrieval primitives for the engine:
//! - Nearest-neighbour index over content embeddings (USearch HNSW)
//! - Reciprocal Rank Fusion of the lexical and semantic candidate lists
//! - Cross-encoder reranking for precision

pub mod hybrid;
pub mod reranker;

#[cfg(feature = "vector-search")]
pub mod vector;

pub use hybrid::{fuse_width, quality_boost, reciprocal_rank_fusion, rerank_width};
pub use reranker::{score_overlap, OverlapCrossEncoder};

#[cfg(feature = "embeddings")]
pub use reranker::LocalCrossEncoder;

#[cfg(feature = "vector-search")]
pub use vector::{VectorIndex, VectorSearchError};

/// Escape a raw user query for the FTS5 MATCH operator.
///
/// Every whitespace-separated token is double-quoted so operators and
/// punctuation inside the query cannot produce FTS5 syntax errors; tokens
/// are OR-ed so a multi-word query matches documents containing any term,
/// with BM25 ranking the ones that contain more.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "")))
        .filter(|t| t.len() > 2)
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_quotes_and_ors_tokens() {
        assert_eq!(sanitize_fts5_query("hello world"), "\"hello\" OR \"world\"");
    }

    #[test]
    fn sanitize_strips_embedded_quotes() {
        let q = sanitize_fts5_query("vec \"quoted\" NEAR(x)");
        assert!(!q.contains("\"\""));
        assert!(q.contains("\"quoted\""));
        assert!(q.contains("\"NEAR(x)\""));
    }

    #[test]
    fn sanitize_empty_query() {
        assert_eq!(sanitize_fts5_query("   "), "");
    }
}
