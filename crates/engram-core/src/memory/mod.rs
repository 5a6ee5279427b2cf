//! Memory module - core types and data structures
//!
//! The data model for the engine: typed memory records, links, sessions,
//! search and recall DTOs, and the statistics surface.

mod record;

pub use record::{
    AddInput, AddOutcome, AddStatus, Link, LinkRelation, LinkSpec, Memory, MemoryDetail,
    MemoryType, SourceType, UpdatePatch,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// WRITE-PATH DEFAULTS
// ============================================================================

/// Same-type similarity above which an incoming add is folded into the
/// existing memory instead of inserting a new row
pub const DEFAULT_MERGE_THRESHOLD: f32 = 0.92;

/// Similarity above which an automatic related_to edge is created
pub const AUTO_LINK_THRESHOLD: f32 = 0.7;

/// Upper bound on automatic edges per insert
pub const MAX_AUTO_LINKS: usize = 3;

/// Tag that exempts a memory from decay and prune
pub const PERMANENT_TAG: &str = "permanent";

// ============================================================================
// SEARCH
// ============================================================================

/// Which retrieval primitive to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Embedding nearest-neighbour only
    Semantic,
    /// FTS5/BM25 only
    Fts,
    /// RRF fusion of both (default)
    #[default]
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(SearchMode::Semantic),
            "fts" | "lexical" | "keyword" => Ok(SearchMode::Fts),
            "hybrid" => Ok(SearchMode::Hybrid),
            _ => Err(format!("unknown search mode: {}", s)),
        }
    }
}

/// Options shared by the search primitives
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results to return
    pub k: usize,
    /// Restrict to one memory type
    pub mem_type: Option<MemoryType>,
    /// Recency window in `{N}{h|d|w|m}` form, e.g. "2d" or "3w"
    pub since: Option<String>,
    /// Include archived rows (semantic search only; lexical never does)
    pub include_archived: bool,
    /// RRF smoothing constant
    pub rrf_k: f64,
    /// Run the cross-encoder over the fused candidates
    pub rerank: bool,
    /// Breadth-first link expansion depth
    pub hops: usize,
    /// Cap on result size after hop expansion; defaults to `k`
    pub max_total: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 10,
            mem_type: None,
            since: None,
            include_archived: false,
            rrf_k: 60.0,
            rerank: false,
            hops: 0,
            max_total: None,
        }
    }
}

/// How a search hit was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchKind {
    /// Embedding similarity only
    Semantic,
    /// BM25 match only
    Lexical,
    /// Present in both ranked lists
    Both,
    /// Reached through link expansion (carries the sentinel score -1)
    Graph,
}

/// A scored search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub memory: Memory,
    /// Similarity, BM25, fused RRF, or reranker score depending on the path;
    /// -1.0 for graph-expansion results
    pub score: f64,
    pub match_kind: MatchKind,
}

// ============================================================================
// RECALL (FOCUS OF ATTENTION)
// ============================================================================

/// Options for token-budgeted context assembly
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub k: usize,
    /// Token budget for the packed memories
    pub budget: usize,
    pub mem_type: Option<MemoryType>,
    /// Attach this session's summary and attribute access logging to it
    pub session_id: Option<String>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            k: 10,
            budget: 4000,
            mem_type: None,
            session_id: None,
        }
    }
}

/// One memory inside a recall result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalledMemory {
    pub memory: Memory,
    /// Hybrid-search relevance before composite weighting
    pub relevance: f64,
    /// relevance x importance x strength x recency
    pub composite: f64,
    /// Estimated tokens of the rendered memory
    pub tokens: usize,
}

/// Assembled context for a query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    pub memories: Vec<RecalledMemory>,
    /// Session summary, when a session id with a summary was supplied
    pub session_context: Option<String>,
    pub total_tokens_estimate: usize,
}

// ============================================================================
// SESSIONS
// ============================================================================

/// A named work session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A session plus the memories accessed under it, most recent first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session: Session,
    pub memories: Vec<Memory>,
}

/// Filter for listing sessions
#[derive(Debug, Clone)]
pub struct SessionFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            limit: 20,
        }
    }
}

// ============================================================================
// TELEMETRY
// ============================================================================

/// Read-only statistics about the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: i64,
    pub archived: i64,
    /// (type, count) over non-archived rows
    pub by_type: Vec<(String, i64)>,
    pub average_importance: f64,
    pub average_strength: f64,
    pub with_embeddings: i64,
    pub tag_count: i64,
    pub link_count: i64,
    pub session_count: i64,
    pub last_consolidation_at: Option<DateTime<Utc>>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// A near-duplicate pair surfaced by diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatePair {
    pub first_id: i64,
    pub first_title: String,
    pub second_id: i64,
    pub second_title: String,
    pub similarity: f32,
}

/// A memory with its tags, as written by `export`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    #[serde(flatten)]
    pub memory: Memory,
    pub tags: Vec<String>,
}
