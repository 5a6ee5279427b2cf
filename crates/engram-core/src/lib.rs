//! # Engram Core
//!
//! Single-node cognitive memory engine for long-lived AI agents. Persists
//! typed textual memories with dense semantic embeddings and lexical
//! indices, and reconstructs task-relevant context inside a token budget.
//!
//! - **Write path**: exact-duplicate detection, semantic merge-on-write,
//!   and automatic related_to edges to the closest neighbours
//! - **Hybrid retrieval**: FTS5/BM25 + embedding kNN fused with Reciprocal
//!   Rank Fusion, optional cross-encoder reranking, optional breadth-first
//!   link expansion
//! - **Focus of attention**: composite-ranked, token-budgeted recall with
//!   session context
//! - **Sleep consolidation**: idempotent decay / prune / merge / boost cycle
//!   anchored on the previous run's timestamp
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{AddInput, MemoryType, RecallOptions, Storage};
//!
//! let storage = Storage::open(None)?;
//!
//! let outcome = storage.add(AddInput {
//!     mem_type: MemoryType::Fact,
//!     title: "LibSQL notes".into(),
//!     content: "LibSQL provides native vector search and FTS5.".into(),
//!     ..Default::default()
//! })?;
//!
//! let context = storage.recall("vector search", &RecallOptions::default())?;
//! println!("{}", engram_core::focus::render_markdown(&context));
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local encoder + cross-encoder via fastembed
//! - `vector-search` (default): HNSW index via USearch; without it every
//!   kNN call is an exact cosine scan
//! - `bundled-sqlite` (default): compile SQLite into the binary

// ============================================================================
// MODULES
// ============================================================================

pub mod consolidation;
pub mod embeddings;
pub mod focus;
pub mod memory;
pub mod search;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Data model
pub use memory::{
    AddInput, AddOutcome, AddStatus, DuplicatePair, ExportRecord, Link, LinkRelation, LinkSpec,
    MatchKind, Memory, MemoryDetail, MemoryStats, MemoryType, RecallOptions, RecallResult,
    RecalledMemory, SearchHit, SearchMode, SearchOptions, Session, SessionContext, SessionFilter,
    SourceType, UpdatePatch, AUTO_LINK_THRESHOLD, DEFAULT_MERGE_THRESHOLD, MAX_AUTO_LINKS,
    PERMANENT_TAG,
};

// Storage layer
pub use storage::{KnnFilter, Result, Storage, StorageError};

// Embedding seam
pub use embeddings::{
    blob_to_vector, cosine, normalize, sigmoid, vector_to_blob, CrossEncoder, Embedder,
    EmbeddingError, RerankItem, EMBEDDING_DIMENSIONS,
};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbedder;

#[cfg(feature = "embeddings")]
pub use search::reranker::LocalCrossEncoder;

pub use search::reranker::OverlapCrossEncoder;

// Consolidation
pub use consolidation::{ConsolidationOptions, ConsolidationPreview, ConsolidationReport};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model (multilingual, 1024 dimensions)
pub const DEFAULT_EMBEDDING_MODEL: &str = "intfloat/multilingual-e5-large";

/// Default cross-encoder model
pub const DEFAULT_RERANKER_MODEL: &str = "BAAI/bge-reranker-base";

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AddInput, AddOutcome, AddStatus, ConsolidationOptions, ConsolidationReport, Memory,
        MemoryType, RecallOptions, RecallResult, Result, SearchOptions, Storage, StorageError,
    };
}
