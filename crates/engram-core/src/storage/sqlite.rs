//! SQLite storage implementation
//!
//! Core storage layer with integrated embeddings, lexical search, and the
//! nearest-neighbour index. All high-level operations live here: the
//! write-path dedup/merge/auto-link pipeline, the three search primitives,
//! token-budgeted recall, sessions, access logging, and the sleep cycle.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};

use crate::consolidation::{
    boost_cooldown_elapsed, days_between, decay_base, decay_multiplier, merge_keep_score,
    ConsolidationOptions, ConsolidationPreview, ConsolidationReport,
};
use crate::embeddings::{
    blob_to_vector, cosine, vector_to_blob, CrossEncoder, Embedder, EmbeddingError,
};
use crate::focus;
use crate::memory::{
    AddInput, AddOutcome, AddStatus, DuplicatePair, ExportRecord, Link, LinkRelation, MatchKind,
    Memory, MemoryDetail, MemoryStats, MemoryType, RecallOptions, RecallResult, RecalledMemory,
    SearchHit, SearchOptions, Session, SessionContext, SessionFilter, SourceType,
    AUTO_LINK_THRESHOLD, MAX_AUTO_LINKS, PERMANENT_TAG,
};
use crate::search::hybrid::{fuse_width, quality_boost, reciprocal_rank_fusion, rerank_width};
use crate::search::sanitize_fts5_query;

#[cfg(feature = "vector-search")]
use crate::search::VectorIndex;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Cannot open or migrate the store
    #[error("initialization error: {0}")]
    Init(String),
    /// Rejected before any mutation; the message names the field
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Inference failed; the write was not attempted
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// KNN FILTERS
// ============================================================================

/// Row filters applied to a nearest-neighbour probe
#[derive(Debug, Clone, Default)]
pub struct KnnFilter {
    pub mem_type: Option<MemoryType>,
    pub include_archived: bool,
    pub exclude_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
}

/// Columns selected for every Memory row read
const MEMORY_COLS: &str = "id, mem_type, title, content, importance, strength, access_count, \
     last_accessed_at, created_at, updated_at, source_conversation_id, source_type, archived, \
     (content_embedding IS NOT NULL) AS has_embedding";

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage struct with integrated embedding and vector search.
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making Storage `Send + Sync` so callers can share
/// it behind an `Arc` without an outer lock.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    cross_encoder: Arc<dyn CrossEncoder>,
    #[cfg(feature = "vector-search")]
    vector_index: Option<Mutex<VectorIndex>>,
    /// True when kNN runs as an exact cosine scan over stored blobs
    brute_force: bool,
    /// Query-embedding cache so repeated recalls don't re-embed
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Storage {
    /// Apply pragmas to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Default database location: `<platform data dir>/engram.db`
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "engram", "engram")
            .ok_or_else(|| StorageError::Init("could not determine data directory".into()))?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700));
        }
        Ok(data_dir.join("engram.db"))
    }

    /// Open a store with the default local models
    #[cfg(feature = "embeddings")]
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        Self::with_models(
            db_path,
            Arc::new(crate::embeddings::LocalEmbedder::new()),
            Arc::new(crate::search::reranker::LocalCrossEncoder::new()),
        )
    }

    /// Open a store with injected encoder and cross-encoder implementations
    pub fn with_models(
        db_path: Option<PathBuf>,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Arc<dyn CrossEncoder>,
    ) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let writer = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }

        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        #[cfg(feature = "vector-search")]
        let vector_index = match VectorIndex::new() {
            Ok(index) => Some(Mutex::new(index)),
            Err(e) => {
                tracing::warn!("vector index unavailable, kNN degrades to exact scan: {}", e);
                None
            }
        };

        #[cfg(feature = "vector-search")]
        let brute_force = vector_index.is_none();
        #[cfg(not(feature = "vector-search"))]
        let brute_force = true;

        // SAFETY: 100 is non-zero
        let query_cache = Mutex::new(LruCache::new(NonZeroUsize::new(100).expect("non-zero")));

        let storage = Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            embedder,
            cross_encoder,
            #[cfg(feature = "vector-search")]
            vector_index,
            brute_force,
            query_cache,
        };

        storage.hydrate_vector_index()?;

        Ok(storage)
    }

    /// True when every kNN call runs as an exact cosine scan
    pub fn is_brute_force(&self) -> bool {
        self.brute_force
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("writer lock poisoned".into()))
    }

    fn lock_reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("reader lock poisoned".into()))
    }

    // ========================================================================
    // VECTOR INDEX PLUMBING
    // ========================================================================

    /// Load existing embeddings into the vector index at open
    fn hydrate_vector_index(&self) -> Result<()> {
        #[cfg(feature = "vector-search")]
        {
            let Some(index) = &self.vector_index else {
                return Ok(());
            };

            let rows: Vec<(i64, Vec<u8>)> = {
                let reader = self.lock_reader()?;
                let mut stmt = reader.prepare(
                    "SELECT id, content_embedding FROM memories
                     WHERE content_embedding IS NOT NULL",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            };

            let index = index
                .lock()
                .map_err(|_| StorageError::Init("vector index lock poisoned".into()))?;
            for (id, blob) in rows {
                if let Some(vector) = blob_to_vector(&blob) {
                    if let Err(e) = index.upsert(id, &vector) {
                        tracing::warn!("failed to index embedding for {}: {}", id, e);
                    }
                }
            }
        }
        Ok(())
    }

    fn index_upsert(&self, id: i64, vector: &[f32]) {
        #[cfg(feature = "vector-search")]
        if let Some(index) = &self.vector_index {
            match index.lock() {
                Ok(index) => {
                    if let Err(e) = index.upsert(id, vector) {
                        tracing::warn!("vector index upsert failed for {}: {}", id, e);
                    }
                }
                Err(_) => tracing::warn!("vector index lock poisoned on upsert"),
            }
        }
        #[cfg(not(feature = "vector-search"))]
        let _ = (id, vector);
    }

    fn index_remove(&self, id: i64) {
        #[cfg(feature = "vector-search")]
        if let Some(index) = &self.vector_index {
            match index.lock() {
                Ok(index) => {
                    let _ = index.remove(id);
                }
                Err(_) => tracing::warn!("vector index lock poisoned on remove"),
            }
        }
        #[cfg(not(feature = "vector-search"))]
        let _ = id;
    }

    #[cfg(feature = "vector-search")]
    fn index_search(&self, vector: &[f32], limit: usize) -> Option<Vec<(i64, f32)>> {
        let index = self.vector_index.as_ref()?;
        match index.lock() {
            Ok(index) => match index.search(vector, limit) {
                Ok(hits) => Some(hits),
                Err(e) => {
                    tracing::warn!("vector index search failed, using exact scan: {}", e);
                    None
                }
            },
            Err(_) => None,
        }
    }

    #[cfg(not(feature = "vector-search"))]
    fn index_search(&self, _vector: &[f32], _limit: usize) -> Option<Vec<(i64, f32)>> {
        None
    }

    /// Nearest neighbours as `(id, similarity)`, similarity descending.
    ///
    /// Uses the HNSW index when available, over-fetching to absorb the row
    /// filters; otherwise an exact cosine scan over stored blobs with the
    /// same shape.
    fn knn(&self, vector: &[f32], k: usize, filter: &KnnFilter) -> Result<Vec<(i64, f32)>> {
        if k == 0 {
            return Ok(vec![]);
        }

        if let Some(candidates) = self.index_search(vector, (4 * k).max(k + 16)) {
            let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
            let allowed = self.filter_ids(&ids, filter)?;
            return Ok(candidates
                .into_iter()
                .filter(|(id, _)| allowed.contains(id))
                .take(k)
                .collect());
        }

        self.knn_exact(vector, k, filter)
    }

    /// Exact cosine scan fallback
    fn knn_exact(&self, vector: &[f32], k: usize, filter: &KnnFilter) -> Result<Vec<(i64, f32)>> {
        let mut sql = String::from(
            "SELECT id, content_embedding FROM memories WHERE content_embedding IS NOT NULL",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if !filter.include_archived {
            sql.push_str(" AND archived = 0");
        }
        if let Some(t) = filter.mem_type {
            sql.push_str(" AND mem_type = ?");
            args.push(Box::new(t.as_str()));
        }
        if let Some(id) = filter.exclude_id {
            sql.push_str(" AND id != ?");
            args.push(Box::new(id));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows: Vec<(i64, Vec<u8>)> = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(reader);

        let mut scored: Vec<(i64, f32)> = rows
            .into_iter()
            .filter_map(|(id, blob)| {
                let candidate = blob_to_vector(&blob)?;
                cosine(vector, &candidate).ok().map(|sim| (id, sim))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Of `ids`, the subset passing the filter
    fn filter_ids(&self, ids: &[i64], filter: &KnnFilter) -> Result<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let mut sql = format!("SELECT id FROM memories WHERE id IN ({})", placeholders);
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>).collect();

        if !filter.include_archived {
            sql.push_str(" AND archived = 0");
        }
        if let Some(t) = filter.mem_type {
            sql.push_str(" AND mem_type = ?");
            args.push(Box::new(t.as_str()));
        }
        if let Some(id) = filter.exclude_id {
            sql.push_str(" AND id != ?");
            args.push(Box::new(id));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let set = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                row.get::<_, i64>(0)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(set)
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    fn parse_timestamp(value: &str, field: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid {} timestamp '{}': {}", field, value, e),
                    )),
                )
            })
    }

    fn parse_enum<T: std::str::FromStr<Err = String>>(
        value: &str,
        field: &str,
    ) -> rusqlite::Result<T> {
        value.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid {}: {}", field, e),
                )),
            )
        })
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let mem_type: String = row.get("mem_type")?;
        let source_type: String = row.get("source_type")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let last_accessed_at: Option<String> = row.get("last_accessed_at")?;

        Ok(Memory {
            id: row.get("id")?,
            mem_type: Self::parse_enum::<MemoryType>(&mem_type, "mem_type")?,
            title: row.get("title")?,
            content: row.get("content")?,
            importance: row.get("importance")?,
            strength: row.get("strength")?,
            access_count: row.get("access_count")?,
            last_accessed_at: last_accessed_at
                .map(|s| Self::parse_timestamp(&s, "last_accessed_at"))
                .transpose()?,
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at, "updated_at")?,
            source_conversation_id: row.get("source_conversation_id")?,
            source_type: Self::parse_enum::<SourceType>(&source_type, "source_type")?,
            archived: row.get::<_, i64>("archived")? != 0,
            has_embedding: row.get::<_, i64>("has_embedding")? != 0,
        })
    }

    fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<Link> {
        let relation: String = row.get("relation")?;
        let created_at: String = row.get("created_at")?;
        Ok(Link {
            source_id: row.get("source_id")?,
            target_id: row.get("target_id")?,
            relation: Self::parse_enum::<LinkRelation>(&relation, "relation")?,
            strength: row.get("strength")?,
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let started_at: String = row.get("started_at")?;
        let ended_at: Option<String> = row.get("ended_at")?;
        Ok(Session {
            id: row.get("id")?,
            title: row.get("title")?,
            summary: row.get("summary")?,
            started_at: Self::parse_timestamp(&started_at, "started_at")?,
            ended_at: ended_at
                .map(|s| Self::parse_timestamp(&s, "ended_at"))
                .transpose()?,
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Get a memory by id
    pub fn get(&self, id: i64) -> Result<Option<Memory>> {
        let reader = self.lock_reader()?;
        let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLS);
        let mut stmt = reader.prepare(&sql)?;
        Ok(stmt
            .query_row(params![id], |row| Self::row_to_memory(row))
            .optional()?)
    }

    /// Get a memory with its tags and adjacent links
    pub fn get_detail(&self, id: i64) -> Result<Option<MemoryDetail>> {
        let Some(memory) = self.get(id)? else {
            return Ok(None);
        };
        let tags = self.tags_of(id)?;
        let (links_out, links_in) = self.links_of(id)?;
        Ok(Some(MemoryDetail {
            memory,
            tags,
            links_out,
            links_in,
        }))
    }

    fn memories_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Memory>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {} FROM memories WHERE id IN ({})",
            MEMORY_COLS, placeholders
        );
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let map = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Self::row_to_memory(row)
            })?
            .filter_map(|r| r.ok())
            .map(|m| (m.id, m))
            .collect();
        Ok(map)
    }

    /// Stored embedding for a memory, if present
    pub fn embedding_of(&self, id: i64) -> Result<Option<Vec<f32>>> {
        let reader = self.lock_reader()?;
        let blob: Option<Vec<u8>> = reader
            .query_row(
                "SELECT content_embedding FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(blob.and_then(|b| blob_to_vector(&b)))
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Add a memory, running the dedup / merge-on-write / auto-link pipeline
    pub fn add(&self, input: AddInput) -> Result<AddOutcome> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(StorageError::InvalidInput("title must be non-empty".into()));
        }
        if !(0.0..=1.0).contains(&input.importance) {
            return Err(StorageError::InvalidInput(format!(
                "importance must be in [0,1], got {}",
                input.importance
            )));
        }
        for link in &input.links {
            if self.get(link.target_id)?.is_none() {
                return Err(StorageError::InvalidInput(format!(
                    "link target {} not found",
                    link.target_id
                )));
            }
        }

        // 1. Exact duplicate: same type and title, not archived
        let existing: Option<i64> = {
            let reader = self.lock_reader()?;
            reader
                .query_row(
                    "SELECT id FROM memories
                     WHERE mem_type = ?1 AND title = ?2 AND archived = 0
                     ORDER BY id LIMIT 1",
                    params![input.mem_type.as_str(), title],
                    |row| row.get(0),
                )
                .optional()?
        };
        if let Some(id) = existing {
            self.touch_access(id)?;
            self.add_tags(id, &input.tags)?;
            return Ok(AddOutcome {
                id,
                status: AddStatus::Duplicate,
                merged_into: None,
            });
        }

        // 2. Embed; failure aborts the write
        let embed_text = format!("{}\n{}", title, input.content);
        let embedding = self.embedder.embed(&embed_text)?;

        // 3. Semantic near-duplicate within the same type. Skipped when the
        //    vector index is unavailable; a degraded store still accepts
        //    writes.
        if !self.brute_force {
            let probe = self.knn(
                &embedding,
                1,
                &KnnFilter {
                    mem_type: Some(input.mem_type),
                    ..Default::default()
                },
            )?;
            if let Some(&(neighbour_id, similarity)) = probe.first() {
                if similarity >= crate::memory::DEFAULT_MERGE_THRESHOLD {
                    let id = self.merge_into_existing(neighbour_id, &title, &input.content)?;
                    self.add_tags(id, &input.tags)?;
                    return Ok(AddOutcome {
                        id,
                        status: AddStatus::Merged,
                        merged_into: Some(id),
                    });
                }
            }
        }

        // 4. Insert
        let now = Utc::now().to_rfc3339();
        let id: i64 = {
            let writer = self.lock_writer()?;
            writer.execute(
                "INSERT INTO memories (
                     mem_type, title, content, content_embedding, importance,
                     source_conversation_id, source_type, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    input.mem_type.as_str(),
                    title,
                    input.content,
                    vector_to_blob(&embedding),
                    input.importance,
                    input.source_conversation_id,
                    input.source_type.as_str(),
                    now,
                ],
            )?;
            writer.last_insert_rowid()
        };
        self.index_upsert(id, &embedding);

        // 5. Tags
        self.add_tags(id, &input.tags)?;

        // 6. Explicit links, replace on conflict
        if !input.links.is_empty() {
            let writer = self.lock_writer()?;
            for link in &input.links {
                writer.execute(
                    "INSERT OR REPLACE INTO links (source_id, target_id, relation, strength, created_at)
                     VALUES (?1, ?2, ?3, 0.5, ?4)",
                    params![id, link.target_id, link.relation.as_str(), now],
                )?;
            }
        }

        // 7. Auto-link to nearest neighbours; best-effort, never fails the add
        if input.auto_link && !self.brute_force {
            if let Err(e) = self.auto_link(id, &embedding) {
                tracing::warn!("auto-link failed for {}: {}", id, e);
            }
        }

        Ok(AddOutcome {
            id,
            status: AddStatus::Created,
            merged_into: None,
        })
    }

    /// Fold new content into a semantically near-identical memory
    fn merge_into_existing(&self, id: i64, new_title: &str, new_content: &str) -> Result<i64> {
        let existing = self
            .get(id)?
            .ok_or_else(|| StorageError::Init(format!("merge target {} vanished", id)))?;

        // Substring check keeps repeated merges byte-stable
        let content = if new_content.is_empty() || existing.content.contains(new_content) {
            existing.content.clone()
        } else {
            format!("{}\n\n---\n{}", existing.content, new_content)
        };
        let title = if new_title.len() > existing.title.len() {
            new_title.to_string()
        } else {
            existing.title.clone()
        };

        let embedding = self.embedder.embed(&format!("{}\n{}", title, content))?;
        let now = Utc::now().to_rfc3339();
        {
            let writer = self.lock_writer()?;
            writer.execute(
                "UPDATE memories SET
                     title = ?1,
                     content = ?2,
                     content_embedding = ?3,
                     strength = MIN(1.0, strength * 1.1),
                     updated_at = ?4
                 WHERE id = ?5",
                params![title, content, vector_to_blob(&embedding), now, id],
            )?;
        }
        self.index_upsert(id, &embedding);
        self.touch_access(id)?;
        Ok(id)
    }

    /// Create related_to edges to the closest semantic neighbours
    fn auto_link(&self, id: i64, embedding: &[f32]) -> Result<usize> {
        let neighbours = self.knn(
            embedding,
            MAX_AUTO_LINKS + 5,
            &KnnFilter {
                exclude_id: Some(id),
                ..Default::default()
            },
        )?;

        let now = Utc::now().to_rfc3339();
        let writer = self.lock_writer()?;
        let mut created = 0;
        for (neighbour, similarity) in neighbours {
            if created >= MAX_AUTO_LINKS {
                break;
            }
            if similarity < AUTO_LINK_THRESHOLD {
                continue;
            }
            let strength = (similarity as f64 * 100.0).round() / 100.0;
            writer.execute(
                "INSERT OR IGNORE INTO links (source_id, target_id, relation, strength, created_at)
                 VALUES (?1, ?2, 'related_to', ?3, ?4)",
                params![id, neighbour, strength, now],
            )?;
            created += 1;
        }
        Ok(created)
    }

    /// Update fields of an existing memory; false when the id is unknown.
    /// Title or content changes re-embed.
    pub fn update(&self, id: i64, patch: crate::memory::UpdatePatch) -> Result<bool> {
        let Some(existing) = self.get(id)? else {
            return Ok(false);
        };

        if let Some(i) = patch.importance {
            if !(0.0..=1.0).contains(&i) {
                return Err(StorageError::InvalidInput(format!(
                    "importance must be in [0,1], got {}",
                    i
                )));
            }
        }
        if let Some(s) = patch.strength {
            if !(0.0..=1.0).contains(&s) {
                return Err(StorageError::InvalidInput(format!(
                    "strength must be in [0,1], got {}",
                    s
                )));
            }
        }

        let title = patch.title.unwrap_or_else(|| existing.title.clone());
        if title.trim().is_empty() {
            return Err(StorageError::InvalidInput("title must be non-empty".into()));
        }
        let content = patch.content.unwrap_or_else(|| existing.content.clone());
        let reembed = title != existing.title || content != existing.content;

        let embedding = if reembed {
            Some(self.embedder.embed(&format!("{}\n{}", title, content))?)
        } else {
            None
        };

        let now = Utc::now().to_rfc3339();
        {
            let writer = self.lock_writer()?;
            writer.execute(
                "UPDATE memories SET
                     title = ?1,
                     content = ?2,
                     importance = COALESCE(?3, importance),
                     strength = COALESCE(?4, strength),
                     content_embedding = COALESCE(?5, content_embedding),
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    title,
                    content,
                    patch.importance,
                    patch.strength,
                    embedding.as_deref().map(vector_to_blob),
                    now,
                    id
                ],
            )?;
        }
        if let Some(embedding) = &embedding {
            self.index_upsert(id, embedding);
        }
        Ok(true)
    }

    /// Hard delete; cascades remove tag joins, links, and access log rows
    pub fn delete(&self, id: i64) -> Result<bool> {
        let rows = {
            let writer = self.lock_writer()?;
            writer.execute("DELETE FROM memories WHERE id = ?1", params![id])?
        };
        if rows > 0 {
            self.index_remove(id);
        }
        Ok(rows > 0)
    }

    /// Archive or unarchive without deleting
    pub fn set_archived(&self, id: i64, archived: bool) -> Result<bool> {
        let writer = self.lock_writer()?;
        let rows = writer.execute(
            "UPDATE memories SET archived = ?1, updated_at = ?2 WHERE id = ?3",
            params![archived as i64, Utc::now().to_rfc3339(), id],
        )?;
        Ok(rows > 0)
    }

    // ========================================================================
    // TAGS
    // ========================================================================

    fn normalize_tag(tag: &str) -> String {
        tag.trim().to_lowercase()
    }

    /// Upsert tags onto a memory; idempotent on the join
    pub fn add_tags(&self, id: i64, tags: &[String]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let writer = self.lock_writer()?;
        for raw in tags {
            let name = Self::normalize_tag(raw);
            if name.is_empty() {
                continue;
            }
            writer.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
            writer.execute(
                "INSERT OR IGNORE INTO memory_tags (memory_id, tag_id)
                 SELECT ?1, id FROM tags WHERE name = ?2",
                params![id, name],
            )?;
        }
        Ok(())
    }

    /// Detach a tag from a memory; false when the join did not exist
    pub fn remove_tag(&self, id: i64, tag: &str) -> Result<bool> {
        let name = Self::normalize_tag(tag);
        let writer = self.lock_writer()?;
        let rows = writer.execute(
            "DELETE FROM memory_tags
             WHERE memory_id = ?1 AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
            params![id, name],
        )?;
        Ok(rows > 0)
    }

    /// Tags of one memory, sorted
    pub fn tags_of(&self, id: i64) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT t.name FROM tags t
             JOIN memory_tags mt ON mt.tag_id = t.id
             WHERE mt.memory_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tags)
    }

    /// All tags with usage counts
    pub fn list_tags(&self) -> Result<Vec<(String, i64)>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT t.name, COUNT(mt.memory_id) FROM tags t
             LEFT JOIN memory_tags mt ON mt.tag_id = t.id
             GROUP BY t.id
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tags)
    }

    /// Toggle the decay/prune exemption tag
    pub fn mark_permanent(&self, id: i64, permanent: bool) -> Result<bool> {
        if self.get(id)?.is_none() {
            return Ok(false);
        }
        if permanent {
            self.add_tags(id, &[PERMANENT_TAG.to_string()])?;
            Ok(true)
        } else {
            self.remove_tag(id, PERMANENT_TAG)
        }
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Create or replace a directed edge; false when either endpoint is missing
    pub fn link(&self, source_id: i64, target_id: i64, relation: LinkRelation) -> Result<bool> {
        if self.get(source_id)?.is_none() || self.get(target_id)?.is_none() {
            return Ok(false);
        }
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO links (source_id, target_id, relation, strength, created_at)
             VALUES (?1, ?2, ?3, 0.5, ?4)",
            params![
                source_id,
                target_id,
                relation.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(true)
    }

    /// Outgoing and incoming links of a memory
    pub fn links_of(&self, id: i64) -> Result<(Vec<Link>, Vec<Link>)> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT source_id, target_id, relation, strength, created_at
             FROM links WHERE source_id = ?1 ORDER BY target_id",
        )?;
        let out = stmt
            .query_map(params![id], |row| Self::row_to_link(row))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = reader.prepare(
            "SELECT source_id, target_id, relation, strength, created_at
             FROM links WHERE target_id = ?1 ORDER BY source_id",
        )?;
        let incoming = stmt
            .query_map(params![id], |row| Self::row_to_link(row))?
            .filter_map(|r| r.ok())
            .collect();

        Ok((out, incoming))
    }

    /// Undirected neighbour ids of a frontier, ascending and deduplicated
    fn link_neighbours(&self, frontier: &[i64]) -> Result<Vec<i64>> {
        if frontier.is_empty() {
            return Ok(vec![]);
        }
        let placeholders = frontier.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT source_id, target_id FROM links
             WHERE source_id IN ({0}) OR target_id IN ({0})",
            placeholders
        );
        let in_frontier: HashSet<i64> = frontier.iter().copied().collect();

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let args: Vec<i64> = frontier.iter().chain(frontier.iter()).copied().collect();
        let edges: Vec<(i64, i64)> = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(reader);

        let mut neighbours: Vec<i64> = edges
            .into_iter()
            .flat_map(|(s, t)| [s, t])
            .filter(|id| !in_frontier.contains(id))
            .collect();
        neighbours.sort_unstable();
        neighbours.dedup();
        Ok(neighbours)
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Compile a `{N}{h|d|w|m}` window into an absolute lower bound
    pub(crate) fn since_bound(spec: &str) -> Result<DateTime<Utc>> {
        let spec = spec.trim();
        let err = || {
            StorageError::InvalidInput(format!(
                "invalid since window '{}': expected {{N}}{{h|d|w|m}}",
                spec
            ))
        };

        if spec.len() < 2 {
            return Err(err());
        }
        let (number, unit) = spec.split_at(spec.len() - 1);
        let n: i64 = number.parse().map_err(|_| err())?;
        if n < 0 {
            return Err(err());
        }
        let duration = match unit {
            "h" => Duration::hours(n),
            "d" => Duration::days(n),
            "w" => Duration::weeks(n),
            "m" => Duration::days(30 * n),
            _ => return Err(err()),
        };
        Ok(Utc::now() - duration)
    }

    /// Query embedding with an LRU cache over repeated queries
    fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        {
            let mut cache = self
                .query_cache
                .lock()
                .map_err(|_| StorageError::Init("query cache lock poisoned".into()))?;
            if let Some(hit) = cache.get(query) {
                return Ok(hit.clone());
            }
        }

        let embedding = self.embedder.embed(query)?;

        let mut cache = self
            .query_cache
            .lock()
            .map_err(|_| StorageError::Init("query cache lock poisoned".into()))?;
        cache.put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Embedding nearest-neighbour search
    pub fn search_semantic(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let since = opts.since.as_deref().map(Self::since_bound).transpose()?;
        let embedding = self.query_embedding(query)?;

        let filter = KnnFilter {
            mem_type: opts.mem_type,
            include_archived: opts.include_archived,
            exclude_id: None,
            since,
        };
        let candidates = self.knn(&embedding, 2 * opts.k, &filter)?;
        let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
        let mut memories = self.memories_by_ids(&ids)?;

        Ok(candidates
            .into_iter()
            .filter_map(|(id, similarity)| {
                memories.remove(&id).map(|memory| SearchHit {
                    memory,
                    score: similarity as f64,
                    match_kind: MatchKind::Semantic,
                })
            })
            .take(opts.k)
            .collect())
    }

    /// BM25 ranked ids; score is the negated FTS5 rank (higher is better)
    fn fts_ranked(
        &self,
        query: &str,
        k: usize,
        mem_type: Option<MemoryType>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<(i64, f64)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(vec![]);
        }

        let mut sql = String::from(
            "SELECT m.id, rank FROM memories_fts f
             JOIN memories m ON m.id = f.rowid
             WHERE memories_fts MATCH ? AND m.archived = 0",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(sanitized)];
        if let Some(t) = mem_type {
            sql.push_str(" AND m.mem_type = ?");
            args.push(Box::new(t.as_str()));
        }
        if let Some(bound) = since {
            sql.push_str(" AND m.created_at >= ?");
            args.push(Box::new(bound.to_rfc3339()));
        }
        sql.push_str(" ORDER BY rank LIMIT ?");
        args.push(Box::new(k as i64));

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, rank)| (id, -rank))
            .collect();
        Ok(rows)
    }

    /// Lexical (FTS5/BM25) search; never returns archived rows
    pub fn search_fts(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let since = opts.since.as_deref().map(Self::since_bound).transpose()?;
        let ranked = self.fts_ranked(query, opts.k, opts.mem_type, since)?;
        let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let mut memories = self.memories_by_ids(&ids)?;

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                memories.remove(&id).map(|memory| SearchHit {
                    memory,
                    score,
                    match_kind: MatchKind::Lexical,
                })
            })
            .collect())
    }

    /// Hybrid search: RRF fusion of the semantic and lexical lists, optional
    /// cross-encoder rerank, optional breadth-first link expansion
    pub fn search_hybrid(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let since = opts.since.as_deref().map(Self::since_bound).transpose()?;
        let fetch = fuse_width(opts.k);

        // Floor keeps arbitrarily-distant neighbours out of the fuse; kNN
        // itself has no minimum
        const MIN_SEMANTIC_SIMILARITY: f32 = 0.3;

        let semantic: Vec<(i64, f64)> = match self.query_embedding(query) {
            Ok(embedding) => {
                let filter = KnnFilter {
                    mem_type: opts.mem_type,
                    include_archived: false,
                    exclude_id: None,
                    since,
                };
                self.knn(&embedding, fetch, &filter)?
                    .into_iter()
                    .filter(|(_, sim)| *sim >= MIN_SEMANTIC_SIMILARITY)
                    .map(|(id, sim)| (id, sim as f64))
                    .collect()
            }
            Err(e) => {
                tracing::warn!("semantic arm unavailable for hybrid search: {}", e);
                vec![]
            }
        };
        let lexical = self.fts_ranked(query, fetch, opts.mem_type, since)?;

        let mut ids: Vec<i64> = semantic.iter().map(|(id, _)| *id).collect();
        ids.extend(lexical.iter().map(|(id, _)| *id));
        ids.sort_unstable();
        ids.dedup();
        let memories = self.memories_by_ids(&ids)?;

        let quality: HashMap<i64, f64> = memories
            .iter()
            .map(|(id, m)| (*id, quality_boost(m.importance, m.strength)))
            .collect();
        let fused = reciprocal_rank_fusion(&semantic, &lexical, opts.rrf_k, &quality);

        let semantic_ids: HashSet<i64> = semantic.iter().map(|(id, _)| *id).collect();
        let lexical_ids: HashSet<i64> = lexical.iter().map(|(id, _)| *id).collect();

        let mut hits: Vec<SearchHit> = fused
            .into_iter()
            .filter_map(|(id, score)| {
                let memory = memories.get(&id)?.clone();
                let match_kind = match (semantic_ids.contains(&id), lexical_ids.contains(&id)) {
                    (true, true) => MatchKind::Both,
                    (true, false) => MatchKind::Semantic,
                    _ => MatchKind::Lexical,
                };
                Some(SearchHit {
                    memory,
                    score,
                    match_kind,
                })
            })
            .collect();

        if opts.rerank && !hits.is_empty() {
            hits.truncate(rerank_width(opts.k));
            let docs: Vec<String> = hits
                .iter()
                .map(|h| format!("{}\n{}", h.memory.title, h.memory.content))
                .collect();
            let doc_refs: Vec<&str> = docs.iter().map(|d| d.as_str()).collect();
            match self.cross_encoder.rerank(query, &doc_refs, None) {
                Ok(items) => {
                    hits = items
                        .into_iter()
                        .filter_map(|item| {
                            hits.get(item.index).map(|hit| SearchHit {
                                memory: hit.memory.clone(),
                                score: item.score as f64,
                                match_kind: hit.match_kind,
                            })
                        })
                        .collect();
                }
                Err(e) => {
                    tracing::warn!("cross-encoder unavailable, keeping fused order: {}", e);
                }
            }
        }

        hits.truncate(opts.k);

        if opts.hops > 0 {
            let max_total = opts.max_total.unwrap_or(opts.k);
            self.expand_hops(&mut hits, opts.hops, max_total)?;
        }

        Ok(hits)
    }

    /// Breadth-first expansion along links in both directions. Expansion
    /// results carry the sentinel score -1 and are appended until the result
    /// reaches `max_total`.
    fn expand_hops(&self, hits: &mut Vec<SearchHit>, hops: usize, max_total: usize) -> Result<()> {
        let mut visited: HashSet<i64> = hits.iter().map(|h| h.memory.id).collect();
        let mut frontier: Vec<i64> = hits.iter().map(|h| h.memory.id).collect();

        for _ in 0..hops {
            if hits.len() >= max_total || frontier.is_empty() {
                break;
            }
            let neighbours = self.link_neighbours(&frontier)?;
            let mut next = Vec::new();
            for id in neighbours {
                if hits.len() >= max_total {
                    break;
                }
                if !visited.insert(id) {
                    continue;
                }
                if let Some(memory) = self.get(id)? {
                    if memory.archived {
                        continue;
                    }
                    hits.push(SearchHit {
                        memory,
                        score: -1.0,
                        match_kind: MatchKind::Graph,
                    });
                    next.push(id);
                }
            }
            frontier = next;
        }
        Ok(())
    }

    // ========================================================================
    // FOCUS OF ATTENTION
    // ========================================================================

    /// Assemble task-relevant context within a token budget
    pub fn recall(&self, query: &str, opts: &RecallOptions) -> Result<RecallResult> {
        let hits = self.search_hybrid(
            query,
            &SearchOptions {
                k: opts.k,
                mem_type: opts.mem_type,
                ..Default::default()
            },
        )?;

        let now = Utc::now();
        let mut scored: Vec<RecalledMemory> = hits
            .into_iter()
            .map(|hit| {
                let rendered = focus::render_memory(&hit.memory);
                RecalledMemory {
                    relevance: hit.score,
                    composite: focus::composite_score(hit.score, &hit.memory, now),
                    tokens: focus::estimate_tokens(&rendered),
                    memory: hit.memory,
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (packed, mut total) = focus::pack_budget(scored, opts.budget);

        let session_context = match &opts.session_id {
            Some(session_id) => self
                .session_get(session_id)?
                .and_then(|session| session.summary),
            None => None,
        };
        if let Some(context) = &session_context {
            total += focus::estimate_tokens(context);
        }

        // Access logging is best-effort; recall never fails on it
        for recalled in &packed {
            if let Err(e) = self.log_access(
                recalled.memory.id,
                opts.session_id.as_deref(),
                Some(query),
                Some(recalled.composite),
            ) {
                tracing::warn!("access log failed for {}: {}", recalled.memory.id, e);
            }
        }

        Ok(RecallResult {
            memories: packed,
            session_context,
            total_tokens_estimate: total,
        })
    }

    // ========================================================================
    // SESSIONS & ACCESS LOG
    // ========================================================================

    /// Create or replace a session; a fresh UUID is used when no id is given
    pub fn session_start(&self, id: Option<String>, title: Option<String>) -> Result<Session> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        {
            let writer = self.lock_writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO sessions (id, title, summary, summary_embedding, started_at, ended_at)
                 VALUES (?1, ?2, NULL, NULL, ?3, NULL)",
                params![id, title, now],
            )?;
        }
        self.session_get(&id)?
            .ok_or_else(|| StorageError::Init(format!("session {} vanished after start", id)))
    }

    /// End a session, optionally attaching an embedded summary.
    /// False when the session does not exist.
    pub fn session_end(&self, id: &str, summary: Option<&str>) -> Result<bool> {
        if self.session_get(id)?.is_none() {
            return Ok(false);
        }

        let summary_blob = match summary {
            Some(text) if !text.is_empty() => Some(vector_to_blob(&self.embedder.embed(text)?)),
            _ => None,
        };

        let writer = self.lock_writer()?;
        writer.execute(
            "UPDATE sessions SET
                 ended_at = ?1,
                 summary = COALESCE(?2, summary),
                 summary_embedding = COALESCE(?3, summary_embedding)
             WHERE id = ?4",
            params![Utc::now().to_rfc3339(), summary, summary_blob, id],
        )?;
        Ok(true)
    }

    /// Session row by id
    pub fn session_get(&self, id: &str) -> Result<Option<Session>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, title, summary, started_at, ended_at FROM sessions WHERE id = ?1",
        )?;
        Ok(stmt
            .query_row(params![id], |row| Self::row_to_session(row))
            .optional()?)
    }

    /// A session plus the distinct memories accessed under it,
    /// most recent access first
    pub fn session_context(&self, id: &str) -> Result<Option<SessionContext>> {
        let Some(session) = self.session_get(id)? else {
            return Ok(None);
        };

        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM memories m
             JOIN (
                 SELECT memory_id, MAX(accessed_at) AS last_hit
                 FROM access_log WHERE session_id = ?1
                 GROUP BY memory_id
             ) a ON a.memory_id = m.id
             WHERE m.archived = 0
             ORDER BY a.last_hit DESC",
            MEMORY_COLS
        );
        let mut stmt = reader.prepare(&sql)?;
        let memories = stmt
            .query_map(params![id], |row| Self::row_to_memory(row))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(SessionContext { session, memories }))
    }

    /// Sessions, newest first
    pub fn session_list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let mut sql =
            String::from("SELECT id, title, summary, started_at, ended_at FROM sessions WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(since) = filter.since {
            sql.push_str(" AND started_at >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND started_at <= ?");
            args.push(Box::new(until.to_rfc3339()));
        }
        sql.push_str(" ORDER BY started_at DESC LIMIT ?");
        args.push(Box::new(filter.limit as i64));

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let sessions = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                Self::row_to_session(row)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(sessions)
    }

    /// Append an access event and atomically bump the memory's counter
    pub fn log_access(
        &self,
        memory_id: i64,
        session_id: Option<&str>,
        query: Option<&str>,
        relevance_score: Option<f64>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut writer = self.lock_writer()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO access_log (memory_id, session_id, query, relevance_score, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![memory_id, session_id, query, relevance_score, now],
        )?;
        tx.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1
             WHERE id = ?2",
            params![now, memory_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Bump access state outside of any session (duplicate and merged adds)
    fn touch_access(&self, memory_id: i64) -> Result<()> {
        self.log_access(memory_id, None, None, None)
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    fn last_consolidation(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .meta_get("last_consolidation_at")?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Run the sleep cycle: decay, prune, merge, extract (no-op), boost.
    ///
    /// Any sub-step failure aborts before `last_consolidation_at` is
    /// written, so a retry integrates from the same base.
    pub fn run_consolidation(&self, opts: &ConsolidationOptions) -> Result<ConsolidationReport> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let last = self.last_consolidation()?;

        let decayed = self.step_decay(opts, last, now)?;
        let pruned = self.step_prune(opts)?;
        let merged = self.step_merge(opts)?;
        let extracted = self.step_extract();
        let boosted = self.step_boost(opts, last, now)?;

        if !opts.dry_run {
            self.meta_set("last_consolidation_at", &now.to_rfc3339())?;
        }

        let report = ConsolidationReport {
            decayed,
            pruned,
            merged,
            extracted,
            boosted,
            dry_run: opts.dry_run,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "consolidation{}: {} decayed, {} pruned, {} merged, {} boosted in {}ms",
            if opts.dry_run { " (dry run)" } else { "" },
            report.decayed,
            report.pruned,
            report.merged,
            report.boosted,
            report.duration_ms
        );
        Ok(report)
    }

    /// Non-archived, non-permanent candidate rows for decay/prune
    const NOT_PERMANENT: &'static str = "id NOT IN (
        SELECT mt.memory_id FROM memory_tags mt
        JOIN tags t ON t.id = mt.tag_id
        WHERE t.name = 'permanent'
    )";

    fn step_decay(
        &self,
        opts: &ConsolidationOptions,
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT id, strength, last_accessed_at, created_at FROM memories
             WHERE archived = 0 AND {}",
            Self::NOT_PERMANENT
        );

        let candidates: Vec<(i64, f64, Option<String>, String)> = {
            let reader = self.lock_reader()?;
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut decayed = 0u64;
        let writer = if opts.dry_run {
            None
        } else {
            Some(self.lock_writer()?)
        };

        for (id, strength, last_accessed, created) in candidates {
            let last_accessed = last_accessed
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let created = DateTime::parse_from_rfc3339(&created)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);

            let base = decay_base(last, last_accessed, created);
            let multiplier = decay_multiplier(opts.decay_rate, days_between(base, now));
            if multiplier >= 1.0 {
                continue;
            }
            decayed += 1;
            if let Some(writer) = &writer {
                writer.execute(
                    "UPDATE memories SET strength = MAX(0.0, MIN(1.0, ?1)) WHERE id = ?2",
                    params![strength * multiplier, id],
                )?;
            }
        }
        Ok(decayed)
    }

    fn step_prune(&self, opts: &ConsolidationOptions) -> Result<u64> {
        if opts.dry_run {
            let sql = format!(
                "SELECT COUNT(*) FROM memories
                 WHERE archived = 0 AND strength < ?1 AND {}",
                Self::NOT_PERMANENT
            );
            let reader = self.lock_reader()?;
            let count: i64 =
                reader.query_row(&sql, params![opts.prune_threshold], |row| row.get(0))?;
            return Ok(count as u64);
        }

        let sql = format!(
            "UPDATE memories SET archived = 1
             WHERE archived = 0 AND strength < ?1 AND {}",
            Self::NOT_PERMANENT
        );
        let writer = self.lock_writer()?;
        let rows = writer.execute(&sql, params![opts.prune_threshold])?;
        Ok(rows as u64)
    }

    fn step_merge(&self, opts: &ConsolidationOptions) -> Result<u64> {
        if opts.dry_run {
            return self.count_merge_candidates(opts.merge_threshold);
        }

        // Ascending id iteration keeps merge order deterministic
        let ids: Vec<i64> = {
            let reader = self.lock_reader()?;
            let mut stmt =
                reader.prepare("SELECT id FROM memories WHERE archived = 0 ORDER BY id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            ids
        };

        let mut gone: HashSet<i64> = HashSet::new();
        let mut merged = 0u64;

        for id in ids {
            if gone.contains(&id) {
                continue;
            }
            let Some(memory) = self.get(id)? else {
                continue;
            };
            if memory.archived {
                continue;
            }
            let Some(embedding) = self.embedding_of(id)? else {
                continue;
            };

            let neighbours = self.knn(
                &embedding,
                5,
                &KnnFilter {
                    mem_type: Some(memory.mem_type),
                    exclude_id: Some(id),
                    ..Default::default()
                },
            )?;

            for (neighbour, similarity) in neighbours {
                if similarity < opts.merge_threshold || gone.contains(&neighbour) {
                    continue;
                }
                let removed = self.merge_pair(id, neighbour)?;
                gone.insert(removed);
                merged += 1;
                if removed == id {
                    break;
                }
            }
        }
        Ok(merged)
    }

    /// Merge two same-type near-duplicates; returns the archived id
    fn merge_pair(&self, a_id: i64, b_id: i64) -> Result<i64> {
        let a = self
            .get(a_id)?
            .ok_or_else(|| StorageError::Init(format!("merge source {} vanished", a_id)))?;
        let b = self
            .get(b_id)?
            .ok_or_else(|| StorageError::Init(format!("merge source {} vanished", b_id)))?;

        let (keep, lose) = if merge_keep_score(b.importance, b.access_count)
            > merge_keep_score(a.importance, a.access_count)
        {
            (b, a)
        } else {
            (a, b)
        };

        let content = format!(
            "{}\n\n[Merged from: {}]\n{}",
            keep.content, lose.title, lose.content
        );
        let embedding = self.embedder.embed(&format!("{}\n{}", keep.title, content))?;

        let now = Utc::now().to_rfc3339();
        {
            let mut writer = self.lock_writer()?;
            let tx = writer.transaction()?;
            tx.execute(
                "UPDATE memories SET
                     content = ?1,
                     content_embedding = ?2,
                     importance = ?3,
                     strength = ?4,
                     access_count = ?5,
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    content,
                    vector_to_blob(&embedding),
                    keep.importance.max(lose.importance),
                    keep.strength.max(lose.strength).min(1.0),
                    keep.access_count + lose.access_count,
                    now,
                    keep.id
                ],
            )?;
            tx.execute(
                "UPDATE memories SET archived = 1, updated_at = ?1 WHERE id = ?2",
                params![now, lose.id],
            )?;
            // Rewrite edges onto the survivor, dropping self-loops
            tx.execute(
                "UPDATE OR REPLACE links SET source_id = ?1 WHERE source_id = ?2",
                params![keep.id, lose.id],
            )?;
            tx.execute(
                "UPDATE OR REPLACE links SET target_id = ?1 WHERE target_id = ?2",
                params![keep.id, lose.id],
            )?;
            tx.execute("DELETE FROM links WHERE source_id = target_id", [])?;
            tx.commit()?;
        }

        self.index_upsert(keep.id, &embedding);
        self.index_remove(lose.id);
        tracing::info!("merged memory {} into {}", lose.id, keep.id);
        Ok(lose.id)
    }

    /// Same-type pairs above the merge threshold, counted without mutating
    fn count_merge_candidates(&self, threshold: f32) -> Result<u64> {
        let rows: Vec<(i64, String, Vec<u8>)> = {
            let reader = self.lock_reader()?;
            let mut stmt = reader.prepare(
                "SELECT id, mem_type, content_embedding FROM memories
                 WHERE archived = 0 AND content_embedding IS NOT NULL
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let vectors: Vec<(i64, String, Vec<f32>)> = rows
            .into_iter()
            .filter_map(|(id, t, blob)| blob_to_vector(&blob).map(|v| (id, t, v)))
            .collect();

        let mut count = 0u64;
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                if vectors[i].1 != vectors[j].1 {
                    continue;
                }
                if let Ok(sim) = cosine(&vectors[i].2, &vectors[j].2) {
                    if sim >= threshold {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Reserved for LLM-driven pattern discovery; a stable no-op for now
    fn step_extract(&self) -> u64 {
        0
    }

    fn step_boost(
        &self,
        opts: &ConsolidationOptions,
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        // Cooldown guard: boosting more than once a day would compound
        if !boost_cooldown_elapsed(last, now) {
            return Ok(0);
        }

        if opts.dry_run {
            let reader = self.lock_reader()?;
            let count: i64 = reader.query_row(
                "SELECT COUNT(*) FROM memories WHERE archived = 0 AND access_count >= ?1",
                params![opts.boost_min_access],
                |row| row.get(0),
            )?;
            return Ok(count as u64);
        }

        let writer = self.lock_writer()?;
        let rows = writer.execute(
            "UPDATE memories SET strength = MIN(1.0, strength * ?1)
             WHERE archived = 0 AND access_count >= ?2",
            params![opts.boost_factor, opts.boost_min_access],
        )?;
        Ok(rows as u64)
    }

    /// Whether at least `interval_days` have passed since the last run
    /// (true when the store has never consolidated)
    pub fn should_consolidate(&self, interval_days: f64) -> Result<bool> {
        Ok(match self.last_consolidation()? {
            Some(at) => days_between(at, Utc::now()) >= interval_days,
            None => true,
        })
    }

    /// The ten weakest memories plus would-merge count
    pub fn consolidation_preview(
        &self,
        opts: &ConsolidationOptions,
    ) -> Result<ConsolidationPreview> {
        Ok(ConsolidationPreview {
            weakest: self.weakest(10)?,
            merge_candidates: self.count_merge_candidates(opts.merge_threshold)?,
        })
    }

    // ========================================================================
    // SYSTEM META
    // ========================================================================

    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let reader = self.lock_reader()?;
        Ok(reader
            .query_row(
                "SELECT value FROM system_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO system_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // TELEMETRY & EXPORT
    // ========================================================================

    /// Read-only statistics over the whole store
    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.lock_reader()?;

        let (total, archived, with_embeddings): (i64, i64, i64) = reader.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(archived), 0),
                    COALESCE(SUM(content_embedding IS NOT NULL), 0)
             FROM memories",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let (average_importance, average_strength): (f64, f64) = reader.query_row(
            "SELECT COALESCE(AVG(importance), 0.0), COALESCE(AVG(strength), 0.0)
             FROM memories WHERE archived = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = reader.prepare(
            "SELECT mem_type, COUNT(*) FROM memories WHERE archived = 0
             GROUP BY mem_type ORDER BY mem_type",
        )?;
        let by_type: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let tag_count: i64 = reader.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
        let link_count: i64 = reader.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?;
        let session_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;

        let (oldest, newest): (Option<String>, Option<String>) = reader.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM memories",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        drop(reader);

        let parse = |s: Option<String>| {
            s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        Ok(MemoryStats {
            total,
            archived,
            by_type,
            average_importance,
            average_strength,
            with_embeddings,
            tag_count,
            link_count,
            session_count,
            last_consolidation_at: self.last_consolidation()?,
            oldest: parse(oldest),
            newest: parse(newest),
        })
    }

    /// The `n` weakest non-archived memories
    pub fn weakest(&self, n: usize) -> Result<Vec<Memory>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM memories WHERE archived = 0
             ORDER BY strength ASC, id ASC LIMIT ?1",
            MEMORY_COLS
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt
            .query_map(params![n as i64], |row| Self::row_to_memory(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Same-type near-duplicate pairs above `threshold`, strongest first
    pub fn duplicate_candidates(&self, threshold: f32) -> Result<Vec<DuplicatePair>> {
        let rows: Vec<(i64, String, String, Vec<u8>)> = {
            let reader = self.lock_reader()?;
            let mut stmt = reader.prepare(
                "SELECT id, title, mem_type, content_embedding FROM memories
                 WHERE archived = 0 AND content_embedding IS NOT NULL
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let vectors: Vec<(i64, String, String, Vec<f32>)> = rows
            .into_iter()
            .filter_map(|(id, title, t, blob)| blob_to_vector(&blob).map(|v| (id, title, t, v)))
            .collect();

        let mut pairs = Vec::new();
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                if vectors[i].2 != vectors[j].2 {
                    continue;
                }
                if let Ok(sim) = cosine(&vectors[i].3, &vectors[j].3) {
                    if sim >= threshold {
                        pairs.push(DuplicatePair {
                            first_id: vectors[i].0,
                            first_title: vectors[i].1.clone(),
                            second_id: vectors[j].0,
                            second_title: vectors[j].1.clone(),
                            similarity: sim,
                        });
                    }
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(pairs)
    }

    /// Every memory with its tags, ascending id; archived rows included
    pub fn export_records(&self) -> Result<Vec<ExportRecord>> {
        let memories: Vec<Memory> = {
            let reader = self.lock_reader()?;
            let sql = format!("SELECT {} FROM memories ORDER BY id ASC", MEMORY_COLS);
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Self::row_to_memory(row))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut records = Vec::with_capacity(memories.len());
        for memory in memories {
            let tags = self.tags_of(memory.id)?;
            records.push(ExportRecord { memory, tags });
        }
        Ok(records)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_bound_grammar() {
        let now = Utc::now();
        let h = Storage::since_bound("2h").unwrap();
        assert!((now - h).num_minutes() >= 119 && (now - h).num_minutes() <= 121);

        let d = Storage::since_bound("3d").unwrap();
        assert_eq!((now - d).num_days(), 3);

        let w = Storage::since_bound("1w").unwrap();
        assert_eq!((now - w).num_days(), 7);

        let m = Storage::since_bound("2m").unwrap();
        assert_eq!((now - m).num_days(), 60);
    }

    #[test]
    fn since_bound_rejects_malformed() {
        for bad in ["", "d", "5", "5y", "-2d", "x2d", "2 d"] {
            assert!(
                matches!(Storage::since_bound(bad), Err(StorageError::InvalidInput(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn tag_normalization() {
        assert_eq!(Storage::normalize_tag("  Rust  "), "rust");
        assert_eq!(Storage::normalize_tag("DB"), "db");
        assert_eq!(Storage::normalize_tag(""), "");
    }
}
