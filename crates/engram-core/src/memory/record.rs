//! Memory record - the unit of stored knowledge
//!
//! Each memory carries a title, full content, a semantic embedding, and the
//! consolidation metadata (importance, strength, access tracking) that the
//! retrieval and sleep cycles operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// The six closed memory types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A conditioned response - "when X happens, do Y"
    Reflex,
    /// A concrete experience tied to a point in time
    Episode,
    /// A discrete piece of information
    #[default]
    Fact,
    /// A standing user or agent preference
    Preference,
    /// A decision and its rationale
    Decision,
    /// A condensed summary of a whole session
    SessionSummary,
}

impl MemoryType {
    /// All variants, in schema order
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Reflex,
        MemoryType::Episode,
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Decision,
        MemoryType::SessionSummary,
    ];

    /// String form as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Reflex => "reflex",
            MemoryType::Episode => "episode",
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Decision => "decision",
            MemoryType::SessionSummary => "session_summary",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reflex" => Ok(MemoryType::Reflex),
            "episode" => Ok(MemoryType::Episode),
            "fact" => Ok(MemoryType::Fact),
            "preference" => Ok(MemoryType::Preference),
            "decision" => Ok(MemoryType::Decision),
            "session_summary" => Ok(MemoryType::SessionSummary),
            _ => Err(format!("unknown memory type: {}", s)),
        }
    }
}

/// Provenance of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Written explicitly by the agent or user
    #[default]
    Manual,
    /// Produced by an automated pipeline (e.g. session summarization)
    Auto,
    /// Imported from an earlier store
    Migration,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Manual => "manual",
            SourceType::Auto => "auto",
            SourceType::Migration => "migration",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(SourceType::Manual),
            "auto" => Ok(SourceType::Auto),
            "migration" => Ok(SourceType::Migration),
            _ => Err(format!("unknown source type: {}", s)),
        }
    }
}

// ============================================================================
// LINK RELATIONS
// ============================================================================

/// Relation carried by a directed edge between two memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    /// Generic semantic association (the auto-link relation)
    #[default]
    RelatedTo,
    /// Target caused the source
    CausedBy,
    /// Source is a later form of the target
    EvolvedFrom,
    /// Source and target conflict
    Contradicts,
    /// Source replaces the target
    Supersedes,
}

impl LinkRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRelation::RelatedTo => "related_to",
            LinkRelation::CausedBy => "caused_by",
            LinkRelation::EvolvedFrom => "evolved_from",
            LinkRelation::Contradicts => "contradicts",
            LinkRelation::Supersedes => "supersedes",
        }
    }
}

impl std::fmt::Display for LinkRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LinkRelation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "related_to" => Ok(LinkRelation::RelatedTo),
            "caused_by" => Ok(LinkRelation::CausedBy),
            "evolved_from" => Ok(LinkRelation::EvolvedFrom),
            "contradicts" => Ok(LinkRelation::Contradicts),
            "supersedes" => Ok(LinkRelation::Supersedes),
            _ => Err(format!("unknown link relation: {}", s)),
        }
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A stored memory row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Monotonic id assigned at insert
    pub id: i64,
    /// Memory type
    pub mem_type: MemoryType,
    /// Short non-empty title
    pub title: String,
    /// Full content
    pub content: String,
    /// Ranking prior in [0,1], set at write time
    pub importance: f64,
    /// Retrievability in [0,1]; decays unless reinforced
    pub strength: f64,
    /// Number of recorded accesses
    pub access_count: i64,
    /// Most recent access, if any
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Conversation the memory came from, if known
    pub source_conversation_id: Option<String>,
    pub source_type: SourceType,
    /// Soft-deleted by prune or explicit archive
    pub archived: bool,
    /// Whether a content embedding is stored for this row
    pub has_embedding: bool,
}

/// A directed edge between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub source_id: i64,
    pub target_id: i64,
    pub relation: LinkRelation,
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

/// A memory together with its tags and adjacent links
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDetail {
    #[serde(flatten)]
    pub memory: Memory,
    pub tags: Vec<String>,
    pub links_out: Vec<Link>,
    pub links_in: Vec<Link>,
}

// ============================================================================
// WRITE-PATH INPUTS
// ============================================================================

/// An explicit link requested at add time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkSpec {
    pub target_id: i64,
    #[serde(default)]
    pub relation: LinkRelation,
}

fn default_importance() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

/// Input for creating a new memory
///
/// Uses `deny_unknown_fields` so malformed ingest files fail loudly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddInput {
    #[serde(rename = "type")]
    pub mem_type: MemoryType,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub source_conversation_id: Option<String>,
    #[serde(default)]
    pub source_type: SourceType,
    /// When false, skip the automatic related_to edges
    #[serde(default = "default_true")]
    pub auto_link: bool,
}

impl Default for AddInput {
    fn default() -> Self {
        Self {
            mem_type: MemoryType::Fact,
            title: String::new(),
            content: String::new(),
            importance: 0.5,
            tags: vec![],
            links: vec![],
            source_conversation_id: None,
            source_type: SourceType::Manual,
            auto_link: true,
        }
    }
}

/// What the write path did with an `add`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddStatus {
    /// A new row was inserted
    Created,
    /// An exact (type, title) duplicate already existed
    Duplicate,
    /// Content was folded into a semantically near-identical memory
    Merged,
}

/// Outcome of `Storage::add`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    /// Id of the surviving memory (new, duplicate, or merge target)
    pub id: i64,
    pub status: AddStatus,
    /// Set when `status == Merged`; the memory the content was folded into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<i64>,
}

/// Partial update for an existing memory
///
/// A title or content change triggers re-embedding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdatePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub strength: Option<f64>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn memory_type_roundtrip() {
        for mem_type in MemoryType::ALL {
            assert_eq!(MemoryType::from_str(mem_type.as_str()).unwrap(), mem_type);
        }
    }

    #[test]
    fn unknown_memory_type_is_rejected() {
        assert!(MemoryType::from_str("daydream").is_err());
    }

    #[test]
    fn link_relation_roundtrip() {
        for relation in [
            LinkRelation::RelatedTo,
            LinkRelation::CausedBy,
            LinkRelation::EvolvedFrom,
            LinkRelation::Contradicts,
            LinkRelation::Supersedes,
        ] {
            assert_eq!(
                LinkRelation::from_str(relation.as_str()).unwrap(),
                relation
            );
        }
    }

    #[test]
    fn add_input_deny_unknown_fields() {
        let json = r#"{"type": "fact", "title": "t", "content": "c"}"#;
        let parsed: Result<AddInput, _> = serde_json::from_str(json);
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap().importance, 0.5);

        let json_bad = r#"{"type": "fact", "title": "t", "sneaky": 1}"#;
        let parsed: Result<AddInput, _> = serde_json::from_str(json_bad);
        assert!(parsed.is_err());
    }

    #[test]
    fn session_summary_serde_name() {
        let t: MemoryType = serde_json::from_str("\"session_summary\"").unwrap();
        assert_eq!(t, MemoryType::SessionSummary);
    }
}
