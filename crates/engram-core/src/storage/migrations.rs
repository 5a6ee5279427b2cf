//! Database migrations
//!
//! Versioned schema definitions for the storage layer. The current version
//! is recorded in `system_meta` under `schema_version`; `apply_migrations`
//! is idempotent.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: memories, tags, links, sessions, access log, FTS5",
    up: MIGRATION_V1_UP,
}];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
///
/// Type enums and value ranges are CHECK-guarded at the schema level so a
/// buggy writer cannot produce out-of-domain rows. The FTS index is kept in
/// sync with the memories table by triggers; the application never writes
/// `memories_fts` directly.
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mem_type TEXT NOT NULL CHECK (
        mem_type IN ('reflex','episode','fact','preference','decision','session_summary')
    ),
    title TEXT NOT NULL CHECK (length(title) > 0),
    content TEXT NOT NULL DEFAULT '',

    -- little-endian f32 blob, 4 * 1024 bytes; null only transiently
    content_embedding BLOB,

    importance REAL NOT NULL DEFAULT 0.5 CHECK (importance >= 0.0 AND importance <= 1.0),
    strength REAL NOT NULL DEFAULT 1.0 CHECK (strength >= 0.0 AND strength <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0 CHECK (access_count >= 0),
    last_accessed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    -- Provenance
    source_conversation_id TEXT,
    source_type TEXT NOT NULL DEFAULT 'manual' CHECK (
        source_type IN ('manual','auto','migration')
    ),

    archived INTEGER NOT NULL DEFAULT 0 CHECK (archived IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(mem_type);
CREATE INDEX IF NOT EXISTS idx_memories_archived ON memories(archived);
CREATE INDEX IF NOT EXISTS idx_memories_strength ON memories(strength);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_type_title ON memories(mem_type, title);

-- Normalized tags, joined many-to-many
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS memory_tags (
    memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (memory_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);

-- Directed edges between memories
CREATE TABLE IF NOT EXISTS links (
    source_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    relation TEXT NOT NULL CHECK (
        relation IN ('related_to','caused_by','evolved_from','contradicts','supersedes')
    ),
    strength REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id)
);

CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_id);

-- Named work sessions
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    title TEXT,
    summary TEXT,
    summary_embedding BLOB,
    started_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

-- Append-only access log
CREATE TABLE IF NOT EXISTS access_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    session_id TEXT,
    query TEXT,
    relevance_score REAL,
    accessed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_access_log_memory ON access_log(memory_id);
CREATE INDEX IF NOT EXISTS idx_access_log_session ON access_log(session_id);

-- Key/value system metadata
CREATE TABLE IF NOT EXISTS system_meta (
    key TEXT PRIMARY KEY,
    value TEXT
);

INSERT OR IGNORE INTO system_meta (key, value) VALUES ('created_at', datetime('now'));

-- FTS5 lexical index over (title, content, mem_type)
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    title,
    content,
    mem_type,
    content='memories',
    content_rowid='id',
    tokenize='porter ascii'
);

-- Triggers keep FTS in sync; the application never writes memories_fts
CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, title, content, mem_type)
    VALUES (NEW.id, NEW.title, NEW.content, NEW.mem_type);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, title, content, mem_type)
    VALUES ('delete', OLD.id, OLD.title, OLD.content, OLD.mem_type);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, title, content, mem_type)
    VALUES ('delete', OLD.id, OLD.title, OLD.content, OLD.mem_type);
    INSERT INTO memories_fts(rowid, title, content, mem_type)
    VALUES (NEW.id, NEW.title, NEW.content, NEW.mem_type);
END;
"#;

/// Read the current schema version from system_meta (0 for a fresh file)
pub fn current_version(conn: &rusqlite::Connection) -> u32 {
    conn.query_row(
        "SELECT CAST(value AS INTEGER) FROM system_meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Apply pending migrations; returns how many were applied
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let version = current_version(conn);
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > version {
            tracing::info!(
                "applying migration v{}: {}",
                migration.version,
                migration.description
            );

            conn.execute_batch(migration.up)?;
            conn.execute(
                "INSERT OR REPLACE INTO system_meta (key, value) VALUES ('schema_version', ?1)",
                [migration.version.to_string()],
            )?;

            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn migrations_apply_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_migrations(&conn).unwrap(), 1);
        assert_eq!(current_version(&conn), 1);
        assert_eq!(apply_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn schema_guards_reject_bad_rows() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        // Unknown type
        let r = conn.execute(
            "INSERT INTO memories (mem_type, title, created_at, updated_at)
             VALUES ('daydream', 't', datetime('now'), datetime('now'))",
            [],
        );
        assert!(r.is_err());

        // Out-of-range importance
        let r = conn.execute(
            "INSERT INTO memories (mem_type, title, importance, created_at, updated_at)
             VALUES ('fact', 't', 1.5, datetime('now'), datetime('now'))",
            [],
        );
        assert!(r.is_err());

        // Empty title
        let r = conn.execute(
            "INSERT INTO memories (mem_type, title, created_at, updated_at)
             VALUES ('fact', '', datetime('now'), datetime('now'))",
            [],
        );
        assert!(r.is_err());
    }

    #[test]
    fn fts_triggers_track_the_main_table() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO memories (mem_type, title, content, created_at, updated_at)
             VALUES ('fact', 'rust ownership', 'borrow checker rules', datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM memories_fts WHERE memories_fts MATCH '\"borrow\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("UPDATE memories SET content = 'lifetimes' WHERE id = 1", [])
            .unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM memories_fts WHERE memories_fts MATCH '\"borrow\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);

        conn.execute("DELETE FROM memories WHERE id = 1", []).unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM memories_fts WHERE memories_fts MATCH '\"lifetimes\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }
}
