//! Storage layer
//!
//! Owns the database file, schema, and every query the engine issues:
//! relational tables, the FTS5 lexical index, and the nearest-neighbour
//! vector index (with an exact-scan fallback when the index is unavailable).

pub mod migrations;
mod sqlite;

pub use sqlite::{KnnFilter, Result, Storage, StorageError};
