//! Nearest-neighbour index over content embeddings
//!
//! USearch HNSW wrapper keyed directly by memory id. Cosine metric, so
//! reported similarity is `1 - distance`. If construction fails at startup
//! the store runs every kNN as an exact cosine scan instead; this wrapper
//! never has to exist for the engine to answer queries.

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::embeddings::EMBEDDING_DIMENSIONS;

/// HNSW connectivity parameter
const CONNECTIVITY: usize = 16;

/// Expansion factor for index building
const EXPANSION_ADD: usize = 128;

/// Expansion factor for search
const EXPANSION_SEARCH: usize = 64;

/// Vector index errors
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("index creation failed: {0}")]
    IndexCreation(String),
    #[error("failed to add vector: {0}")]
    IndexAdd(String),
    #[error("search failed: {0}")]
    IndexSearch(String),
    #[error("invalid dimensions: expected {0}, got {1}")]
    InvalidDimensions(usize, usize),
}

/// HNSW index over memory embeddings
pub struct VectorIndex {
    index: Index,
    dimensions: usize,
}

impl VectorIndex {
    /// Create an empty index with the database-wide dimensionality
    pub fn new() -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions: EMBEDDING_DIMENSIONS,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;

        Ok(Self {
            index,
            dimensions: EMBEDDING_DIMENSIONS,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the vector stored for a memory id.
    ///
    /// usearch requires capacity to be reserved ahead of `add`; grow
    /// geometrically when full.
    pub fn upsert(&self, id: i64, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.dimensions,
                vector.len(),
            ));
        }

        let key = id as u64;
        if self.index.contains(key) {
            self.index
                .remove(key)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        }

        if self.index.size() >= self.index.capacity() {
            let new_capacity = (self.index.capacity() * 2).max(16);
            self.index
                .reserve(new_capacity)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        }

        self.index
            .add(key, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))
    }

    /// Drop a memory's vector; false when it was not indexed
    pub fn remove(&self, id: i64) -> Result<bool, VectorSearchError> {
        let key = id as u64;
        if !self.index.contains(key) {
            return Ok(false);
        }
        self.index
            .remove(key)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        Ok(true)
    }

    /// Approximate nearest neighbours as `(memory id, similarity)`,
    /// similarity descending
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(i64, f32)>, VectorSearchError> {
        if query.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(
                self.dimensions,
                query.len(),
            ));
        }

        if self.is_empty() {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(key, distance)| (*key as i64, 1.0 - distance))
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vector(seed: f32) -> Vec<f32> {
        let mut v: Vec<f32> = (0..EMBEDDING_DIMENSIONS)
            .map(|i| ((i as f32 + seed) * 0.37).sin())
            .collect();
        crate::embeddings::normalize(&mut v);
        v
    }

    #[test]
    fn empty_index_searches_empty() {
        let index = VectorIndex::new().unwrap();
        assert!(index.is_empty());
        assert!(index.search(&test_vector(0.0), 5).unwrap().is_empty());
    }

    #[test]
    fn upsert_and_search() {
        let index = VectorIndex::new().unwrap();
        index.upsert(1, &test_vector(1.0)).unwrap();
        index.upsert(2, &test_vector(2.0)).unwrap();
        index.upsert(3, &test_vector(50.0)).unwrap();
        assert_eq!(index.len(), 3);

        let hits = index.search(&test_vector(1.0), 3).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn upsert_replaces_existing_key() {
        let index = VectorIndex::new().unwrap();
        index.upsert(7, &test_vector(1.0)).unwrap();
        index.upsert(7, &test_vector(2.0)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_reports_membership() {
        let index = VectorIndex::new().unwrap();
        index.upsert(9, &test_vector(3.0)).unwrap();
        assert!(index.remove(9).unwrap());
        assert!(!index.remove(9).unwrap());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = VectorIndex::new().unwrap();
        assert!(matches!(
            index.upsert(1, &[0.5, 0.5]),
            Err(VectorSearchError::InvalidDimensions(_, _))
        ));
    }
}
