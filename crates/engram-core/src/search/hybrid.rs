//! Hybrid search fusion (semantic + lexical + RRF)
//!
//! Combines the embedding and BM25 candidate lists with Reciprocal Rank
//! Fusion. Each list contributes `1 / (rrf_k + rank + 1)` per memory, scaled
//! by a quality multiplier derived from the memory's importance and strength,
//! so that equally-ranked candidates with a stronger prior win the tie.

use std::collections::HashMap;

/// Candidates fetched from each source before fusion
pub fn fuse_width(k: usize) -> usize {
    (3 * k).max(20)
}

/// Candidates handed to the cross-encoder when reranking
pub fn rerank_width(k: usize) -> usize {
    (2 * k).max(10)
}

/// Prior multiplier applied to every RRF contribution of a memory
pub fn quality_boost(importance: f64, strength: f64) -> f64 {
    1.0 + 0.1 * (importance - 0.5) + 0.05 * (strength - 0.5)
}

/// Fuse two ranked id lists with quality-adjusted Reciprocal Rank Fusion.
///
/// `quality` maps memory id to its [`quality_boost`]; missing ids get 1.0.
/// Output order is deterministic: score descending, ties keep first-seen
/// order (semantic list first, then lexical).
pub fn reciprocal_rank_fusion(
    semantic: &[(i64, f64)],
    lexical: &[(i64, f64)],
    rrf_k: f64,
    quality: &HashMap<i64, f64>,
) -> Vec<(i64, f64)> {
    let mut order: Vec<i64> = Vec::with_capacity(semantic.len() + lexical.len());
    let mut scores: HashMap<i64, f64> = HashMap::new();

    for list in [semantic, lexical] {
        for (rank, (id, _)) in list.iter().enumerate() {
            let boost = quality.get(id).copied().unwrap_or(1.0);
            let contribution = boost / (rrf_k + rank as f64 + 1.0);
            match scores.get_mut(id) {
                Some(score) => *score += contribution,
                None => {
                    scores.insert(*id, contribution);
                    order.push(*id);
                }
            }
        }
    }

    let mut fused: Vec<(i64, f64)> = order
        .into_iter()
        .map(|id| (id, scores[&id]))
        .collect();

    // sort_by is stable: equal scores keep first-seen order
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_quality() -> HashMap<i64, f64> {
        HashMap::new()
    }

    #[test]
    fn rrf_rewards_presence_in_both_lists() {
        let semantic = vec![(1, 0.9), (2, 0.8), (3, 0.7)];
        let lexical = vec![(2, 5.0), (4, 4.0)];

        let fused = reciprocal_rank_fusion(&semantic, &lexical, 60.0, &no_quality());

        // 2 appears in both lists and must outrank everything else
        assert_eq!(fused[0].0, 2);
        for pair in fused.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn rrf_contribution_formula() {
        let semantic = vec![(7, 1.0)];
        let fused = reciprocal_rank_fusion(&semantic, &[], 60.0, &no_quality());
        // rank 0 contributes 1/(60 + 0 + 1)
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn rrf_empty_lists() {
        let fused = reciprocal_rank_fusion(&[], &[], 60.0, &no_quality());
        assert!(fused.is_empty());
    }

    #[test]
    fn quality_boost_breaks_ties() {
        let semantic = vec![(1, 0.9)];
        let lexical = vec![(2, 5.0)];
        let mut quality = HashMap::new();
        quality.insert(1, quality_boost(0.5, 0.5)); // 1.0
        quality.insert(2, quality_boost(1.0, 1.0)); // 1.075

        let fused = reciprocal_rank_fusion(&semantic, &lexical, 60.0, &quality);
        assert_eq!(fused[0].0, 2);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        // Same rank in disjoint lists, same quality: semantic id first
        let semantic = vec![(10, 0.4)];
        let lexical = vec![(11, 3.0)];
        let fused = reciprocal_rank_fusion(&semantic, &lexical, 60.0, &no_quality());
        assert_eq!(fused[0].0, 10);
        assert_eq!(fused[1].0, 11);
        assert_eq!(fused[0].1, fused[1].1);
    }

    #[test]
    fn quality_boost_range() {
        assert!((quality_boost(0.5, 0.5) - 1.0).abs() < 1e-12);
        assert!((quality_boost(1.0, 1.0) - 1.075).abs() < 1e-12);
        assert!((quality_boost(0.0, 0.0) - 0.925).abs() < 1e-12);
    }

    #[test]
    fn widths_are_overfetched() {
        assert_eq!(fuse_width(10), 30);
        assert_eq!(fuse_width(2), 20);
        assert_eq!(rerank_width(10), 20);
        assert_eq!(rerank_width(3), 10);
    }
}
