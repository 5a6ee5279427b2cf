//! Sleep consolidation
//!
//! Periodic maintenance over the whole store, run as five ordered steps:
//!
//! 1. **Decay**: strength is multiplied by `decay_rate^days`, where days are
//!    measured from the previous consolidation (falling back to last access,
//!    then creation). Anchoring on the previous run is what makes repeated
//!    runs safe.
//! 2. **Prune**: archive non-permanent memories whose strength fell below
//!    the threshold.
//! 3. **Merge**: fold semantically near-identical same-type memories into
//!    the stronger of the pair.
//! 4. **Extract**: reserved for pattern discovery; currently a no-op.
//! 5. **Boost**: reward frequently-accessed memories, guarded by a one-day
//!    cooldown since the previous run.
//!
//! The pure calculations live here; `Storage::run_consolidation` drives the
//! SQL side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// OPTIONS
// ============================================================================

/// Tunables for one consolidation run
#[derive(Debug, Clone)]
pub struct ConsolidationOptions {
    /// Per-day strength multiplier
    pub decay_rate: f64,
    /// Strength below which a memory is archived
    pub prune_threshold: f64,
    /// Same-type similarity above which two memories merge
    pub merge_threshold: f32,
    /// Strength multiplier for frequently-accessed memories
    pub boost_factor: f64,
    /// Minimum access count to qualify for a boost
    pub boost_min_access: i64,
    /// Compute counts without mutating anything
    pub dry_run: bool,
}

impl Default for ConsolidationOptions {
    fn default() -> Self {
        Self {
            decay_rate: 0.95,
            prune_threshold: 0.05,
            merge_threshold: crate::memory::DEFAULT_MERGE_THRESHOLD,
            boost_factor: 1.1,
            boost_min_access: 3,
            dry_run: false,
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Counts produced by one consolidation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub decayed: u64,
    pub pruned: u64,
    pub merged: u64,
    /// Always 0 until pattern extraction lands
    pub extracted: u64,
    pub boosted: u64,
    pub dry_run: bool,
    pub duration_ms: u64,
}

/// What a run would do, without doing it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationPreview {
    /// The ten weakest non-archived memories
    pub weakest: Vec<crate::memory::Memory>,
    /// Same-type pairs above the merge threshold
    pub merge_candidates: u64,
}

// ============================================================================
// PURE CALCULATIONS
// ============================================================================

/// Fractional days from `base` to `now`, floored at zero
pub fn days_between(base: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - base).num_seconds().max(0) as f64) / 86_400.0
}

/// Strength multiplier after `days` of decay at `rate`
pub fn decay_multiplier(rate: f64, days: f64) -> f64 {
    if days <= 0.0 {
        return 1.0;
    }
    rate.powf(days).clamp(0.0, 1.0)
}

/// Decay integration base: previous consolidation, else last access,
/// else creation
pub fn decay_base(
    last_consolidation: Option<DateTime<Utc>>,
    last_accessed: Option<DateTime<Utc>>,
    created: DateTime<Utc>,
) -> DateTime<Utc> {
    last_consolidation.or(last_accessed).unwrap_or(created)
}

/// Whether the boost step may run, given the previous consolidation time.
/// A store that has never consolidated qualifies.
pub fn boost_cooldown_elapsed(
    last_consolidation: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match last_consolidation {
        Some(at) => days_between(at, now) >= 1.0,
        None => true,
    }
}

/// Which of two merge candidates survives: the higher
/// `importance + 0.1 * access_count` wins, first argument on ties
pub fn merge_keep_score(importance: f64, access_count: i64) -> f64 {
    importance + 0.1 * access_count as f64
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decay_is_identity_for_zero_days() {
        assert_eq!(decay_multiplier(0.95, 0.0), 1.0);
        assert_eq!(decay_multiplier(0.95, -2.0), 1.0);
    }

    #[test]
    fn decay_compounds_daily() {
        let one = decay_multiplier(0.95, 1.0);
        let ten = decay_multiplier(0.95, 10.0);
        assert!((one - 0.95).abs() < 1e-9);
        assert!((ten - 0.95_f64.powi(10)).abs() < 1e-9);
        assert!(ten < one);
    }

    #[test]
    fn decay_base_prefers_last_consolidation() {
        let now = Utc::now();
        let consol = now - Duration::days(1);
        let access = now - Duration::days(10);
        let created = now - Duration::days(100);

        assert_eq!(decay_base(Some(consol), Some(access), created), consol);
        assert_eq!(decay_base(None, Some(access), created), access);
        assert_eq!(decay_base(None, None, created), created);
    }

    #[test]
    fn repeated_runs_converge() {
        // After a run anchors the base at "now", a second immediate run
        // sees ~0 days and must leave strength effectively unchanged.
        let now = Utc::now();
        let base = now - Duration::seconds(2);
        let mult = decay_multiplier(0.95, days_between(base, now));
        assert!(mult > 0.999_99);
    }

    #[test]
    fn boost_cooldown() {
        let now = Utc::now();
        assert!(boost_cooldown_elapsed(None, now));
        assert!(boost_cooldown_elapsed(Some(now - Duration::days(2)), now));
        assert!(!boost_cooldown_elapsed(Some(now - Duration::hours(5)), now));
    }

    #[test]
    fn merge_keeper_weighs_access_count() {
        // importance 0.4 with 5 accesses beats importance 0.8 with 0
        assert!(merge_keep_score(0.4, 5) > merge_keep_score(0.8, 0));
    }
}
