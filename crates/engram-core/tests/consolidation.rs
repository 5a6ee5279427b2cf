//! Sleep-cycle journeys: decay, prune, merge, boost, and idempotence

mod common;

use chrono::{Duration, Utc};
use common::{add, test_store};
use engram_core::{
    AddInput, ConsolidationOptions, LinkRelation, MemoryType, SearchOptions, UpdatePatch,
};

/// Pretend the last sleep happened `days` ago so decay has something to
/// integrate over
fn backdate_last_sleep(storage: &engram_core::Storage, days: i64) {
    let past = (Utc::now() - Duration::days(days)).to_rfc3339();
    storage.meta_set("last_consolidation_at", &past).unwrap();
}

#[test]
fn decay_compounds_from_the_previous_run() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Fact, "decaying", "will lose strength over time");

    backdate_last_sleep(&storage, 30);
    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(report.decayed, 1);

    let strength = storage.get(id).unwrap().unwrap().strength;
    let expected = 0.95_f64.powi(30);
    assert!((strength - expected).abs() < 0.02, "got {}", strength);
}

#[test]
fn permanent_memories_neither_decay_nor_prune() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Reflex, "always check tests", "run the suite first");
    storage
        .update(
            id,
            UpdatePatch {
                strength: Some(0.01),
                ..Default::default()
            },
        )
        .unwrap();
    storage.mark_permanent(id, true).unwrap();

    backdate_last_sleep(&storage, 30);
    storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();

    let memory = storage.get(id).unwrap().unwrap();
    assert!(!memory.archived);
    assert!((memory.strength - 0.01).abs() <= 5e-3);
}

#[test]
fn weak_non_permanent_memories_are_pruned() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Episode, "fading", "barely remembered event");
    storage
        .update(
            id,
            UpdatePatch {
                strength: Some(0.01),
                ..Default::default()
            },
        )
        .unwrap();

    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(report.pruned, 1);

    let memory = storage.get(id).unwrap().unwrap();
    assert!(memory.archived);

    // Pruned memories vanish from retrieval
    assert!(storage
        .search_fts("barely remembered", &SearchOptions::default())
        .unwrap()
        .is_empty());
}

#[test]
fn merge_folds_near_duplicates_and_rewrites_links() {
    let (_dir, storage) = test_store();

    let text = "the deploy pipeline builds the container image, runs the integration suite, \
        pushes to the registry and finally rolls out to the staging cluster";
    let keep = storage
        .add(AddInput {
            mem_type: MemoryType::Fact,
            title: "deploy pipeline".into(),
            content: text.into(),
            importance: 0.9,
            auto_link: false,
            ..Default::default()
        })
        .unwrap()
        .id;
    let lose = storage
        .add(AddInput {
            mem_type: MemoryType::Fact,
            title: "pipeline copy".into(),
            content: "completely different placeholder body".into(),
            importance: 0.2,
            auto_link: false,
            ..Default::default()
        })
        .unwrap()
        .id;
    let bystander = add(&storage, MemoryType::Decision, "points at copy", "references the copy");
    storage.link(bystander, lose, LinkRelation::RelatedTo).unwrap();

    // Make the copy near-identical after the fact; update() never merges
    storage
        .update(
            lose,
            UpdatePatch {
                content: Some(text.into()),
                ..Default::default()
            },
        )
        .unwrap();

    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(report.merged, 1);

    let kept = storage.get(keep).unwrap().unwrap();
    let gone = storage.get(lose).unwrap().unwrap();
    assert!(!kept.archived);
    assert!(gone.archived);
    assert!(kept.content.contains("[Merged from: pipeline copy]"));
    assert!((kept.importance - 0.9).abs() < 1e-9);

    // The bystander's edge now points at the survivor
    let detail = storage.get_detail(bystander).unwrap().unwrap();
    assert_eq!(detail.links_out.len(), 1);
    assert_eq!(detail.links_out[0].target_id, keep);
}

#[test]
fn boost_rewards_frequently_accessed_memories_once_per_day() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Fact, "hot", "accessed all the time");
    storage
        .update(
            id,
            UpdatePatch {
                strength: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap();
    for _ in 0..3 {
        storage.log_access(id, None, None, None).unwrap();
    }

    // Never consolidated: the cooldown does not block the first run
    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(report.boosted, 1);
    let strength = storage.get(id).unwrap().unwrap().strength;
    assert!((strength - 0.55).abs() < 1e-6);

    // Immediately repeated run: cooldown blocks the boost
    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(report.boosted, 0);
    let strength = storage.get(id).unwrap().unwrap().strength;
    assert!((strength - 0.55).abs() < 1e-4);
}

#[test]
fn back_to_back_runs_are_idempotent() {
    let (_dir, storage) = test_store();
    for i in 0..4 {
        add(
            &storage,
            MemoryType::Fact,
            &format!("memory {}", i),
            &format!("body of memory number {} with distinct words {}", i, i * 7),
        );
    }

    backdate_last_sleep(&storage, 10);
    storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    let after_first: Vec<f64> = (1..=4)
        .map(|id| storage.get(id).unwrap().unwrap().strength)
        .collect();

    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    let after_second: Vec<f64> = (1..=4)
        .map(|id| storage.get(id).unwrap().unwrap().strength)
        .collect();

    assert_eq!(report.pruned, 0);
    assert_eq!(report.boosted, 0);
    for (a, b) in after_first.iter().zip(after_second.iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn dry_run_counts_without_mutating() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Fact, "untouched", "dry run subject");
    storage
        .update(
            id,
            UpdatePatch {
                strength: Some(0.01),
                ..Default::default()
            },
        )
        .unwrap();
    backdate_last_sleep(&storage, 30);

    let report = storage
        .run_consolidation(&ConsolidationOptions {
            dry_run: true,
            ..Default::default()
        })
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.decayed, 1);
    assert_eq!(report.pruned, 1);

    let memory = storage.get(id).unwrap().unwrap();
    assert!(!memory.archived);
    assert!((memory.strength - 0.01).abs() < 1e-9);

    // Dry runs do not advance the integration base
    let meta = storage.meta_get("last_consolidation_at").unwrap().unwrap();
    let stored: chrono::DateTime<Utc> = chrono::DateTime::parse_from_rfc3339(&meta)
        .unwrap()
        .with_timezone(&Utc);
    assert!((Utc::now() - stored).num_days() >= 29);
}

#[test]
fn extract_step_is_a_stable_noop() {
    let (_dir, storage) = test_store();
    add(&storage, MemoryType::Fact, "anything", "whatever content");
    let report = storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(report.extracted, 0);
}

#[test]
fn should_consolidate_uses_the_interval() {
    let (_dir, storage) = test_store();
    assert!(storage.should_consolidate(3.0).unwrap());

    storage
        .run_consolidation(&ConsolidationOptions::default())
        .unwrap();
    assert!(!storage.should_consolidate(3.0).unwrap());

    backdate_last_sleep(&storage, 4);
    assert!(storage.should_consolidate(3.0).unwrap());
}

#[test]
fn preview_lists_weakest_and_merge_candidates() {
    let (_dir, storage) = test_store();
    for i in 0..12 {
        let id = add(
            &storage,
            MemoryType::Fact,
            &format!("preview {}", i),
            &format!("entirely distinct content body number {} about topic {}", i, i),
        );
        storage
            .update(
                id,
                UpdatePatch {
                    strength: Some(0.1 + 0.05 * i as f64),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let preview = storage
        .consolidation_preview(&ConsolidationOptions::default())
        .unwrap();
    assert_eq!(preview.weakest.len(), 10);
    for pair in preview.weakest.windows(2) {
        assert!(pair[0].strength <= pair[1].strength);
    }
}
