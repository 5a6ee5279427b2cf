//! Search and recall journeys: FTS sync, hybrid ranking, graph expansion,
//! token-budget packing

mod common;

use common::{add, test_store};
use engram_core::{
    AddInput, LinkRelation, MatchKind, MemoryType, RecallOptions, SearchOptions, StorageError,
    UpdatePatch,
};

fn seed_corpus(storage: &engram_core::Storage) -> (i64, i64, i64) {
    let rails = add(
        storage,
        MemoryType::Fact,
        "Rails 8 AI Chat",
        "Ruby 3.4.8, Rails 8.1.2, SQLite backed chat application with turbo streams",
    );
    let cooking = add(
        storage,
        MemoryType::Fact,
        "Cooking pasta",
        "Cooking pasta with tomato sauce, garlic, basil and olive oil",
    );
    let python = add(
        storage,
        MemoryType::Fact,
        "Python ML",
        "Python machine learning with TensorFlow and large training datasets",
    );
    (rails, cooking, python)
}

#[test]
fn fts_matches_title_and_content_words() {
    let (_dir, storage) = test_store();
    let (rails, _, _) = seed_corpus(&storage);

    let hits = storage
        .search_fts("turbo", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, rails);
    assert_eq!(hits[0].match_kind, MatchKind::Lexical);
}

#[test]
fn fts_tracks_updates_and_deletes() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Fact, "fts sync", "original keyword zanzibar");

    storage
        .update(
            id,
            UpdatePatch {
                content: Some("replacement keyword quagga".into()),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(storage
        .search_fts("zanzibar", &SearchOptions::default())
        .unwrap()
        .is_empty());
    assert_eq!(
        storage
            .search_fts("quagga", &SearchOptions::default())
            .unwrap()
            .len(),
        1
    );

    storage.delete(id).unwrap();
    assert!(storage
        .search_fts("quagga", &SearchOptions::default())
        .unwrap()
        .is_empty());
}

#[test]
fn archived_memories_are_invisible_to_search() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Fact, "hidden", "unique sesquipedalian marker");

    storage.set_archived(id, true).unwrap();

    assert!(storage
        .search_fts("sesquipedalian", &SearchOptions::default())
        .unwrap()
        .is_empty());
    assert!(storage
        .search_semantic("unique sesquipedalian marker", &SearchOptions::default())
        .unwrap()
        .is_empty());
    assert!(storage
        .search_hybrid("unique sesquipedalian marker", &SearchOptions::default())
        .unwrap()
        .is_empty());

    // Explicit inspection still sees it
    let include = SearchOptions {
        include_archived: true,
        ..Default::default()
    };
    assert_eq!(
        storage
            .search_semantic("unique sesquipedalian marker", &include)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn semantic_search_honours_type_filter_and_k() {
    let (_dir, storage) = test_store();
    seed_corpus(&storage);
    add(
        &storage,
        MemoryType::Decision,
        "framework choice",
        "Ruby Rails chosen for the web application frontend",
    );

    let hits = storage
        .search_semantic(
            "Ruby Rails web application",
            &SearchOptions {
                mem_type: Some(MemoryType::Decision),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|h| h.memory.mem_type == MemoryType::Decision));

    let hits = storage
        .search_semantic(
            "Ruby Rails web application",
            &SearchOptions {
                k: 1,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn hybrid_ranks_rails_over_cooking() {
    let (_dir, storage) = test_store();
    let (rails, _, _) = seed_corpus(&storage);

    let hits = storage
        .search_hybrid(
            "Ruby on Rails web framework",
            &SearchOptions {
                rerank: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].memory.id, rails);
    assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
}

#[test]
fn hybrid_without_rerank_uses_rrf_scores() {
    let (_dir, storage) = test_store();
    let (rails, _, _) = seed_corpus(&storage);

    let hits = storage
        .search_hybrid("Ruby Rails SQLite", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits[0].memory.id, rails);
    // RRF scores live well below 1; two lists of rank 0 give at most ~2/61
    assert!(hits[0].score < 0.1);
    assert_eq!(hits[0].match_kind, MatchKind::Both);
}

#[test]
fn hop_expansion_pulls_in_linked_memories() {
    let (_dir, storage) = test_store();

    let a = add(
        &storage,
        MemoryType::Fact,
        "query anchor",
        "xenolith marker phrase found nowhere else",
    );
    let b = add(
        &storage,
        MemoryType::Episode,
        "linked neighbour",
        "completely unrelated sailing trip notes",
    );
    storage.link(a, b, LinkRelation::RelatedTo).unwrap();

    let no_hops = storage
        .search_hybrid("xenolith marker", &SearchOptions::default())
        .unwrap();
    assert_eq!(no_hops.len(), 1);

    let hits = storage
        .search_hybrid(
            "xenolith marker",
            &SearchOptions {
                hops: 1,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].memory.id, a);
    assert_eq!(hits[1].memory.id, b);
    assert_eq!(hits[1].score, -1.0);
    assert_eq!(hits[1].match_kind, MatchKind::Graph);
}

#[test]
fn hop_expansion_skips_archived_neighbours() {
    let (_dir, storage) = test_store();
    let a = add(&storage, MemoryType::Fact, "anchor two", "quixotic marker phrase");
    let b = add(&storage, MemoryType::Fact, "gone neighbour", "irrelevant content");
    storage.link(a, b, LinkRelation::RelatedTo).unwrap();
    storage.set_archived(b, true).unwrap();

    let hits = storage
        .search_hybrid(
            "quixotic marker",
            &SearchOptions {
                hops: 1,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn rerank_and_hops_compose() {
    let (_dir, storage) = test_store();

    let a = add(
        &storage,
        MemoryType::Fact,
        "reranked anchor",
        "peregrine marker phrase appearing in exactly one memory",
    );
    let b = add(
        &storage,
        MemoryType::Fact,
        "graph only neighbour",
        "nothing in common with the query at all",
    );
    storage.link(a, b, LinkRelation::EvolvedFrom).unwrap();

    let hits = storage
        .search_hybrid(
            "peregrine marker",
            &SearchOptions {
                rerank: true,
                hops: 1,
                ..Default::default()
            },
        )
        .unwrap();

    // Graph expansion must still run after the rerank pass
    assert!(hits.iter().any(|h| h.memory.id == b && h.score == -1.0));
}

#[test]
fn since_window_filters_and_rejects_malformed() {
    let (_dir, storage) = test_store();
    seed_corpus(&storage);

    let hits = storage
        .search_fts(
            "pasta",
            &SearchOptions {
                since: Some("1h".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(hits.len(), 1);

    let err = storage.search_fts(
        "pasta",
        &SearchOptions {
            since: Some("5y".into()),
            ..Default::default()
        },
    );
    assert!(matches!(err, Err(StorageError::InvalidInput(_))));

    let err = storage.search_semantic(
        "pasta",
        &SearchOptions {
            since: Some("soon".into()),
            ..Default::default()
        },
    );
    assert!(matches!(err, Err(StorageError::InvalidInput(_))));
}

#[test]
fn recall_returns_at_least_one_memory_on_tiny_budget() {
    let (_dir, storage) = test_store();
    seed_corpus(&storage);

    let result = storage
        .recall(
            "Ruby Rails",
            &RecallOptions {
                budget: 50,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!result.memories.is_empty());
}

#[test]
fn recall_packs_within_budget_and_orders_by_composite() {
    let (_dir, storage) = test_store();

    for i in 0..6 {
        storage
            .add(AddInput {
                mem_type: MemoryType::Fact,
                title: format!("note {}", i),
                content: format!(
                    "shared retrieval subject plus filler sentence number {} with more words",
                    i
                ),
                importance: 0.2 + 0.1 * i as f64,
                ..Default::default()
            })
            .unwrap();
    }

    let result = storage
        .recall("shared retrieval subject", &RecallOptions::default())
        .unwrap();
    assert!(result.memories.len() >= 2);
    for pair in result.memories.windows(2) {
        assert!(pair[0].composite >= pair[1].composite);
    }
    let sum: usize = result.memories.iter().map(|m| m.tokens).sum();
    assert_eq!(sum, result.total_tokens_estimate);
}

#[test]
fn recall_attaches_session_summary_and_logs_access() {
    let (_dir, storage) = test_store();
    let id = add(
        &storage,
        MemoryType::Fact,
        "session subject",
        "unique wolfram marker for the session test",
    );

    storage
        .session_start(Some("s1".into()), Some("auth work".into()))
        .unwrap();
    storage
        .session_end("s1", Some("implemented token refresh"))
        .unwrap();

    let result = storage
        .recall(
            "wolfram marker",
            &RecallOptions {
                session_id: Some("s1".into()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        result.session_context.as_deref(),
        Some("implemented token refresh")
    );
    assert!(!result.memories.is_empty());

    // Access logging advanced the counter and attributed the session
    let memory = storage.get(id).unwrap().unwrap();
    assert_eq!(memory.access_count, 1);
    let context = storage.session_context("s1").unwrap().unwrap();
    assert_eq!(context.memories.len(), 1);
    assert_eq!(context.memories[0].id, id);
}

#[test]
fn markdown_rendering_has_the_fixed_layout() {
    let (_dir, storage) = test_store();
    add(
        &storage,
        MemoryType::Preference,
        "tabs or spaces",
        "spaces, two wide, always",
    );

    let result = storage
        .recall("tabs or spaces", &RecallOptions::default())
        .unwrap();
    let md = engram_core::focus::render_markdown(&result);
    assert!(md.contains("## Relevant Memories"));
    assert!(md.contains("### [preference] tabs or spaces"));
    assert!(md.contains("memories | ~"));
}
