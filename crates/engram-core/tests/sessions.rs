//! Session tracking and access-log journeys

mod common;

use common::{add, test_store};
use engram_core::{MemoryType, SessionFilter};

#[test]
fn start_end_roundtrip() {
    let (_dir, storage) = test_store();

    let session = storage
        .session_start(Some("build-auth".into()), Some("auth work".into()))
        .unwrap();
    assert_eq!(session.id, "build-auth");
    assert_eq!(session.title.as_deref(), Some("auth work"));
    assert!(session.ended_at.is_none());

    assert!(storage
        .session_end("build-auth", Some("shipped refresh tokens"))
        .unwrap());
    let session = storage.session_get("build-auth").unwrap().unwrap();
    assert!(session.ended_at.is_some());
    assert_eq!(session.summary.as_deref(), Some("shipped refresh tokens"));

    assert!(!storage.session_end("no-such-session", None).unwrap());
}

#[test]
fn start_generates_an_id_when_missing() {
    let (_dir, storage) = test_store();
    let session = storage.session_start(None, None).unwrap();
    assert!(!session.id.is_empty());
    assert!(storage.session_get(&session.id).unwrap().is_some());
}

#[test]
fn restart_replaces_the_row() {
    let (_dir, storage) = test_store();
    storage
        .session_start(Some("s".into()), Some("first".into()))
        .unwrap();
    storage.session_end("s", Some("done")).unwrap();

    let restarted = storage
        .session_start(Some("s".into()), Some("second".into()))
        .unwrap();
    assert_eq!(restarted.title.as_deref(), Some("second"));
    assert!(restarted.ended_at.is_none());
    assert!(restarted.summary.is_none());
}

#[test]
fn log_access_bumps_counter_and_timestamp() {
    let (_dir, storage) = test_store();
    let id = add(&storage, MemoryType::Fact, "counted", "access counting subject");

    let before = storage.get(id).unwrap().unwrap();
    assert_eq!(before.access_count, 0);
    assert!(before.last_accessed_at.is_none());

    storage
        .log_access(id, Some("s1"), Some("why"), Some(0.8))
        .unwrap();
    storage.log_access(id, None, None, None).unwrap();

    let after = storage.get(id).unwrap().unwrap();
    assert_eq!(after.access_count, 2);
    assert!(after.last_accessed_at.is_some());
}

#[test]
fn session_context_lists_distinct_memories_most_recent_first() {
    let (_dir, storage) = test_store();
    storage.session_start(Some("ctx".into()), None).unwrap();

    let a = add(&storage, MemoryType::Fact, "first accessed", "alpha");
    let b = add(&storage, MemoryType::Fact, "second accessed", "beta");

    storage.log_access(a, Some("ctx"), None, None).unwrap();
    storage.log_access(b, Some("ctx"), None, None).unwrap();
    // Re-access the first: it becomes the most recent, not duplicated
    storage.log_access(a, Some("ctx"), None, None).unwrap();

    let context = storage.session_context("ctx").unwrap().unwrap();
    assert_eq!(context.memories.len(), 2);
    assert_eq!(context.memories[0].id, a);
    assert_eq!(context.memories[1].id, b);

    assert!(storage.session_context("missing").unwrap().is_none());
}

#[test]
fn list_is_newest_first_and_respects_limit() {
    let (_dir, storage) = test_store();
    for i in 0..5 {
        storage
            .session_start(Some(format!("s{}", i)), None)
            .unwrap();
    }

    let sessions = storage
        .session_list(&SessionFilter {
            limit: 3,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(sessions.len(), 3);
    for pair in sessions.windows(2) {
        assert!(pair[0].started_at >= pair[1].started_at);
    }
}
