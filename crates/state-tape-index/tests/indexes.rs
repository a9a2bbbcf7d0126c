// state-tape-index/tests/indexes.rs
// ============================================================================
// Module: Index Tests
// Description: BM25 ranking, reindex idempotence, vector and time lookup.
// ============================================================================
//! ## Overview
//! Validates lexical ranking and fingerprint idempotence, exact vector
//! retrieval with deterministic tie-breaks, ANN version gating, and time
//! range queries.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use state_tape_core::ArtifactId;
use state_tape_core::StateId;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_index::AnnSnapshot;
use state_tape_index::LexicalIndex;
use state_tape_index::TimeEntry;
use state_tape_index::TimeEntryKind;
use state_tape_index::TimeIndex;
use state_tape_index::VectorIndex;
use state_tape_index::VectorIndexError;

// ============================================================================
// SECTION: Lexical
// ============================================================================

/// Builds a small corpus of three documents.
fn corpus() -> LexicalIndex {
    let mut index = LexicalIndex::new();
    index.insert_field(
        &ArtifactId::new("doc-a"),
        Timestamp::from_millis(1_000),
        "Bohemian Rhapsody Queen",
        None,
    );
    index.insert_field(
        &ArtifactId::new("doc-b"),
        Timestamp::from_millis(2_000),
        "terminal window cargo build output",
        None,
    );
    index.insert_field(
        &ArtifactId::new("doc-c"),
        Timestamp::from_millis(3_000),
        "queen of spreadsheets quarterly numbers",
        None,
    );
    index
}

/// Tests BM25 ranks the exact-phrase document first.
#[test]
fn test_bm25_ranks_relevant_first() {
    let index = corpus();
    let hits = index.search("bohemian rhapsody", 10);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].0, ArtifactId::new("doc-a"));
    let broader = index.search("queen", 10);
    assert_eq!(broader.len(), 2);
}

/// Tests rebuilding a stable corpus yields an identical fingerprint.
#[test]
fn test_reindex_is_idempotent() {
    let first = corpus();
    let second = corpus();
    assert_eq!(first.fingerprint(), second.fingerprint());
}

/// Tests an unknown term returns no hits.
#[test]
fn test_unknown_term_no_hits() {
    let index = corpus();
    assert!(index.search("zanzibar", 10).is_empty());
}

// ============================================================================
// SECTION: Vector
// ============================================================================

/// Tests exact top-K ordering and deterministic tie-breaks.
#[test]
fn test_vector_top_k() {
    let mut index = VectorIndex::new();
    index.insert(StateId::new("span-b"), vec![1.0, 0.0, 0.0]);
    index.insert(StateId::new("span-a"), vec![1.0, 0.0, 0.0]);
    index.insert(StateId::new("span-c"), vec![0.0, 1.0, 0.0]);
    let hits = index.top_k(&[1.0, 0.0, 0.0], 2);
    assert_eq!(hits.len(), 2);
    // Equal scores break ties on the span id.
    assert_eq!(hits[0].state_id, StateId::new("span-a"));
    assert_eq!(hits[1].state_id, StateId::new("span-b"));
}

/// Tests the ANN snapshot refuses a moved corpus and agrees when fresh.
#[test]
fn test_ann_snapshot_version_gate() {
    let mut index = VectorIndex::new();
    for i in 0..8 {
        let mut v = vec![0.0_f32; 8];
        v[i] = 1.0;
        index.insert(StateId::new(format!("span-{i}")), v);
    }
    let snapshot = AnnSnapshot::build(&index);
    let query = {
        let mut v = vec![0.0_f32; 8];
        v[3] = 1.0;
        v
    };
    let hits = snapshot.top_k(&index, &query, 3).unwrap();
    assert_eq!(hits[0].state_id, StateId::new("span-3"));

    index.insert(StateId::new("span-new"), vec![0.5; 8]);
    let result = snapshot.top_k(&index, &query, 3);
    assert!(matches!(result, Err(VectorIndexError::SnapshotVersionMismatch { .. })));
}

// ============================================================================
// SECTION: Persistence
// ============================================================================

/// Tests snapshot persistence writes the documented layout.
#[test]
fn test_persist_writes_snapshot_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = state_tape_index::IndexSet::default();
    set.lexical.insert_field(
        &ArtifactId::new("doc-a"),
        Timestamp::from_millis(1_000),
        "persisted words",
        None,
    );
    set.vector.insert(StateId::new("span-a"), vec![1.0, 0.0]);
    set.persist(dir.path()).unwrap();
    assert!(dir.path().join("index/lexical/postings.json").exists());
    assert!(dir.path().join("index/vector/embeddings.json").exists());
}

// ============================================================================
// SECTION: Time
// ============================================================================

/// Tests range queries return entries in time order.
#[test]
fn test_time_index_range() {
    let mut index = TimeIndex::new();
    for (ts, id) in [(1_000, "a"), (2_000, "b"), (3_000, "c")] {
        index.insert(
            Timestamp::from_millis(ts),
            TimeEntry { kind: TimeEntryKind::State, artifact_id: ArtifactId::new(id) },
        );
    }
    let hits = index.range(TimeRange::new(
        Timestamp::from_millis(1_500),
        Timestamp::from_millis(3_000),
    ));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1.artifact_id, ArtifactId::new("b"));
}
