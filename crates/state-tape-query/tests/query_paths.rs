// state-tape-query/tests/query_paths.rs
// ============================================================================
// Module: Query Path Tests
// Description: No-evidence and answered-query scenarios over a real store.
// ============================================================================
//! ## Overview
//! Seeds a store with span and token artifacts, rebuilds the indexes, and
//! validates the no-evidence outcome, the answered query with resolvable
//! citations, and that querying never mutates the store.

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

use std::sync::Arc;

use serde_json::json;
use state_tape_config::PolicyConfig;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::EvidenceRef;
use state_tape_core::ExtractorInfo;
use state_tape_core::EmbeddingVector;
use state_tape_core::MediaId;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RecordStore;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_index::IndexSet;
use state_tape_query::PolicyGate;
use state_tape_query::QueryEngine;
use state_tape_query::QueryOutcome;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Seals a derived artifact with one whole-frame evidence reference.
fn derived(kind: ArtifactKind, producer: &str, payload: serde_json::Value) -> ArtifactEnvelope {
    let ts = payload
        .get("ts_ms")
        .or_else(|| payload.get("ts_start_ms"))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(1_000);
    let config_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}");
    let evidence = EvidenceRef::for_frame(
        MediaId::new("ab".repeat(32)),
        hash_bytes(DEFAULT_HASH_ALGORITHM, b"media"),
        Timestamp::from_millis(ts),
        0,
    );
    ArtifactEnvelope::seal(
        kind,
        1,
        ExtractorInfo {
            id: PluginId::new(producer),
            version: "1.0.0".to_string(),
            config_hash: config_hash.clone(),
        },
        ProvenanceRecord {
            producer_plugin_id: PluginId::new(producer),
            producer_plugin_version: "1.0.0".to_string(),
            model_id: None,
            model_version: None,
            config_hash,
            input_artifact_ids: Vec::new(),
            created_ts_ms: Timestamp::from_millis(ts),
        },
        0.9,
        vec![evidence],
        payload,
        Timestamp::from_millis(ts),
    )
    .unwrap()
}

/// Seeds the store with a music-player span and its text tokens.
fn seed_music_corpus(store: &SqliteRecordStore) {
    let mut z = vec![0.0_f32; 64];
    z[0] = 1.0;
    let span = derived(
        ArtifactKind::StateSpan,
        "tape.window",
        json!({
            "state_id": "span-music-0001",
            "session_id": "session-1",
            "ts_start_ms": 1_000,
            "ts_end_ms": 6_000,
            "z_embedding": serde_json::to_value(EmbeddingVector::encode(&z)).unwrap(),
            "summary_features": {
                "app": "player",
                "window_title_hash": { "algorithm": "sha256", "value": "aa".repeat(32) },
                "top_entities": ["Bohemian Rhapsody - Queen"]
            }
        }),
    );
    store.put_record(&span).unwrap();
    let tokens = derived(
        ArtifactKind::TextTokens,
        "layout.assemble",
        json!({
            "frame_id": "frame-0001",
            "ts_ms": 1_500,
            "session_id": "session-1",
            "tokens": [
                {
                    "token_id": "frame-0001-t00000",
                    "text": "Bohemian Rhapsody - Queen",
                    "norm_text": "Bohemian Rhapsody - Queen",
                    "bbox": [20, 20, 220, 40],
                    "confidence": 0.93,
                    "source": "ocr",
                    "flags": { "monospace_likely": false, "is_number": false }
                }
            ]
        }),
    );
    store.put_record(&tokens).unwrap();
}

/// Builds an engine over the seeded store.
fn engine(store: SqliteRecordStore) -> QueryEngine {
    let arc: Arc<dyn RecordStore> = Arc::new(store);
    let index = IndexSet::rebuild(arc.as_ref(), false).unwrap();
    QueryEngine::new(index, arc, PolicyGate::new(PolicyConfig::default()))
}

// ============================================================================
// SECTION: No Evidence
// ============================================================================

/// Tests an empty corpus yields the first-class no-evidence outcome.
#[test]
fn test_no_evidence_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    let engine = engine(store);
    let response = engine.execute("what song is playing", 8, 0);
    assert!(response.ok);
    assert_eq!(response.state, QueryOutcome::NoEvidence);
    assert!(response.citations.is_empty());
    assert!(response.summary.is_empty());
}

// ============================================================================
// SECTION: Answered Query
// ============================================================================

/// Tests the music corpus answers with the song title and a derived
/// citation.
#[test]
fn test_answered_query_with_citations() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    seed_music_corpus(&store);
    let engine = engine(store);
    let response = engine.execute("what song is playing", 8, 0);
    assert_eq!(response.state, QueryOutcome::Ok);
    assert!(
        response.summary.contains("Bohemian Rhapsody"),
        "summary was: {}",
        response.summary
    );
    assert!(!response.citations.is_empty());
    assert!(response.citations.iter().any(|citation| citation
        .record_type
        .starts_with("derived.")));
    // Evidence stays resolvable: the cited record exists in the store.
    let cited = &response.citations[0];
    assert!(cited.record_id.starts_with("st1-"));
}

/// Tests a lexical query hits the token text directly.
#[test]
fn test_lexical_query_hits_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    seed_music_corpus(&store);
    let engine = engine(store);
    let response = engine.execute("bohemian rhapsody", 8, 0);
    assert_eq!(response.state, QueryOutcome::Ok);
    assert!(response.summary.contains("Bohemian Rhapsody"));
}

// ============================================================================
// SECTION: Read-Only Property
// ============================================================================

/// Tests querying never mutates the metadata store.
#[test]
fn test_query_path_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    seed_music_corpus(&store);
    let db_path = dir.path().join("metadata.db");
    let before = hash_bytes(DEFAULT_HASH_ALGORITHM, &std::fs::read(&db_path).unwrap());
    let engine = engine(store);
    for _ in 0..5 {
        let _ = engine.execute("what song is playing", 8, 0);
        let _ = engine.execute("bohemian", 8, 0);
    }
    let after = hash_bytes(DEFAULT_HASH_ALGORITHM, &std::fs::read(&db_path).unwrap());
    assert_eq!(before.value, after.value);
}

// ============================================================================
// SECTION: Policy Gate
// ============================================================================

/// Tests the app denylist drops matching artifacts from bundles.
#[test]
fn test_app_denylist_drops_hits() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    seed_music_corpus(&store);
    let arc: Arc<dyn RecordStore> = Arc::new(store);
    let index = IndexSet::rebuild(arc.as_ref(), false).unwrap();
    let mut policy = PolicyConfig::default();
    policy.app_denylist.insert("player".to_string());
    let engine = QueryEngine::new(index, arc, PolicyGate::new(policy));
    let bundle = engine.compile_bundle("bohemian rhapsody");
    assert!(bundle
        .hits
        .iter()
        .all(|hit| hit.record_type != "derived.state_span"));
}
