// state-tape-store-sqlite/tests/record_store.rs
// ============================================================================
// Module: Record Store Tests
// Description: Tests for transactional puts, scans, and reconciliation.
// ============================================================================
//! ## Overview
//! Validates idempotent writes, projection-backed scans, invariant refusal,
//! and projection recomputability.

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

use serde_json::json;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::EvidenceRef;
use state_tape_core::ExtractorInfo;
use state_tape_core::MediaId;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RecordStore;
use state_tape_core::StoreError;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Opens a store in a fresh temporary directory.
fn open_store() -> (tempfile::TempDir, SqliteRecordStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    (dir, store)
}

/// Builds a derived envelope with the given payload timestamp.
fn envelope(ts_ms: i64, payload_key: &str) -> ArtifactEnvelope {
    let provenance = ProvenanceRecord {
        producer_plugin_id: PluginId::new("build.state"),
        producer_plugin_version: "1.0.0".to_string(),
        model_id: None,
        model_version: None,
        config_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}"),
        input_artifact_ids: Vec::new(),
        created_ts_ms: Timestamp::from_millis(ts_ms),
    };
    let extractor = ExtractorInfo {
        id: PluginId::new("build.state"),
        version: "1.0.0".to_string(),
        config_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}"),
    };
    let evidence = EvidenceRef::for_frame(
        MediaId::new("ab".repeat(32)),
        hash_bytes(DEFAULT_HASH_ALGORITHM, b"frame"),
        Timestamp::from_millis(ts_ms),
        0,
    );
    ArtifactEnvelope::seal(
        ArtifactKind::ScreenState,
        1,
        extractor,
        provenance,
        0.8,
        vec![evidence],
        json!({"ts_ms": ts_ms, "marker": payload_key, "visible_apps": ["editor"]}),
        Timestamp::from_millis(ts_ms),
    )
    .unwrap()
}

// ============================================================================
// SECTION: Writes
// ============================================================================

/// Tests re-inserting the same artifact is a no-op.
#[test]
fn test_put_is_idempotent() {
    let (_dir, store) = open_store();
    let record = envelope(1_000, "a");
    store.put_record(&record).unwrap();
    store.put_record(&record).unwrap();
    let all = store.scan_by_time(TimeRange::all()).unwrap();
    assert_eq!(all.len(), 1);
}

/// Tests envelopes violating invariants are refused.
#[test]
fn test_refuses_invalid_envelope() {
    let (_dir, store) = open_store();
    let mut record = envelope(1_000, "a");
    record.evidence.clear();
    let result = store.put_record(&record);
    assert!(matches!(result, Err(StoreError::Refused(_))));
    assert!(store.scan_by_time(TimeRange::all()).unwrap().is_empty());
}

// ============================================================================
// SECTION: Scans
// ============================================================================

/// Tests kind scans use payload timestamps and stay ordered.
#[test]
fn test_scan_by_kind_ordered() {
    let (_dir, store) = open_store();
    store.put_record(&envelope(3_000, "c")).unwrap();
    store.put_record(&envelope(1_000, "a")).unwrap();
    store.put_record(&envelope(2_000, "b")).unwrap();
    let hits = store
        .scan_by_kind(
            ArtifactKind::ScreenState,
            TimeRange::new(Timestamp::from_millis(0), Timestamp::from_millis(2_500)),
        )
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].created_ts_ms <= hits[1].created_ts_ms);
    let count = store
        .count_by_kind(ArtifactKind::ScreenState, TimeRange::all())
        .unwrap();
    assert_eq!(count, 3);
}

// ============================================================================
// SECTION: Reconciliation
// ============================================================================

/// Tests the reconcile pass is idempotent on a consistent store.
#[test]
fn test_reconcile_is_idempotent() {
    let (_dir, store) = open_store();
    store.put_record(&envelope(1_000, "a")).unwrap();
    store.put_record(&envelope(2_000, "b")).unwrap();
    let repaired_first = store.reconcile_projection().unwrap();
    let repaired_second = store.reconcile_projection().unwrap();
    assert_eq!(repaired_first, 0);
    assert_eq!(repaired_second, 0);
}
