// state-tape-ingest/tests/stage1.rs
// ============================================================================
// Module: Stage-1 Tests
// Description: Idempotence and abort-on-missing-blob scenarios.
// ============================================================================
//! ## Overview
//! Builds a real handoff directory (metadata database, sharded media files,
//! terminal marker) and validates idempotent re-ingest and the
//! missing-blob abort path.

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

use std::fs;
use std::path::Path;

use serde_json::json;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::BlobStore;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::ExtractorInfo;
use state_tape_core::NoopAuditSink;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RecordStore;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_ingest::HandoffIngestor;
use state_tape_ingest::INGEST_COMPLETED_METHOD;
use state_tape_ingest::IngestError;
use state_tape_ingest::TransferMode;
use state_tape_ingest::read_marker;
use state_tape_store_sqlite::FileBlobStore;
use state_tape_store_sqlite::SqliteAuditStore;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds a handoff directory with the given frame count.
fn build_handoff(root: &Path, frames: usize) -> Vec<String> {
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(root)).unwrap();
    let blobs = FileBlobStore::open(root, store.clone()).unwrap();
    let mut media_ids = Vec::new();
    for index in 0..frames {
        let pixels = format!("pixels-{index}").into_bytes();
        let media_id = blobs
            .put_blob(&pixels, Timestamp::from_millis(i64::MAX / 2))
            .unwrap();
        let ts = 1_700_000_000_000 + index as i64 * 1_000;
        let config_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}");
        let envelope = ArtifactEnvelope::seal(
            ArtifactKind::Frame,
            1,
            ExtractorInfo {
                id: PluginId::new("capture.host"),
                version: "1.0.0".to_string(),
                config_hash: config_hash.clone(),
            },
            ProvenanceRecord {
                producer_plugin_id: PluginId::new("capture.host"),
                producer_plugin_version: "1.0.0".to_string(),
                model_id: None,
                model_version: None,
                config_hash,
                input_artifact_ids: Vec::new(),
                created_ts_ms: Timestamp::from_millis(ts),
            },
            1.0,
            Vec::new(),
            json!({
                "frame_id": format!("frame-{index:04}"),
                "ts_ms": ts,
                "width": 200,
                "height": 100,
                "image_sha256": { "algorithm": "sha256", "value": media_id.as_str() },
                "source": { "monitor": "monitor-0", "session": "session-1" },
            }),
            Timestamp::from_millis(ts),
        )
        .unwrap();
        store.put_record(&envelope).unwrap();
        media_ids.push(media_id.as_str().to_string());
    }
    fs::write(root.join("COMPLETE.json"), "{}").unwrap();
    media_ids
}

/// Opens ingest collaborators rooted at the destination.
fn dest_stores(dest: &Path) -> (SqliteAuditStore, NoopAuditSink) {
    (SqliteAuditStore::open_at_root(dest).unwrap(), NoopAuditSink)
}

// ============================================================================
// SECTION: Re-Ingest Idempotence
// ============================================================================

/// Tests re-ingesting a handoff copies nothing new and writes the marker
/// both times.
#[test]
fn test_stage1_idempotence() {
    let handoff = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    build_handoff(handoff.path(), 3);
    let (audit, sink) = dest_stores(dest.path());
    let ingestor =
        HandoffIngestor::new(dest.path().to_path_buf(), TransferMode::Hardlink, &audit, &sink);

    let first = ingestor.ingest(handoff.path()).unwrap();
    assert!(!first.skipped);
    assert_eq!(
        first.counts.media_files_linked + first.counts.media_files_copied,
        3
    );
    assert!(read_marker(handoff.path()).unwrap().unwrap().is_valid_v1());

    let second = ingestor.ingest(handoff.path()).unwrap();
    assert!(!second.skipped);
    assert_eq!(second.counts.metadata_rows_copied, 0);
    assert_eq!(
        second.counts.media_files_linked + second.counts.media_files_copied,
        0
    );
    assert!(read_marker(handoff.path()).unwrap().unwrap().is_valid_v1());

    // Destination row count stays put; audit has two completion rows.
    let dest_store =
        SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dest.path())).unwrap();
    let frames = dest_store.count_by_kind(ArtifactKind::Frame, TimeRange::all()).unwrap();
    assert_eq!(frames, 3);
    assert_eq!(audit.count_by_method(INGEST_COMPLETED_METHOD).unwrap(), 2);
}

/// Tests a handoff without the terminal marker is skipped untouched.
#[test]
fn test_incomplete_handoff_skipped() {
    let handoff = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    build_handoff(handoff.path(), 1);
    fs::remove_file(handoff.path().join("COMPLETE.json")).unwrap();
    let (audit, sink) = dest_stores(dest.path());
    let ingestor =
        HandoffIngestor::new(dest.path().to_path_buf(), TransferMode::Hardlink, &audit, &sink);
    let report = ingestor.ingest(handoff.path()).unwrap();
    assert!(report.skipped);
    assert!(read_marker(handoff.path()).unwrap().is_none());
}

// ============================================================================
// SECTION: Missing Blob Abort
// ============================================================================

/// Tests a missing referenced blob aborts before the marker is written.
#[test]
fn test_missing_blob_aborts_without_marker() {
    let handoff = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let media_ids = build_handoff(handoff.path(), 3);
    let victim = handoff
        .path()
        .join("media")
        .join(&media_ids[0][..2])
        .join(format!("{}.blob", media_ids[0]));
    fs::remove_file(victim).unwrap();
    let (audit, sink) = dest_stores(dest.path());
    let ingestor =
        HandoffIngestor::new(dest.path().to_path_buf(), TransferMode::Hardlink, &audit, &sink);
    let result = ingestor.ingest(handoff.path());
    assert!(matches!(result, Err(IngestError::MissingBlob(_))));
    assert!(read_marker(handoff.path()).unwrap().is_none());
    assert_eq!(audit.count_by_method(INGEST_COMPLETED_METHOD).unwrap(), 0);
}
