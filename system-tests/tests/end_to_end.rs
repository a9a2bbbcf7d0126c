// system-tests/tests/end_to_end.rs
// ============================================================================
// Module: End-to-End Scenario
// Description: Handoff → Stage-1 → extraction → index → evidence query.
// ============================================================================
//! ## Overview
//! Builds a real handoff directory with a PNG frame, ingests it, runs the
//! full extraction DAG with scripted backends, rebuilds the indexes, and
//! answers an evidence-only query with resolvable citations.

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

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use state_tape_config::ExtractionConfig;
use state_tape_config::PolicyConfig;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::BBox;
use state_tape_core::BlobStore;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::ExtractorInfo;
use state_tape_core::MediaId;
use state_tape_core::NoopAuditSink;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RawOcrToken;
use state_tape_core::RecordStore;
use state_tape_core::RunId;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_extract::ExtractionPipeline;
use state_tape_extract::PipelineBackends;
use state_tape_extract::ScriptedOcrBackend;
use state_tape_extract::ScriptedVlmBackend;
use state_tape_extract::TapeBuilderConfig;
use state_tape_extract::builtin_admission;
use state_tape_extract::register_builtin_pack;
use state_tape_index::IndexSet;
use state_tape_ingest::HandoffIngestor;
use state_tape_ingest::TransferMode;
use state_tape_plugins::CancelToken;
use state_tape_plugins::PluginRegistry;
use state_tape_query::PolicyGate;
use state_tape_query::QueryEngine;
use state_tape_query::QueryOutcome;
use state_tape_store_sqlite::FileBlobStore;
use state_tape_store_sqlite::SqliteAuditStore;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Encodes a synthetic player window as PNG bytes.
fn png_frame() -> Vec<u8> {
    let mut img = image::RgbImage::from_pixel(320, 160, image::Rgb([245, 245, 245]));
    for y in 30..50 {
        for x in 30..260 {
            img.put_pixel(x, y, image::Rgb([20, 20, 20]));
        }
    }
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
    bytes
}

/// Builds a handoff directory holding one frame and its blob.
fn build_handoff(root: &Path, png: &[u8]) {
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(root)).unwrap();
    let blobs = FileBlobStore::open(root, store.clone()).unwrap();
    let media_id = blobs.put_blob(png, Timestamp::from_millis(i64::MAX / 2)).unwrap();
    let ts = 1_700_000_100_000_i64;
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
            "frame_id": "frame-0001",
            "ts_ms": ts,
            "width": 320,
            "height": 160,
            "image_sha256": { "algorithm": "sha256", "value": media_id.as_str() },
            "source": { "monitor": "monitor-0", "session": "session-e2e" },
        }),
        Timestamp::from_millis(ts),
    )
    .unwrap();
    store.put_record(&envelope).unwrap();
    std::fs::write(root.join("COMPLETE.json"), "{}").unwrap();
}

// ============================================================================
// SECTION: Scenario
// ============================================================================

/// Runs the whole pipeline and answers a query from evidence alone.
#[test]
fn test_capture_to_answer() {
    let handoff = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let png = png_frame();
    build_handoff(handoff.path(), &png);

    // Stage-1 import.
    let audit = SqliteAuditStore::open_at_root(dest.path()).unwrap();
    let sink = NoopAuditSink;
    let ingestor =
        HandoffIngestor::new(dest.path().to_path_buf(), TransferMode::Hardlink, &audit, &sink);
    let report = ingestor.ingest(handoff.path()).unwrap();
    assert!(!report.skipped);
    assert_eq!(report.counts.media_files_linked + report.counts.media_files_copied, 1);

    // Stage-2 extraction with scripted backends.
    let store =
        SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dest.path())).unwrap();
    let blobs = FileBlobStore::open(dest.path(), store.clone()).unwrap();
    let ocr = Arc::new(ScriptedOcrBackend::new());
    ocr.script_patch(
        0,
        0,
        vec![RawOcrToken {
            text: "Bohemian Rhapsody - Queen".to_string(),
            bbox: BBox::new(30, 30, 260, 50).unwrap(),
            confidence: 0.95,
        }],
    );
    let vlm = Arc::new(ScriptedVlmBackend::new());
    vlm.script_output(json!({
        "elements": [
            { "type": "window", "bbox": [0, 0, 320, 160], "label": "Music Player",
              "interactable": false, "app_hint": "player" }
        ]
    }));
    let backends = PipelineBackends { ocr: Arc::clone(&ocr) as _, vlm };
    let mut registry =
        PluginRegistry::new(Arc::new(SqliteAuditStore::open_at_root(dest.path()).unwrap()));
    register_builtin_pack(&mut registry, &builtin_admission().unwrap(), &backends).unwrap();
    let mut pipeline = ExtractionPipeline::new(
        registry,
        ExtractionConfig::default(),
        TapeBuilderConfig::default(),
        Arc::new(store.clone()),
    );
    pipeline.begin_run();
    let frames = store.scan_by_kind(ArtifactKind::Frame, TimeRange::all()).unwrap();
    assert_eq!(frames.len(), 1);
    let media = blobs
        .get_blob(&MediaId::new(
            frames[0].payload.pointer("/image_sha256/value").unwrap().as_str().unwrap(),
        ))
        .unwrap();
    let cancel = CancelToken::new();
    let run_id = RunId::new("e2e-run");
    let frame_report = pipeline.process_frame(&run_id, &cancel, &frames[0], &media).unwrap();
    assert!(!frame_report.dropped);
    pipeline.flush().unwrap();
    assert!(ocr.call_count() > 0);

    // Derived artifacts landed.
    let states = store.scan_by_kind(ArtifactKind::ScreenState, TimeRange::all()).unwrap();
    assert_eq!(states.len(), 1);
    let spans = store.scan_by_kind(ArtifactKind::StateSpan, TimeRange::all()).unwrap();
    assert_eq!(spans.len(), 1);

    // Index and answer.
    let arc: Arc<dyn RecordStore> = Arc::new(store);
    let index = IndexSet::rebuild(arc.as_ref(), false).unwrap();
    let engine = QueryEngine::new(index, arc, PolicyGate::new(PolicyConfig::default()));
    let response = engine.execute("bohemian rhapsody", 8, 0);
    assert_eq!(response.state, QueryOutcome::Ok);
    assert!(response.summary.contains("Bohemian Rhapsody"));
    assert!(response
        .citations
        .iter()
        .any(|citation| citation.record_type.starts_with("derived.")));
}
