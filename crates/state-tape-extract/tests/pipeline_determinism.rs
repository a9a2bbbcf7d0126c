// state-tape-extract/tests/pipeline_determinism.rs
// ============================================================================
// Module: Pipeline Determinism Tests
// Description: End-to-end rerun test for the extraction DAG.
// ============================================================================
//! ## Overview
//! Runs the full builtin pack twice over the same frame with identical
//! configuration and asserts the committed artifact identifiers match
//! exactly.

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
use std::sync::Arc;

use state_tape_config::ExtractionConfig;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::BBox;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::ExtractorInfo;
use state_tape_core::Frame;
use state_tape_core::FrameId;
use state_tape_core::FrameSource;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RawOcrToken;
use state_tape_core::RecordStore;
use state_tape_core::RunId;
use state_tape_core::SessionId;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_extract::ExtractionPipeline;
use state_tape_extract::PipelineBackends;
use state_tape_extract::ScriptedOcrBackend;
use state_tape_extract::ScriptedVlmBackend;
use state_tape_extract::TapeBuilderConfig;
use state_tape_extract::builtin_admission;
use state_tape_extract::register_builtin_pack;
use state_tape_plugins::CancelToken;
use state_tape_plugins::PluginRegistry;
use state_tape_store_sqlite::SqliteAuditStore;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Encodes a synthetic 200×100 frame as PNG bytes.
fn png_frame() -> Vec<u8> {
    let mut img = image::RgbImage::from_pixel(200, 100, image::Rgb([240, 240, 240]));
    for y in 20..36 {
        for x in 20..120 {
            img.put_pixel(x, y, image::Rgb([10, 10, 10]));
        }
    }
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
    bytes
}

/// Seals a Stage-1 frame envelope over the PNG bytes.
fn frame_envelope(png: &[u8]) -> ArtifactEnvelope {
    let media_sha = hash_bytes(DEFAULT_HASH_ALGORITHM, png);
    let frame = Frame {
        frame_id: FrameId::new("frame-0001"),
        ts_ms: Timestamp::from_millis(1_700_000_001_000),
        width: 200,
        height: 100,
        image_sha256: media_sha,
        source: FrameSource { monitor: "monitor-0".to_string(), session: SessionId::new("s1") },
    };
    let config_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}");
    ArtifactEnvelope::seal(
        ArtifactKind::Frame,
        1,
        ExtractorInfo {
            id: PluginId::new("system.ingest"),
            version: "1.0.0".to_string(),
            config_hash: config_hash.clone(),
        },
        ProvenanceRecord {
            producer_plugin_id: PluginId::new("system.ingest"),
            producer_plugin_version: "1.0.0".to_string(),
            model_id: None,
            model_version: None,
            config_hash,
            input_artifact_ids: Vec::new(),
            created_ts_ms: frame.ts_ms,
        },
        1.0,
        Vec::new(),
        serde_json::to_value(&frame).unwrap(),
        frame.ts_ms,
    )
    .unwrap()
}

/// Builds a pipeline over a fresh store with scripted backends.
fn pipeline(dir: &tempfile::TempDir) -> ExtractionPipeline {
    let store =
        SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    let audit = SqliteAuditStore::open_at_root(dir.path()).unwrap();
    let ocr = Arc::new(ScriptedOcrBackend::new());
    ocr.script_patch(
        0,
        0,
        vec![RawOcrToken {
            text: "Bohemian Rhapsody - Queen".to_string(),
            bbox: BBox::new(20, 20, 120, 36).unwrap(),
            confidence: 0.93,
        }],
    );
    let vlm = Arc::new(ScriptedVlmBackend::new());
    vlm.script_output(serde_json::json!({
        "elements": [
            { "type": "window", "bbox": [0, 0, 200, 100], "label": "Player",
              "interactable": false, "app_hint": "player" }
        ]
    }));
    let backends = PipelineBackends { ocr, vlm };
    let mut registry = PluginRegistry::new(Arc::new(audit));
    let admission = builtin_admission().unwrap();
    register_builtin_pack(&mut registry, &admission, &backends).unwrap();
    ExtractionPipeline::new(
        registry,
        ExtractionConfig::default(),
        TapeBuilderConfig::default(),
        Arc::new(store),
    )
}

// ============================================================================
// SECTION: Determinism
// ============================================================================

/// Tests two independent runs over the same frame commit identical ids.
#[test]
fn test_rerun_commits_identical_artifact_ids() {
    let png = png_frame();
    let envelope = frame_envelope(&png);
    let run_id = RunId::new("run-determinism");
    let cancel = CancelToken::new();

    let dir_a = tempfile::tempdir().unwrap();
    let mut pipeline_a = pipeline(&dir_a);
    pipeline_a.begin_run();
    let report_a = pipeline_a.process_frame(&run_id, &cancel, &envelope, &png).unwrap();
    let mut ids_a = report_a.committed;
    ids_a.extend(pipeline_a.flush().unwrap());

    let dir_b = tempfile::tempdir().unwrap();
    let mut pipeline_b = pipeline(&dir_b);
    pipeline_b.begin_run();
    let report_b = pipeline_b.process_frame(&run_id, &cancel, &envelope, &png).unwrap();
    let mut ids_b = report_b.committed;
    ids_b.extend(pipeline_b.flush().unwrap());

    assert!(!ids_a.is_empty());
    assert_eq!(ids_a, ids_b);
}

/// Tests reprocessing into the same store is a no-op for record counts.
#[test]
fn test_retry_reuses_artifact_ids() {
    let png = png_frame();
    let envelope = frame_envelope(&png);
    let run_id = RunId::new("run-retry");
    let cancel = CancelToken::new();
    let dir = tempfile::tempdir().unwrap();

    let store =
        SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    store.put_record(&envelope).unwrap();

    let mut first = pipeline(&dir);
    first.begin_run();
    let report = first.process_frame(&run_id, &cancel, &envelope, &png).unwrap();
    first.flush().unwrap();
    assert!(!report.dropped);

    let count_before = store
        .count_by_kind(ArtifactKind::ScreenState, state_tape_core::TimeRange::all())
        .unwrap();

    let mut second = pipeline(&dir);
    second.begin_run();
    second.process_frame(&run_id, &cancel, &envelope, &png).unwrap();
    second.flush().unwrap();

    let count_after = store
        .count_by_kind(ArtifactKind::ScreenState, state_tape_core::TimeRange::all())
        .unwrap();
    assert_eq!(count_before, count_after);
}
