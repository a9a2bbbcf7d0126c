// state-tape-extract/tests/pipeline_tables.rs
// ============================================================================
// Module: Multi-Table Pipeline Tests
// Description: Table and spreadsheet node invocations over several regions.
// ============================================================================
//! ## Overview
//! Drives the table and spreadsheet nodes directly and through the full
//! pipeline with two table regions where only the second carries
//! spreadsheet strips, asserting every overlay stays attached to the table
//! it was detected on.

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

use serde_json::Value;
use serde_json::json;
use state_tape_config::ExtractionConfig;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::BBox;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::ElementGraph;
use state_tape_core::ElementState;
use state_tape_core::ElementType;
use state_tape_core::ElementId;
use state_tape_core::ExtractorInfo;
use state_tape_core::Frame;
use state_tape_core::FrameId;
use state_tape_core::FrameSource;
use state_tape_core::HashAlgorithm;
use state_tape_core::HashDigest;
use state_tape_core::MediaId;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RawOcrToken;
use state_tape_core::RecordStore;
use state_tape_core::RunId;
use state_tape_core::SessionId;
use state_tape_core::StateId;
use state_tape_core::TextToken;
use state_tape_core::TextTokenFlags;
use state_tape_core::TextTokenSource;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_core::UIElement;
use state_tape_core::hash_bytes;
use state_tape_extract::ExtractionPipeline;
use state_tape_extract::NormalizedFrame;
use state_tape_extract::PipelineBackends;
use state_tape_extract::ScriptedOcrBackend;
use state_tape_extract::ScriptedVlmBackend;
use state_tape_extract::SheetObservation;
use state_tape_extract::TapeBuilderConfig;
use state_tape_extract::builtin_admission;
use state_tape_extract::nodes::layout::assemble_layout;
use state_tape_extract::nodes::table::SpreadsheetNode;
use state_tape_extract::nodes::table::TableNode;
use state_tape_extract::register_builtin_pack;
use state_tape_extract::wire::KEY_ELEMENT_GRAPH;
use state_tape_extract::wire::KEY_FRAME_NORMALIZED;
use state_tape_extract::wire::KEY_LAYOUT_TOKENS;
use state_tape_extract::wire::KEY_TABLES;
use state_tape_extract::wire::encode_b64;
use state_tape_plugins::CancelToken;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginRegistry;
use state_tape_plugins::TapePlugin;
use state_tape_store_sqlite::SqliteAuditStore;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Plain-table region (no spreadsheet strips).
const PLAIN_REGION: [i32; 4] = [10, 40, 190, 120];
/// Spreadsheet region (letter and number strips).
const SHEET_REGION: [i32; 4] = [210, 40, 390, 120];

/// Token geometry shared by the direct and pipeline tests: the first
/// region holds plain data, the second adds column letters and row
/// numbers.
fn token_fixture() -> Vec<(&'static str, [i32; 4])> {
    vec![
        // Plain table data.
        ("foo", [40, 60, 80, 72]),
        ("bar", [100, 60, 140, 72]),
        ("baz", [40, 80, 80, 92]),
        ("qux", [100, 80, 140, 92]),
        // Spreadsheet column-letter strip.
        ("A", [220, 42, 230, 54]),
        ("B", [260, 42, 270, 54]),
        // Spreadsheet row-number strip.
        ("1", [212, 60, 218, 72]),
        ("2", [212, 80, 218, 92]),
        // Spreadsheet data.
        ("aa", [240, 60, 280, 72]),
        ("bb", [320, 60, 360, 72]),
        ("cc", [240, 80, 280, 92]),
        ("dd", [320, 80, 360, 92]),
    ]
}

/// Builds laid-out tokens from the fixture.
fn laid_out_tokens() -> Vec<TextToken> {
    let tokens = token_fixture()
        .into_iter()
        .map(|(text, [x1, y1, x2, y2])| TextToken {
            token_id: format!("tok-{text}"),
            text: text.to_string(),
            norm_text: text.to_string(),
            bbox: BBox::new(x1, y1, x2, y2).unwrap(),
            confidence: 0.9,
            line_id: None,
            block_id: None,
            source: TextTokenSource::Ocr,
            flags: TextTokenFlags::default(),
        })
        .collect();
    assemble_layout(tokens)
}

/// Builds an element graph with two table regions.
fn two_table_graph() -> ElementGraph {
    let table = |id: &str, region: [i32; 4]| UIElement {
        element_id: ElementId::new(id),
        element_type: ElementType::Table,
        bbox: BBox::new(region[0], region[1], region[2], region[3]).unwrap(),
        text_refs: Vec::new(),
        label: None,
        interactable: false,
        state: ElementState::default(),
        parent_id: None,
        children_ids: Vec::new(),
        z: 0,
        app_hint: Some("sheets".to_string()),
    };
    ElementGraph {
        state_id: StateId::new("state-fixture"),
        elements: vec![table("t-plain", PLAIN_REGION), table("t-sheet", SHEET_REGION)],
        edges: Vec::new(),
    }
}

/// Builds a blank normalized frame covering both regions.
fn blank_frame() -> NormalizedFrame {
    let rgb = vec![250_u8; 400 * 200 * 3];
    NormalizedFrame {
        frame_id: FrameId::new("frame-tables"),
        ts_ms: Timestamp::from_millis(1_000),
        session_id: SessionId::new("session-tables"),
        media_id: MediaId::new("ef".repeat(32)),
        frame_index: 0,
        width: 400,
        height: 200,
        image_sha256: HashDigest { algorithm: HashAlgorithm::Sha256, value: "22".repeat(32) },
        phash_hex: "0000000000000000".to_string(),
        rgb_b64: encode_b64(&rgb),
    }
}

/// Builds an invocation context with an empty config.
fn context() -> PluginContext {
    PluginContext {
        run_id: RunId::new("run-tables"),
        ts_ms: Timestamp::from_millis(1_000),
        config: json!({}),
        cancel: CancelToken::new(),
    }
}

// ============================================================================
// SECTION: Direct Node Invocations
// ============================================================================

/// Tests the table node emits one grid per element region, in order.
#[test]
fn test_table_node_emits_one_grid_per_region() {
    let node = TableNode::new();
    let mut inputs = PluginInputs::default();
    inputs.insert(KEY_FRAME_NORMALIZED, serde_json::to_value(blank_frame()).unwrap());
    inputs.insert(KEY_ELEMENT_GRAPH, serde_json::to_value(two_table_graph()).unwrap());
    inputs.insert(KEY_LAYOUT_TOKENS, serde_json::to_value(laid_out_tokens()).unwrap());
    let output = node.invoke(&context(), &inputs).unwrap();
    assert_eq!(output.items.len(), 2);
    let first_bbox = output.items[0].get("bbox").unwrap();
    let second_bbox = output.items[1].get("bbox").unwrap();
    assert_eq!(first_bbox[0], json!(PLAIN_REGION[0]));
    assert_eq!(second_bbox[0], json!(SHEET_REGION[0]));
    // The plain grid resolves two columns, the sheet grid three (strips).
    assert_eq!(output.items[0].get("cols"), Some(&json!(2)));
    assert_eq!(output.items[1].get("cols"), Some(&json!(3)));
}

/// Tests spreadsheet observations stay aligned when only the second table
/// qualifies.
#[test]
fn test_spreadsheet_observations_align_with_tables() {
    let table_node = TableNode::new();
    let mut inputs = PluginInputs::default();
    inputs.insert(KEY_FRAME_NORMALIZED, serde_json::to_value(blank_frame()).unwrap());
    inputs.insert(KEY_ELEMENT_GRAPH, serde_json::to_value(two_table_graph()).unwrap());
    inputs.insert(KEY_LAYOUT_TOKENS, serde_json::to_value(laid_out_tokens()).unwrap());
    let tables = table_node.invoke(&context(), &inputs).unwrap().items;
    inputs.insert(KEY_TABLES, Value::Array(tables));

    let sheet_node = SpreadsheetNode::new();
    let output = sheet_node.invoke(&context(), &inputs).unwrap();
    assert_eq!(output.items.len(), 2);
    let observations: Vec<SheetObservation> = output
        .items
        .iter()
        .map(|item| serde_json::from_value(item.clone()).unwrap())
        .collect();
    assert_eq!(observations[0].table_index, 0);
    assert!(observations[0].sheet.is_none());
    assert_eq!(observations[1].table_index, 1);
    let sheet = observations[1].sheet.as_ref().expect("second table is a spreadsheet");
    assert!(sheet.has_column_strip);
    assert!(sheet.has_row_strip);
    assert_eq!(output.metrics.rows_out, 1);
}

// ============================================================================
// SECTION: Pipeline Alignment
// ============================================================================

/// Encodes a blank 400×200 frame as PNG bytes.
fn png_frame() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(400, 200, image::Rgb([250, 250, 250]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
    bytes
}

/// Seals a Stage-1 frame envelope over the PNG bytes.
fn frame_envelope(png: &[u8]) -> ArtifactEnvelope {
    let media_sha = hash_bytes(DEFAULT_HASH_ALGORITHM, png);
    let frame = Frame {
        frame_id: FrameId::new("frame-0001"),
        ts_ms: Timestamp::from_millis(1_700_000_002_000),
        width: 400,
        height: 200,
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

/// Tests the committed table artifacts carry the right per-table overlay.
#[test]
fn test_pipeline_attaches_sheet_meta_to_matching_table() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    let audit = SqliteAuditStore::open_at_root(dir.path()).unwrap();
    let ocr = Arc::new(ScriptedOcrBackend::new());
    ocr.script_patch(
        0,
        0,
        token_fixture()
            .into_iter()
            .map(|(text, [x1, y1, x2, y2])| RawOcrToken {
                text: text.to_string(),
                bbox: BBox::new(x1, y1, x2, y2).unwrap(),
                confidence: 0.9,
            })
            .collect(),
    );
    let vlm = Arc::new(ScriptedVlmBackend::new());
    vlm.script_output(json!({
        "elements": [
            { "type": "window", "bbox": [0, 0, 400, 200], "label": "Sheets",
              "interactable": false, "app_hint": "sheets" },
            { "type": "table", "bbox": PLAIN_REGION, "interactable": false },
            { "type": "table", "bbox": SHEET_REGION, "interactable": false }
        ]
    }));
    let backends = PipelineBackends { ocr, vlm };
    let mut registry = PluginRegistry::new(Arc::new(audit));
    register_builtin_pack(&mut registry, &builtin_admission().unwrap(), &backends).unwrap();
    let mut pipeline = ExtractionPipeline::new(
        registry,
        ExtractionConfig::default(),
        TapeBuilderConfig::default(),
        Arc::new(store.clone()),
    );
    pipeline.begin_run();
    let png = png_frame();
    let envelope = frame_envelope(&png);
    let report = pipeline
        .process_frame(&RunId::new("run-tables"), &CancelToken::new(), &envelope, &png)
        .unwrap();
    assert!(!report.dropped);
    pipeline.flush().unwrap();

    let tables = store.scan_by_kind(ArtifactKind::Table, TimeRange::all()).unwrap();
    assert_eq!(tables.len(), 2);
    for record in &tables {
        let region_x1 = record.payload.pointer("/table/bbox/0").and_then(Value::as_i64);
        let sheet_meta = record.payload.get("sheet_meta").unwrap();
        match region_x1 {
            Some(x1) if x1 == i64::from(PLAIN_REGION[0]) => {
                assert!(sheet_meta.is_null(), "plain table gained an overlay: {sheet_meta}");
            }
            Some(x1) if x1 == i64::from(SHEET_REGION[0]) => {
                assert_eq!(sheet_meta.get("has_column_strip"), Some(&json!(true)));
                assert_eq!(sheet_meta.get("has_row_strip"), Some(&json!(true)));
            }
            other => panic!("unexpected table region start: {other:?}"),
        }
    }
}
