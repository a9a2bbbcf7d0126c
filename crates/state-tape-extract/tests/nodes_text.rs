// state-tape-extract/tests/nodes_text.rs
// ============================================================================
// Module: Text Node Tests
// Description: Tests for OCR suppression, layout assembly, and table grids.
// ============================================================================
//! ## Overview
//! Validates duplicate suppression across overlapping tiles, line/block
//! grouping, and deterministic (row, col) grid inference.

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

use state_tape_core::BBox;
use state_tape_core::FrameId;
use state_tape_core::HashAlgorithm;
use state_tape_core::HashDigest;
use state_tape_core::MediaId;
use state_tape_core::SessionId;
use state_tape_core::TextToken;
use state_tape_core::TextTokenFlags;
use state_tape_core::TextTokenSource;
use state_tape_core::Timestamp;
use state_tape_extract::NormalizedFrame;
use state_tape_extract::nodes::layout::assemble_layout;
use state_tape_extract::nodes::ocr::suppress_duplicates;
use state_tape_extract::nodes::preprocess::cut_tiles;
use state_tape_extract::nodes::table::infer_grid;
use state_tape_extract::wire::encode_b64;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds a token at the given bounds.
fn token(text: &str, x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> TextToken {
    TextToken {
        token_id: format!("tok-{text}-{x1}-{y1}"),
        text: text.to_string(),
        norm_text: text.to_string(),
        bbox: BBox::new(x1, y1, x2, y2).unwrap(),
        confidence,
        line_id: None,
        block_id: None,
        source: TextTokenSource::Ocr,
        flags: TextTokenFlags::default(),
    }
}

/// Builds a blank normalized frame of the given size.
fn frame(width: u32, height: u32) -> NormalizedFrame {
    let rgb = vec![255_u8; (width * height * 3) as usize];
    NormalizedFrame {
        frame_id: FrameId::new("frame-1"),
        ts_ms: Timestamp::from_millis(1_000),
        session_id: SessionId::new("session-1"),
        media_id: MediaId::new("ab".repeat(32)),
        frame_index: 0,
        width,
        height,
        image_sha256: HashDigest { algorithm: HashAlgorithm::Sha256, value: "00".repeat(32) },
        phash_hex: "0000000000000000".to_string(),
        rgb_b64: encode_b64(&rgb),
    }
}

// ============================================================================
// SECTION: Tiling
// ============================================================================

/// Tests tiles cover the frame with overlap and include the full frame.
#[test]
fn test_tiling_covers_frame() {
    let tiles = cut_tiles(2048, 1024, 1024, 64, true);
    assert!(tiles.iter().any(|tile| tile.full_frame));
    let max_x = tiles.iter().map(|tile| tile.bbox.x2()).max().unwrap();
    let max_y = tiles.iter().map(|tile| tile.bbox.y2()).max().unwrap();
    assert_eq!(max_x, 2048);
    assert_eq!(max_y, 1024);
    // Sorted by (y1, x1, -area, patch_id).
    for pair in tiles.windows(2) {
        assert!(
            (pair[0].bbox.y1(), pair[0].bbox.x1(), -pair[0].bbox.area())
                <= (pair[1].bbox.y1(), pair[1].bbox.x1(), -pair[1].bbox.area())
        );
    }
}

// ============================================================================
// SECTION: Suppression
// ============================================================================

/// Tests duplicates with the same text and high IoU keep the best
/// confidence.
#[test]
fn test_nms_keeps_highest_confidence() {
    let kept = suppress_duplicates(vec![
        token("hello", 10, 10, 60, 24, 0.80),
        token("hello", 11, 10, 61, 24, 0.95),
        token("world", 70, 10, 120, 24, 0.90),
    ]);
    assert_eq!(kept.len(), 2);
    let hello = kept.iter().find(|t| t.norm_text == "hello").unwrap();
    assert!((hello.confidence - 0.95).abs() < 1e-6);
}

/// Tests same text far apart survives suppression.
#[test]
fn test_nms_keeps_distant_same_text() {
    let kept = suppress_duplicates(vec![
        token("ok", 10, 10, 30, 24, 0.9),
        token("ok", 300, 10, 320, 24, 0.9),
    ]);
    assert_eq!(kept.len(), 2);
}

// ============================================================================
// SECTION: Layout
// ============================================================================

/// Tests tokens group into lines by vertical overlap and blocks by gap.
#[test]
fn test_layout_lines_and_blocks() {
    let tokens = assemble_layout(vec![
        token("alpha", 10, 10, 60, 26, 0.9),
        token("beta", 70, 12, 120, 28, 0.9),
        token("gamma", 10, 34, 60, 50, 0.9),
        // Far below: new block.
        token("delta", 10, 300, 60, 316, 0.9),
    ]);
    let alpha = tokens.iter().find(|t| t.norm_text == "alpha").unwrap();
    let beta = tokens.iter().find(|t| t.norm_text == "beta").unwrap();
    let gamma = tokens.iter().find(|t| t.norm_text == "gamma").unwrap();
    let delta = tokens.iter().find(|t| t.norm_text == "delta").unwrap();
    assert_eq!(alpha.line_id, beta.line_id);
    assert_ne!(alpha.line_id, gamma.line_id);
    assert_eq!(alpha.block_id, gamma.block_id);
    assert_ne!(alpha.block_id, delta.block_id);
}

// ============================================================================
// SECTION: Table Grid
// ============================================================================

/// Tests aligned tokens infer a deterministic (row, col) grid.
#[test]
fn test_table_grid_inference() {
    let laid_out = assemble_layout(vec![
        token("name", 20, 20, 80, 36, 0.9),
        token("qty", 150, 20, 200, 36, 0.9),
        token("apples", 20, 44, 90, 60, 0.9),
        token("12", 150, 44, 180, 60, 0.9),
        token("pears", 20, 68, 85, 84, 0.9),
        token("7", 150, 68, 170, 84, 0.9),
    ]);
    let region = BBox::new(0, 0, 400, 200).unwrap();
    let table = infer_grid(&frame(400, 200), &region, &laid_out).unwrap();
    assert_eq!(table.rows, 3);
    assert_eq!(table.cols, 2);
    let cell = |row: u32, col: u32| {
        table
            .cells
            .iter()
            .find(|cell| cell.row == row && cell.col == col)
            .map(|cell| cell.norm_text.as_str())
    };
    assert_eq!(cell(0, 0), Some("name"));
    assert_eq!(cell(1, 1), Some("12"));
    assert_eq!(cell(2, 0), Some("pears"));
    // Round trip keeps the shape.
    let parsed = state_tape_core::parse_csv(&table.to_csv());
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].len(), 2);
}
