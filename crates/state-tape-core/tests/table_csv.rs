// state-tape-core/tests/table_csv.rs
// ============================================================================
// Module: Table CSV Tests
// Description: Round-trip tests for table CSV export.
// ============================================================================
//! ## Overview
//! Validates that non-merged tables survive `cells → csv → parse → cells`
//! with shape and cell text preserved.

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
use state_tape_core::Table;
use state_tape_core::TableCell;
use state_tape_core::parse_csv;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds a table with the provided cell texts.
fn table(rows: u32, cols: u32, texts: &[&str]) -> Table {
    let mut cells = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let row = (i as u32) / cols;
        let col = (i as u32) % cols;
        cells.push(TableCell {
            row,
            col,
            norm_text: (*text).to_string(),
            bbox: BBox::new(
                (col * 50) as i32,
                (row * 20) as i32,
                ((col + 1) * 50) as i32,
                ((row + 1) * 20) as i32,
            )
            .unwrap(),
            confidence: 0.95,
        });
    }
    let mut table = Table {
        frame_id: FrameId::new("frame-1"),
        bbox: BBox::new(0, 0, (cols * 50) as i32, (rows * 20) as i32).unwrap(),
        rows,
        cols,
        cells,
    };
    table.normalize();
    table
}

// ============================================================================
// SECTION: Round Trips
// ============================================================================

/// Tests a plain grid round-trips through CSV.
#[test]
fn test_plain_grid_roundtrip() {
    let source = table(2, 3, &["a", "b", "c", "d", "e", "f"]);
    let csv = source.to_csv();
    let parsed = parse_csv(&csv);
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0], vec!["a", "b", "c"]);
    assert_eq!(parsed[1], vec!["d", "e", "f"]);
}

/// Tests quoting survives commas, quotes, and newlines.
#[test]
fn test_escaped_fields_roundtrip() {
    let source = table(2, 2, &["plain", "a,b", "say \"hi\"", "line1\nline2"]);
    let csv = source.to_csv();
    let parsed = parse_csv(&csv);
    assert_eq!(parsed[0][1], "a,b");
    assert_eq!(parsed[1][0], "say \"hi\"");
    assert_eq!(parsed[1][1], "line1\nline2");
}

/// Tests missing cells render as empty fields keeping the grid shape.
#[test]
fn test_sparse_grid_keeps_shape() {
    let mut source = table(2, 2, &["a", "b", "c", "d"]);
    source.cells.retain(|cell| !(cell.row == 1 && cell.col == 0));
    let csv = source.to_csv();
    let parsed = parse_csv(&csv);
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[1], vec!["", "d"]);
}
