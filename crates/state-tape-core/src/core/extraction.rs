// state-tape-core/src/core/extraction.rs
// ============================================================================
// Module: State Tape Extraction Records
// Description: Tables, code blocks, charts, spreadsheets, and cursor tracks.
// Purpose: Typed payloads for the structured extractors in the DAG.
// Dependencies: crate::core::{geometry, identifiers}, serde
// ============================================================================

//! ## Overview
//! Structured extraction payloads. Tables address cells by deterministic
//! `(row, col)`; CSV export uses RFC 4180-style quoting (fields containing
//! comma, quote, or newline are wrapped in double quotes, embedded quotes
//! doubled). Charts never invent values: when axis calibration fails the
//! record keeps structural metadata and an empty series list.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::geometry::BBox;
use crate::core::identifiers::FrameId;

// ============================================================================
// SECTION: Tables
// ============================================================================

/// One table cell with a deterministic grid address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    /// Zero-based row index.
    pub row: u32,
    /// Zero-based column index.
    pub col: u32,
    /// Normalized cell text.
    pub norm_text: String,
    /// Cell bounds in frame coordinates.
    pub bbox: BBox,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Extracted table with a deterministic cell grid.
///
/// # Invariants
/// - Cells are sorted by `(row, col)` before hashing.
/// - `(row, col)` addresses are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Owning frame identifier.
    pub frame_id: FrameId,
    /// Table region bounds.
    pub bbox: BBox,
    /// Row count.
    pub rows: u32,
    /// Column count.
    pub cols: u32,
    /// Cell grid, sorted by `(row, col)`.
    pub cells: Vec<TableCell>,
}

impl Table {
    /// Sorts cells into canonical `(row, col)` order.
    pub fn normalize(&mut self) {
        self.cells.sort_by_key(|cell| (cell.row, cell.col));
    }

    /// Exports the table as CSV with RFC 4180-style escaping.
    ///
    /// Missing cells render as empty fields so the grid shape round-trips.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut grid = vec![vec![String::new(); self.cols as usize]; self.rows as usize];
        for cell in &self.cells {
            if let Some(slot) =
                grid.get_mut(cell.row as usize).and_then(|row| row.get_mut(cell.col as usize))
            {
                slot.clone_from(&cell.norm_text);
            }
        }
        let mut out = String::new();
        for row in &grid {
            let mut first = true;
            for field in row {
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&escape_csv_field(field));
            }
            out.push('\n');
        }
        out
    }
}

/// Escapes one CSV field: quote when the field contains a comma, quote, or
/// newline; embedded quotes are doubled.
#[must_use]
pub fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        let mut out = String::with_capacity(field.len() + 2);
        out.push('"');
        for ch in field.chars() {
            if ch == '"' {
                out.push('"');
            }
            out.push(ch);
        }
        out.push('"');
        out
    } else {
        field.to_string()
    }
}

/// Parses CSV text produced by [`Table::to_csv`] back into rows of fields.
#[must_use]
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
        } else {
            match ch {
                '"' => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                '\r' => {}
                other => field.push(other),
            }
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

// ============================================================================
// SECTION: Spreadsheets
// ============================================================================

/// Spreadsheet-specific metadata detected on top of a table region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetMeta {
    /// True when a column-letter strip was detected.
    pub has_column_strip: bool,
    /// True when a row-number strip was detected.
    pub has_row_strip: bool,
    /// Formula bar text when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_bar_text: Option<String>,
    /// Active cell A1 address when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_cell_a1: Option<String>,
    /// Active cell bounds from the thick-border heuristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_cell_bbox: Option<BBox>,
    /// True when the A1 address conflicts with the active cell pixel
    /// position; both readings are recorded.
    pub address_conflict: bool,
}

// ============================================================================
// SECTION: Code Blocks
// ============================================================================

/// One reconstructed code line with preserved indentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLine {
    /// Zero-based line index within the block.
    pub index: u32,
    /// Line text with indentation preserved.
    pub text: String,
    /// Line bounds in frame coordinates.
    pub bbox: BBox,
}

/// Caret observation inside a code region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaretObservation {
    /// Caret bounds (thin vertical line).
    pub bbox: BBox,
    /// Line index the caret sits on.
    pub line_index: u32,
}

/// Selection observation inside a code region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionObservation {
    /// Selected region bounds.
    pub bbox: BBox,
    /// First selected line index.
    pub line_start: u32,
    /// Last selected line index.
    pub line_end: u32,
}

/// Extracted code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Owning frame identifier.
    pub frame_id: FrameId,
    /// Code region bounds.
    pub bbox: BBox,
    /// Reconstructed lines, sorted by index.
    pub lines: Vec<CodeLine>,
    /// Median character width in pixels used for indentation.
    pub median_char_width: f32,
    /// Caret observation when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caret: Option<CaretObservation>,
    /// Selection observation when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionObservation>,
}

impl CodeBlock {
    /// Sorts lines into canonical index order.
    pub fn normalize(&mut self) {
        self.lines.sort_by_key(|line| line.index);
    }

    /// Returns the block text joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }
}

// ============================================================================
// SECTION: Charts
// ============================================================================

/// Chart axis orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrientation {
    /// Horizontal axis.
    X,
    /// Vertical axis.
    Y,
}

/// One parsed axis tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisTick {
    /// Tick label text.
    pub label: String,
    /// Numeric value when the label parses as a number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Pixel position along the axis.
    pub pixel: i32,
}

/// One parsed chart axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartAxis {
    /// Axis orientation.
    pub orientation: AxisOrientation,
    /// Parsed ticks in pixel order.
    pub ticks: Vec<AxisTick>,
}

/// One data point mapped from pixels to axis values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Value along the x axis.
    pub x: f64,
    /// Value along the y axis.
    pub y: f64,
}

/// One extracted data series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    /// Series label when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Mapped data points.
    pub points: Vec<ChartPoint>,
}

/// Extracted chart: structural metadata always, values only when calibrated.
///
/// # Invariants
/// - `series` is empty unless at least two numeric ticks were readable on
///   each mapped axis; values are never invented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Owning frame identifier.
    pub frame_id: FrameId,
    /// Chart region bounds.
    pub bbox: BBox,
    /// Plot area bounds when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_bbox: Option<BBox>,
    /// Parsed axes.
    pub axes: Vec<ChartAxis>,
    /// Mapped series; empty when calibration failed.
    pub series: Vec<ChartSeries>,
}

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// Cursor shape classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorShape {
    /// Standard arrow pointer.
    Arrow,
    /// I-beam text cursor.
    IBeam,
    /// Hand / link pointer.
    Hand,
    /// Crosshair.
    Crosshair,
    /// Unclassified shape.
    Unknown,
}

/// Cursor observation for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorTrack {
    /// Owning frame identifier.
    pub frame_id: FrameId,
    /// Cursor bounds when located.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    /// Classified shape.
    pub shape: CursorShape,
    /// Template match scale that won.
    pub scale: f32,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
}
