// state-tape-extract/src/nodes/table.rs
// ============================================================================
// Module: Table and Spreadsheet Nodes
// Description: Grid inference from token alignment; spreadsheet overlays.
// Purpose: Extract deterministic (row, col) cell grids and sheet metadata.
// Dependencies: serde, state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! Table regions come from parsed elements (`table`/`grid` types) or from a
//! dense-alignment heuristic over laid-out tokens. Grid inference uses token
//! alignment: column clusters from x-centers, row clusters from line
//! membership. Every cell receives a deterministic `(row, col)` address;
//! multi-token cells join text in reading order. The spreadsheet node
//! detects column-letter and row-number strips, the name-box address, and
//! the focused cell, recording both readings when they conflict; it emits
//! exactly one index-tagged observation per table so overlays stay attached
//! to the table they were detected on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::BBox;
use state_tape_core::ElementGraph;
use state_tape_core::ElementType;
use state_tape_core::SpreadsheetMeta;
use state_tape_core::Table;
use state_tape_core::TableCell;
use state_tape_core::TextToken;
use state_tape_core::quantize_f32;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginMetrics;
use state_tape_plugins::PluginOutput;
use state_tape_plugins::TapePlugin;

use crate::nodes::empty_config_schema;
use crate::nodes::node_descriptor;
use crate::nodes::object_schema;
use crate::nodes::parse_input;
use crate::nodes::to_items;
use crate::wire::KEY_ELEMENT_GRAPH;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_LAYOUT_TOKENS;
use crate::wire::KEY_SPREADSHEETS;
use crate::wire::KEY_TABLES;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Horizontal distance (px) within which x-centers share a column cluster.
const COLUMN_CLUSTER_PX: i64 = 18;
/// Minimum rows and columns for the heuristic region to qualify.
const MIN_GRID_EDGE: usize = 2;

// ============================================================================
// SECTION: Table Node
// ============================================================================

/// `extract.table` node.
pub struct TableNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl TableNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "extract.table",
                "ui_parse",
                &[KEY_FRAME_NORMALIZED, KEY_ELEMENT_GRAPH, KEY_LAYOUT_TOKENS],
                &[KEY_TABLES],
                empty_config_schema(),
                object_schema(),
                &["/bbox/1", "/bbox/0"],
            ),
        }
    }
}

impl Default for TableNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for TableNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let graph: ElementGraph = parse_input(inputs, KEY_ELEMENT_GRAPH)?;
        let tokens: Vec<TextToken> = parse_input(inputs, KEY_LAYOUT_TOKENS)?;
        let mut regions: Vec<BBox> = graph
            .elements
            .iter()
            .filter(|element| {
                matches!(element.element_type, ElementType::Table | ElementType::Grid)
            })
            .map(|element| element.bbox)
            .collect();
        if regions.is_empty() {
            if let Some(region) = dense_alignment_region(&tokens) {
                regions.push(region);
            }
        }
        let mut tables = Vec::new();
        for region in regions {
            if let Some(table) = infer_grid(&frame, &region, &tokens) {
                tables.push(table);
            }
        }
        let rows_in = tokens.len() as u64;
        Ok(PluginOutput {
            items: to_items(&tables)?,
            metrics: PluginMetrics { rows_in, rows_out: tables.len() as u64, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Grid Inference
// ============================================================================

/// Heuristic fallback: the bounding box of tokens that form a dense aligned
/// grid, when at least `MIN_GRID_EDGE`² aligned cells exist.
#[must_use]
pub fn dense_alignment_region(tokens: &[TextToken]) -> Option<BBox> {
    let columns = cluster_columns(tokens);
    let rows = distinct_lines(tokens);
    if columns.len() < MIN_GRID_EDGE || rows < MIN_GRID_EDGE {
        return None;
    }
    let mut x1 = i32::MAX;
    let mut y1 = i32::MAX;
    let mut x2 = i32::MIN;
    let mut y2 = i32::MIN;
    for token in tokens {
        x1 = x1.min(token.bbox.x1());
        y1 = y1.min(token.bbox.y1());
        x2 = x2.max(token.bbox.x2());
        y2 = y2.max(token.bbox.y2());
    }
    BBox::new(x1, y1, x2, y2).ok()
}

/// Infers the cell grid for one region from token alignment.
#[must_use]
pub fn infer_grid(frame: &NormalizedFrame, region: &BBox, tokens: &[TextToken]) -> Option<Table> {
    let in_region: Vec<&TextToken> =
        tokens.iter().filter(|token| region.contains(&token.bbox)).collect();
    if in_region.is_empty() {
        return None;
    }
    let columns = cluster_columns_ref(&in_region);
    if columns.is_empty() {
        return None;
    }
    // Rows follow line membership in reading order.
    let mut line_ids: Vec<&str> =
        in_region.iter().filter_map(|token| token.line_id.as_deref()).collect();
    line_ids.sort_unstable();
    line_ids.dedup();
    if line_ids.is_empty() {
        return None;
    }
    let mut cells: Vec<TableCell> = Vec::new();
    for token in &in_region {
        let Some(line_id) = token.line_id.as_deref() else {
            continue;
        };
        let Ok(row) = line_ids.binary_search(&line_id) else {
            continue;
        };
        let center = i64::from(token.bbox.x1()) + token.bbox.width() / 2;
        let col = column_for_center(&columns, center);
        let existing = cells.iter_mut().find(|cell| {
            cell.row == row as u32 && cell.col == col as u32
        });
        match existing {
            Some(cell) => {
                // Multi-token cells join text in reading order.
                cell.norm_text.push(' ');
                cell.norm_text.push_str(&token.norm_text);
                cell.confidence = quantize_f32(cell.confidence.min(token.confidence));
            }
            None => cells.push(TableCell {
                row: row as u32,
                col: col as u32,
                norm_text: token.norm_text.clone(),
                bbox: token.bbox,
                confidence: token.confidence,
            }),
        }
    }
    if cells.is_empty() {
        return None;
    }
    let mut table = Table {
        frame_id: frame.frame_id.clone(),
        bbox: *region,
        rows: line_ids.len() as u32,
        cols: columns.len() as u32,
        cells,
    };
    table.normalize();
    Some(table)
}

/// Clusters token x-centers into columns (owned-slice adapter).
fn cluster_columns(tokens: &[TextToken]) -> Vec<i64> {
    let refs: Vec<&TextToken> = tokens.iter().collect();
    cluster_columns_ref(&refs)
}

/// Clusters token x-centers into column centers, ascending.
fn cluster_columns_ref(tokens: &[&TextToken]) -> Vec<i64> {
    let mut centers: Vec<i64> = tokens
        .iter()
        .map(|token| i64::from(token.bbox.x1()) + token.bbox.width() / 2)
        .collect();
    centers.sort_unstable();
    let mut columns: Vec<i64> = Vec::new();
    for center in centers {
        match columns.last() {
            Some(last) if center - last <= COLUMN_CLUSTER_PX => {}
            _ => columns.push(center),
        }
    }
    columns
}

/// Returns the column index whose center is nearest to the token center.
fn column_for_center(columns: &[i64], center: i64) -> usize {
    let mut best = 0_usize;
    let mut best_distance = i64::MAX;
    for (index, column) in columns.iter().enumerate() {
        let distance = (column - center).abs();
        if distance < best_distance {
            best_distance = distance;
            best = index;
        }
    }
    best
}

/// Counts distinct lines among the tokens.
fn distinct_lines(tokens: &[TextToken]) -> usize {
    let mut line_ids: Vec<&str> =
        tokens.iter().filter_map(|token| token.line_id.as_deref()).collect();
    line_ids.sort_unstable();
    line_ids.dedup();
    line_ids.len()
}

// ============================================================================
// SECTION: Spreadsheet Node
// ============================================================================

/// One per-table spreadsheet observation.
///
/// # Invariants
/// - Exactly one observation is emitted per table, carrying the index of
///   the table it describes; tables without spreadsheet overlays get a
///   `None` sheet rather than being skipped, so downstream joins never
///   shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetObservation {
    /// Index of the described table in the node's table input.
    pub table_index: u32,
    /// Detected overlay, when the table reads as a spreadsheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<SpreadsheetMeta>,
}

/// `extract.spreadsheet` node.
pub struct SpreadsheetNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl SpreadsheetNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "extract.spreadsheet",
                "ui_parse",
                &[KEY_TABLES, KEY_ELEMENT_GRAPH, KEY_LAYOUT_TOKENS],
                &[KEY_SPREADSHEETS],
                empty_config_schema(),
                object_schema(),
                &["/table_index"],
            ),
        }
    }
}

impl Default for SpreadsheetNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for SpreadsheetNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let tables: Vec<Table> = parse_input(inputs, KEY_TABLES)?;
        let graph: ElementGraph = parse_input(inputs, KEY_ELEMENT_GRAPH)?;
        let tokens: Vec<TextToken> = parse_input(inputs, KEY_LAYOUT_TOKENS)?;
        let observations: Vec<SheetObservation> = tables
            .iter()
            .enumerate()
            .map(|(index, table)| SheetObservation {
                table_index: index as u32,
                sheet: detect_spreadsheet(table, &graph, &tokens),
            })
            .collect();
        let detected =
            observations.iter().filter(|observation| observation.sheet.is_some()).count() as u64;
        Ok(PluginOutput {
            items: to_items(&observations)?,
            metrics: PluginMetrics {
                rows_in: tables.len() as u64,
                rows_out: detected,
                model_calls: 0,
            },
            diagnostics: Vec::new(),
        })
    }
}

/// Detects spreadsheet overlays for one table region.
#[must_use]
pub fn detect_spreadsheet(
    table: &Table,
    graph: &ElementGraph,
    tokens: &[TextToken],
) -> Option<SpreadsheetMeta> {
    let column_strip = detect_column_strip(table, tokens);
    let row_strip = detect_row_strip(table, tokens);
    if !column_strip && !row_strip {
        return None;
    }
    // The focused cell element provides the pixel-position reading.
    let focused = graph.elements.iter().find(|element| {
        element.element_type == ElementType::Cell
            && element.state.focused
            && table.bbox.contains(&element.bbox)
    });
    let positional_a1 = focused.and_then(|element| {
        let col = table
            .cells
            .iter()
            .filter(|cell| element.bbox.iou(&cell.bbox) > 0.0)
            .map(|cell| cell.col)
            .min()?;
        let row = table
            .cells
            .iter()
            .filter(|cell| element.bbox.iou(&cell.bbox) > 0.0)
            .map(|cell| cell.row)
            .min()?;
        Some(a1_address(col, row))
    });
    // The name box (a short A1-looking token above the grid) is the label
    // reading; a disagreement records both and flags the conflict.
    let name_box_a1 = tokens
        .iter()
        .filter(|token| token.bbox.y2() <= table.bbox.y1())
        .map(|token| token.norm_text.as_str())
        .find(|text| is_a1_address(text))
        .map(ToString::to_string);
    let address_conflict = matches!(
        (&positional_a1, &name_box_a1),
        (Some(positional), Some(named)) if positional != named
    );
    let formula_bar_text = tokens
        .iter()
        .filter(|token| token.bbox.y2() <= table.bbox.y1())
        .find(|token| token.norm_text.starts_with('='))
        .map(|token| token.norm_text.clone());
    Some(SpreadsheetMeta {
        has_column_strip: column_strip,
        has_row_strip: row_strip,
        formula_bar_text,
        active_cell_a1: name_box_a1.or(positional_a1),
        active_cell_bbox: focused.map(|element| element.bbox),
        address_conflict,
    })
}

/// Detects a column-letter strip in the table's first row.
fn detect_column_strip(table: &Table, tokens: &[TextToken]) -> bool {
    let mut letters = 0_usize;
    for token in tokens {
        if token.bbox.y2() <= table.bbox.y1() + (table.bbox.height() / 8).max(16) as i32
            && token.bbox.y1() >= table.bbox.y1()
            && is_column_letter(&token.norm_text)
        {
            letters += 1;
        }
    }
    letters >= 2
}

/// Detects a row-number strip along the table's left edge.
fn detect_row_strip(table: &Table, tokens: &[TextToken]) -> bool {
    let mut numbers = 0_usize;
    for token in tokens {
        if token.bbox.x2() <= table.bbox.x1() + (table.bbox.width() / 10).max(16) as i32
            && token.bbox.x1() >= table.bbox.x1()
            && token.norm_text.chars().all(|ch| ch.is_ascii_digit())
            && !token.norm_text.is_empty()
        {
            numbers += 1;
        }
    }
    numbers >= 2
}

/// True for a 1–2 letter uppercase column label.
fn is_column_letter(text: &str) -> bool {
    !text.is_empty() && text.len() <= 2 && text.chars().all(|ch| ch.is_ascii_uppercase())
}

/// True for an A1-style address like `B7`.
fn is_a1_address(text: &str) -> bool {
    let letters: String = text.chars().take_while(char::is_ascii_uppercase).collect();
    let digits = &text[letters.len()..];
    !letters.is_empty()
        && letters.len() <= 2
        && !digits.is_empty()
        && digits.chars().all(|ch| ch.is_ascii_digit())
}

/// Builds the A1 address for a zero-based `(col, row)` grid position.
#[must_use]
pub fn a1_address(col: u32, row: u32) -> String {
    let mut letters = String::new();
    let mut remaining = col;
    loop {
        letters.insert(0, char::from(b'A' + (remaining % 26) as u8));
        if remaining < 26 {
            break;
        }
        remaining = remaining / 26 - 1;
    }
    format!("{letters}{}", row + 1)
}
