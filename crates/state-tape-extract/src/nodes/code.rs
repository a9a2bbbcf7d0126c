// state-tape-extract/src/nodes/code.rs
// ============================================================================
// Module: Code Extraction Node
// Description: Monospace-region line reconstruction with caret/selection.
// Purpose: Rebuild code text preserving indentation from token geometry.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! Code regions are blocks whose tokens are predominantly monospace-likely
//! or keyword-dense. Lines rebuild in reading order with indentation derived
//! from the median character width: leading pixels convert to spaces. The
//! caret heuristic looks for a thin bright vertical line inside the region;
//! the selection heuristic looks for rows with a uniform non-background
//! highlight.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use state_tape_core::BBox;
use state_tape_core::CaretObservation;
use state_tape_core::CodeBlock;
use state_tape_core::CodeLine;
use state_tape_core::SelectionObservation;
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
use crate::wire::KEY_CODE_BLOCKS;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_LAYOUT_TOKENS;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fraction of monospace tokens a block needs to qualify as code.
const MONOSPACE_BLOCK_RATIO: f64 = 0.6;
/// Language keywords used for the keyword-density fallback.
const CODE_KEYWORDS: [&str; 12] = [
    "fn", "let", "const", "impl", "return", "if", "else", "for", "while", "def", "class", "import",
];
/// Keyword density needed for the fallback path.
const KEYWORD_DENSITY: f64 = 0.15;
/// Maximum caret width in pixels.
const CARET_MAX_WIDTH: i64 = 2;
/// Luminance delta marking a caret column.
const CARET_CONTRAST: f64 = 60.0;

// ============================================================================
// SECTION: Code Node
// ============================================================================

/// `extract.code` node.
pub struct CodeNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl CodeNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "extract.code",
                "ui_parse",
                &[KEY_FRAME_NORMALIZED, KEY_LAYOUT_TOKENS],
                &[KEY_CODE_BLOCKS],
                empty_config_schema(),
                object_schema(),
                &["/bbox/1", "/bbox/0"],
            ),
        }
    }
}

impl Default for CodeNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for CodeNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let tokens: Vec<TextToken> = parse_input(inputs, KEY_LAYOUT_TOKENS)?;
        let rows_in = tokens.len() as u64;
        let blocks = extract_code_blocks(&frame, &tokens);
        Ok(PluginOutput {
            items: to_items(&blocks)?,
            metrics: PluginMetrics { rows_in, rows_out: blocks.len() as u64, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Extracts code blocks from monospace-dense or keyword-dense blocks.
#[must_use]
pub fn extract_code_blocks(frame: &NormalizedFrame, tokens: &[TextToken]) -> Vec<CodeBlock> {
    let mut by_block: BTreeMap<&str, Vec<&TextToken>> = BTreeMap::new();
    for token in tokens {
        if let Some(block_id) = token.block_id.as_deref() {
            by_block.entry(block_id).or_default().push(token);
        }
    }
    let gray = frame.gray().ok();
    let mut blocks = Vec::new();
    for members in by_block.values() {
        if !qualifies_as_code(members) {
            continue;
        }
        if let Some(block) = rebuild_block(frame, members, gray.as_deref()) {
            blocks.push(block);
        }
    }
    blocks.sort_by_key(|block| (block.bbox.y1(), block.bbox.x1()));
    blocks
}

/// True when the block is monospace-dense or keyword-dense.
fn qualifies_as_code(members: &[&TextToken]) -> bool {
    if members.is_empty() {
        return false;
    }
    let monospace = members.iter().filter(|token| token.flags.monospace_likely).count();
    if monospace as f64 / members.len() as f64 >= MONOSPACE_BLOCK_RATIO {
        return true;
    }
    let keywords = members
        .iter()
        .filter(|token| CODE_KEYWORDS.contains(&token.norm_text.as_str()))
        .count();
    keywords as f64 / members.len() as f64 >= KEYWORD_DENSITY
}

/// Rebuilds one code block with indentation, caret, and selection.
fn rebuild_block(
    frame: &NormalizedFrame,
    members: &[&TextToken],
    gray: Option<&[u8]>,
) -> Option<CodeBlock> {
    let mut x1 = i32::MAX;
    let mut y1 = i32::MAX;
    let mut x2 = i32::MIN;
    let mut y2 = i32::MIN;
    for token in members {
        x1 = x1.min(token.bbox.x1());
        y1 = y1.min(token.bbox.y1());
        x2 = x2.max(token.bbox.x2());
        y2 = y2.max(token.bbox.y2());
    }
    let region = BBox::new(x1, y1, x2, y2).ok()?;
    let median_char_width = median_char_width(members);
    let mut by_line: BTreeMap<&str, Vec<&TextToken>> = BTreeMap::new();
    for token in members {
        if let Some(line_id) = token.line_id.as_deref() {
            by_line.entry(line_id).or_default().push(*token);
        }
    }
    let mut lines: Vec<CodeLine> = Vec::new();
    let mut ordered: Vec<Vec<&TextToken>> = by_line.into_values().collect();
    ordered.sort_by_key(|line| line.iter().map(|token| token.bbox.y1()).min().unwrap_or(0));
    for (index, mut line_tokens) in ordered.into_iter().enumerate() {
        line_tokens.sort_by_key(|token| token.bbox.x1());
        let first = line_tokens.first()?;
        let indent_px = i64::from(first.bbox.x1() - region.x1()).max(0);
        let indent_chars = if median_char_width > 0.0 {
            (indent_px as f64 / median_char_width).round() as usize
        } else {
            0
        };
        let mut text = " ".repeat(indent_chars);
        let mut previous_end: Option<i32> = None;
        let mut line_y1 = i32::MAX;
        let mut line_y2 = i32::MIN;
        let mut line_x2 = i32::MIN;
        for token in &line_tokens {
            if let Some(end) = previous_end {
                let gap_px = i64::from(token.bbox.x1() - end).max(0);
                let gap_chars = if median_char_width > 0.0 {
                    (gap_px as f64 / median_char_width).round().max(1.0) as usize
                } else {
                    1
                };
                text.push_str(&" ".repeat(gap_chars));
            }
            text.push_str(&token.norm_text);
            previous_end = Some(token.bbox.x2());
            line_y1 = line_y1.min(token.bbox.y1());
            line_y2 = line_y2.max(token.bbox.y2());
            line_x2 = line_x2.max(token.bbox.x2());
        }
        let bbox = BBox::new(region.x1(), line_y1, line_x2.max(region.x1() + 1), line_y2).ok()?;
        lines.push(CodeLine { index: index as u32, text, bbox });
    }
    if lines.is_empty() {
        return None;
    }
    let caret = gray.and_then(|plane| detect_caret(frame, plane, &region, &lines));
    let selection = gray.and_then(|plane| detect_selection(frame, plane, &region, &lines));
    Some(CodeBlock {
        frame_id: frame.frame_id.clone(),
        bbox: region,
        lines,
        median_char_width: quantize_f32(median_char_width as f32),
        caret,
        selection,
    })
}

/// Median per-character width over the block's tokens.
fn median_char_width(members: &[&TextToken]) -> f64 {
    let mut widths: Vec<f64> = members
        .iter()
        .filter(|token| !token.norm_text.is_empty())
        .map(|token| {
            f64::from(token.bbox.x2() - token.bbox.x1())
                / token.norm_text.chars().count().max(1) as f64
        })
        .collect();
    if widths.is_empty() {
        return 0.0;
    }
    widths.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    widths[widths.len() / 2]
}

/// Detects a thin bright vertical line (the caret) inside the region.
fn detect_caret(
    frame: &NormalizedFrame,
    gray: &[u8],
    region: &BBox,
    lines: &[CodeLine],
) -> Option<CaretObservation> {
    let width = frame.width as i64;
    for line in lines {
        let y_span = (line.bbox.y1().max(region.y1()), line.bbox.y2().min(region.y2()));
        if y_span.1 <= y_span.0 {
            continue;
        }
        for x in region.x1().max(0)..region.x2().min(frame.width as i32) {
            let mut column_sum = 0.0_f64;
            let mut neighbor_sum = 0.0_f64;
            let mut count = 0.0_f64;
            for y in y_span.0.max(0)..y_span.1 {
                let index = i64::from(y) * width + i64::from(x);
                let left = index - CARET_MAX_WIDTH - 1;
                if left < 0 {
                    continue;
                }
                let (Some(center), Some(neighbor)) =
                    (gray.get(index as usize), gray.get(left as usize))
                else {
                    continue;
                };
                column_sum += f64::from(*center);
                neighbor_sum += f64::from(*neighbor);
                count += 1.0;
            }
            if count > 0.0 && (column_sum - neighbor_sum).abs() / count >= CARET_CONTRAST {
                let bbox = BBox::new(x, y_span.0, x + CARET_MAX_WIDTH as i32, y_span.1).ok()?;
                return Some(CaretObservation { bbox, line_index: line.index });
            }
        }
    }
    None
}

/// Detects a uniform highlight band (the selection) across lines.
fn detect_selection(
    frame: &NormalizedFrame,
    gray: &[u8],
    region: &BBox,
    lines: &[CodeLine],
) -> Option<SelectionObservation> {
    let width = frame.width as i64;
    let mut highlighted: Vec<u32> = Vec::new();
    let background = region_background(gray, width, region)?;
    for line in lines {
        let mut sum = 0.0_f64;
        let mut count = 0.0_f64;
        for y in line.bbox.y1().max(0)..line.bbox.y2().min(frame.height as i32) {
            for x in region.x1().max(0)..region.x2().min(frame.width as i32) {
                if let Some(value) = gray.get((i64::from(y) * width + i64::from(x)) as usize) {
                    sum += f64::from(*value);
                    count += 1.0;
                }
            }
        }
        if count > 0.0 && (sum / count - background).abs() >= 20.0 {
            highlighted.push(line.index);
        }
    }
    let (first, last) = (highlighted.first()?, highlighted.last()?);
    let line_start = *first;
    let line_end = *last;
    let top = lines.iter().find(|line| line.index == line_start)?.bbox.y1();
    let bottom = lines.iter().find(|line| line.index == line_end)?.bbox.y2();
    let bbox = BBox::new(region.x1(), top, region.x2(), bottom).ok()?;
    Some(SelectionObservation { bbox, line_start, line_end })
}

/// Mean luminance of the region's top rows, used as the background estimate.
fn region_background(gray: &[u8], width: i64, region: &BBox) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut count = 0.0_f64;
    for y in region.y1().max(0)..(region.y1() + 2).max(1) {
        for x in region.x1().max(0)..region.x2() {
            if let Some(value) = gray.get((i64::from(y) * width + i64::from(x)) as usize) {
                sum += f64::from(*value);
                count += 1.0;
            }
        }
    }
    if count > 0.0 { Some(sum / count) } else { None }
}
