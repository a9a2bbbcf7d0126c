// state-tape-extract/src/nodes/layout.rs
// ============================================================================
// Module: Layout Assembly Node
// Description: Groups tokens into lines and lines into blocks.
// Purpose: Give downstream extractors a reading-order text structure.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! Tokens group into lines when their vertical overlap ratio meets the
//! threshold; lines group into blocks by vertical proximity and left
//! alignment. The node republishes the tokens with `line_id` and `block_id`
//! assigned, plus the monospace heuristic flag computed per line.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;
use state_tape_core::TextToken;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginMetrics;
use state_tape_plugins::PluginOutput;
use state_tape_plugins::TapePlugin;

use crate::nodes::node_descriptor;
use crate::nodes::object_schema;
use crate::nodes::parse_input;
use crate::nodes::to_items;
use crate::wire::KEY_LAYOUT_TOKENS;
use crate::wire::KEY_TEXT_TOKENS;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum vertical-overlap ratio for two tokens to share a line.
const LINE_OVERLAP_RATIO: f64 = 0.5;
/// Maximum vertical gap (in median line heights) for lines to share a block.
const BLOCK_GAP_FACTOR: f64 = 1.8;
/// Maximum left-edge drift in pixels for lines to share a block.
const BLOCK_LEFT_DRIFT_PX: i64 = 24;
/// Coefficient-of-variation ceiling for the monospace heuristic.
const MONOSPACE_CV_CEILING: f64 = 0.12;

// ============================================================================
// SECTION: Layout Node
// ============================================================================

/// `layout.assemble` node.
pub struct LayoutNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl LayoutNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "layout.assemble",
                "preprocess",
                &[KEY_TEXT_TOKENS],
                &[KEY_LAYOUT_TOKENS],
                json!({ "type": "object", "additionalProperties": false }),
                object_schema(),
                &["/bbox/1", "/bbox/0", "/norm_text"],
            ),
        }
    }
}

impl Default for LayoutNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for LayoutNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let tokens: Vec<TextToken> = parse_input(inputs, KEY_TEXT_TOKENS)?;
        let rows_in = tokens.len() as u64;
        let tokens = assemble_layout(tokens);
        Ok(PluginOutput {
            items: to_items(&tokens)?,
            metrics: PluginMetrics { rows_in, rows_out: tokens.len() as u64, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Groups tokens into lines and blocks, assigning identifiers in reading
/// order.
#[must_use]
pub fn assemble_layout(mut tokens: Vec<TextToken>) -> Vec<TextToken> {
    if tokens.is_empty() {
        return tokens;
    }
    tokens.sort_by_key(|token| (token.bbox.y1(), token.bbox.x1()));
    // Line grouping by vertical overlap against the line's running bounds.
    let mut line_of_token: Vec<usize> = vec![0; tokens.len()];
    let mut line_bounds: Vec<(i32, i32)> = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let mut assigned = None;
        for (line_index, (top, bottom)) in line_bounds.iter().enumerate() {
            let overlap =
                (token.bbox.y2().min(*bottom) - token.bbox.y1().max(*top)).max(0) as f64;
            let height = f64::from(token.bbox.y2() - token.bbox.y1()).max(1.0);
            if overlap / height >= LINE_OVERLAP_RATIO {
                assigned = Some(line_index);
                break;
            }
        }
        let line_index = assigned.unwrap_or_else(|| {
            line_bounds.push((token.bbox.y1(), token.bbox.y2()));
            line_bounds.len() - 1
        });
        let bounds = &mut line_bounds[line_index];
        bounds.0 = bounds.0.min(token.bbox.y1());
        bounds.1 = bounds.1.max(token.bbox.y2());
        line_of_token[index] = line_index;
    }
    // Per-line geometry for block grouping.
    let line_count = line_bounds.len();
    let mut line_left = vec![i32::MAX; line_count];
    for (index, token) in tokens.iter().enumerate() {
        let line = line_of_token[index];
        line_left[line] = line_left[line].min(token.bbox.x1());
    }
    let median_height = median_line_height(&line_bounds);
    let mut block_of_line = vec![0_usize; line_count];
    let mut next_block = 0_usize;
    let mut order: Vec<usize> = (0..line_count).collect();
    order.sort_by_key(|&line| line_bounds[line].0);
    let mut previous: Option<usize> = None;
    for line in order {
        match previous {
            Some(prev) => {
                let gap = i64::from(line_bounds[line].0) - i64::from(line_bounds[prev].1);
                let drift = i64::from(line_left[line]) - i64::from(line_left[prev]);
                if gap as f64 <= median_height * BLOCK_GAP_FACTOR
                    && drift.abs() <= BLOCK_LEFT_DRIFT_PX
                {
                    block_of_line[line] = block_of_line[prev];
                } else {
                    next_block += 1;
                    block_of_line[line] = next_block;
                }
            }
            None => block_of_line[line] = 0,
        }
        previous = Some(line);
    }
    // Monospace heuristic per line: low variance of per-character widths.
    let mut monospace_line = vec![false; line_count];
    for line in 0..line_count {
        let widths: Vec<f64> = tokens
            .iter()
            .enumerate()
            .filter(|(index, _)| line_of_token[*index] == line)
            .filter(|(_, token)| !token.norm_text.is_empty())
            .map(|(_, token)| {
                f64::from(token.bbox.x2() - token.bbox.x1())
                    / token.norm_text.chars().count().max(1) as f64
            })
            .collect();
        if widths.len() >= 2 {
            let mean = widths.iter().sum::<f64>() / widths.len() as f64;
            let variance = widths.iter().map(|w| (w - mean).powi(2)).sum::<f64>()
                / widths.len() as f64;
            if mean > 0.0 && variance.sqrt() / mean <= MONOSPACE_CV_CEILING {
                monospace_line[line] = true;
            }
        }
    }
    for (index, token) in tokens.iter_mut().enumerate() {
        let line = line_of_token[index];
        token.line_id = Some(format!("line-{line:04}"));
        token.block_id = Some(format!("block-{:04}", block_of_line[line]));
        token.flags.monospace_likely = monospace_line[line];
    }
    tokens
}

/// Median line height in pixels, floored at one.
fn median_line_height(line_bounds: &[(i32, i32)]) -> f64 {
    let mut heights: Vec<i64> = line_bounds
        .iter()
        .map(|(top, bottom)| i64::from(*bottom) - i64::from(*top))
        .collect();
    if heights.is_empty() {
        return 1.0;
    }
    heights.sort_unstable();
    (heights[heights.len() / 2].max(1)) as f64
}
