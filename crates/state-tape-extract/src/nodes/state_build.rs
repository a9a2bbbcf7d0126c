// state-tape-extract/src/nodes/state_build.rs
// ============================================================================
// Module: State Build Node
// Description: Assembles the per-frame screen state aggregate.
// Purpose: Bind tokens, elements, and extractions into one ScreenState.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! `build.state` gathers everything extracted for the frame into a
//! [`ScreenState`], computing `state_confidence` as the weighted mean of the
//! component confidences (tokens 0.4, elements 0.2, structured extractions
//! 0.2, cursor 0.2; absent components contribute their weight at a neutral
//! 0.5).

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::Chart;
use state_tape_core::CodeBlock;
use state_tape_core::CursorTrack;
use state_tape_core::ElementGraph;
use state_tape_core::ScreenState;
use state_tape_core::StateId;
use state_tape_core::Table;
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
use crate::nodes::parse_optional_input;
use crate::nodes::to_items;
use crate::wire::KEY_CHARTS;
use crate::wire::KEY_CODE_BLOCKS;
use crate::wire::KEY_CURSOR;
use crate::wire::KEY_ELEMENT_GRAPH;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_LAYOUT_TOKENS;
use crate::wire::KEY_SCREEN_STATE;
use crate::wire::KEY_TABLES;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: State Build Node
// ============================================================================

/// `build.state` node.
pub struct StateBuildNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl StateBuildNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "build.state",
                "state_build",
                &[
                    KEY_FRAME_NORMALIZED,
                    KEY_ELEMENT_GRAPH,
                    KEY_LAYOUT_TOKENS,
                    KEY_TABLES,
                    KEY_CODE_BLOCKS,
                    KEY_CHARTS,
                    KEY_CURSOR,
                ],
                &[KEY_SCREEN_STATE],
                empty_config_schema(),
                object_schema(),
                &["/state_id"],
            ),
        }
    }
}

impl Default for StateBuildNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for StateBuildNode {
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
        let tables: Vec<Table> = parse_input(inputs, KEY_TABLES)?;
        let code_blocks: Vec<CodeBlock> = parse_input(inputs, KEY_CODE_BLOCKS)?;
        let charts: Vec<Chart> = parse_input(inputs, KEY_CHARTS)?;
        let cursor: Option<CursorTrack> =
            parse_optional_input::<Vec<CursorTrack>>(inputs, KEY_CURSOR)?
                .and_then(|tracks| tracks.into_iter().next());
        let state = build_screen_state(&frame, graph, tokens, tables, code_blocks, charts, cursor);
        Ok(PluginOutput {
            items: to_items(std::slice::from_ref(&state))?,
            metrics: PluginMetrics {
                rows_in: 1,
                rows_out: state.elements.len() as u64,
                model_calls: 0,
            },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Assembles the screen state aggregate for one frame.
#[must_use]
pub fn build_screen_state(
    frame: &NormalizedFrame,
    graph: ElementGraph,
    tokens: Vec<TextToken>,
    tables: Vec<Table>,
    code_blocks: Vec<CodeBlock>,
    charts: Vec<Chart>,
    cursor: Option<CursorTrack>,
) -> ScreenState {
    let mut visible_apps: Vec<String> =
        graph.elements.iter().filter_map(|element| element.app_hint.clone()).collect();
    visible_apps.sort();
    visible_apps.dedup();
    let focus_element_id = graph
        .elements
        .iter()
        .find(|element| element.state.focused)
        .map(|element| element.element_id.clone());
    let token_confidence = mean_confidence(tokens.iter().map(|token| token.confidence));
    let element_confidence = if graph.elements.is_empty() { None } else { Some(0.9) };
    let structured_confidence = mean_confidence(
        tables
            .iter()
            .flat_map(|table| table.cells.iter().map(|cell| cell.confidence))
            .chain(code_blocks.iter().map(|_| 0.8))
            .chain(charts.iter().map(|_| 0.8)),
    );
    let cursor_confidence = cursor.as_ref().map(|track| track.confidence);
    let state_confidence = weighted_confidence(&[
        (0.4, token_confidence),
        (0.2, element_confidence),
        (0.2, structured_confidence),
        (0.2, cursor_confidence),
    ]);
    ScreenState {
        state_id: StateId::new(format!("state-{}", frame.frame_id)),
        frame_ids: vec![frame.frame_id.clone()],
        elements: graph.elements,
        text_tokens: tokens,
        tables,
        code_blocks,
        charts,
        cursor,
        focus_element_id,
        visible_apps,
        state_confidence,
    }
}

/// Mean of an iterator of confidences, `None` when empty.
fn mean_confidence(values: impl Iterator<Item = f32>) -> Option<f32> {
    let mut sum = 0.0_f64;
    let mut count = 0.0_f64;
    for value in values {
        sum += f64::from(value);
        count += 1.0;
    }
    if count > 0.0 { Some((sum / count) as f32) } else { None }
}

/// Weighted mean with absent components contributing a neutral 0.5.
fn weighted_confidence(parts: &[(f32, Option<f32>)]) -> f32 {
    let mut sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;
    for (weight, value) in parts {
        sum += f64::from(*weight) * f64::from(value.unwrap_or(0.5));
        weight_sum += f64::from(*weight);
    }
    if weight_sum <= 0.0 {
        return 0.0;
    }
    quantize_f32((sum / weight_sum) as f32)
}
