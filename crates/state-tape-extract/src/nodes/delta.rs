// state-tape-extract/src/nodes/delta.rs
// ============================================================================
// Module: Delta Build Node
// Description: Structured diffs between consecutive screen states.
// Purpose: Emit element, table-cell, and code-line changes in stable order.
// Dependencies: state-tape-core, state-tape-plugins, similar
// ============================================================================

//! ## Overview
//! `build.delta` diffs the matched current state against the previous one:
//! elements by identifier (add/remove/change), tables by `(row, col) →
//! norm_text`, and code blocks line-by-line with a Myers diff. The change
//! list sorts by `(kind, target_id)` so delta artifacts hash stably.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use similar::ChangeTag;
use similar::TextDiff;
use state_tape_core::DeltaChange;
use state_tape_core::DeltaEvent;
use state_tape_core::DeltaKind;
use state_tape_core::ScreenState;
use state_tape_core::UIElement;
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
use crate::wire::KEY_DELTA;
use crate::wire::KEY_MATCHED_STATE;
use crate::wire::KEY_PREVIOUS_STATE;

// ============================================================================
// SECTION: Delta Node
// ============================================================================

/// `build.delta` node.
pub struct DeltaNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl DeltaNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "build.delta",
                "state_build",
                &[KEY_MATCHED_STATE, KEY_PREVIOUS_STATE],
                &[KEY_DELTA],
                empty_config_schema(),
                object_schema(),
                &["/from_state_id", "/to_state_id"],
            ),
        }
    }
}

impl Default for DeltaNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for DeltaNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let current: ScreenState = parse_input(inputs, KEY_MATCHED_STATE)?;
        let previous: Option<ScreenState> = parse_optional_input(inputs, KEY_PREVIOUS_STATE)?;
        let deltas = match previous {
            Some(previous) => vec![build_delta(&previous, &current)],
            None => Vec::new(),
        };
        Ok(PluginOutput {
            items: to_items(&deltas)?,
            metrics: PluginMetrics {
                rows_in: 1,
                rows_out: deltas.first().map_or(0, |delta| delta.changes.len() as u64),
                model_calls: 0,
            },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Diffing
// ============================================================================

/// Builds the structured delta between two states.
#[must_use]
pub fn build_delta(previous: &ScreenState, current: &ScreenState) -> DeltaEvent {
    let mut changes = Vec::new();
    diff_elements(previous, current, &mut changes);
    diff_tables(previous, current, &mut changes);
    diff_code(previous, current, &mut changes);
    let mut event = DeltaEvent {
        from_state_id: previous.state_id.clone(),
        to_state_id: current.state_id.clone(),
        changes,
    };
    event.normalize();
    event
}

/// Short stable description of an element for change payloads.
fn describe_element(element: &UIElement) -> String {
    format!("{:?}@{:?}", element.element_type, <[i32; 4]>::from(element.bbox))
}

/// Diffs elements by identifier.
fn diff_elements(previous: &ScreenState, current: &ScreenState, out: &mut Vec<DeltaChange>) {
    let previous_by_id: BTreeMap<&str, &UIElement> = previous
        .elements
        .iter()
        .map(|element| (element.element_id.as_str(), element))
        .collect();
    let current_by_id: BTreeMap<&str, &UIElement> = current
        .elements
        .iter()
        .map(|element| (element.element_id.as_str(), element))
        .collect();
    for (id, element) in &current_by_id {
        match previous_by_id.get(id) {
            None => out.push(DeltaChange {
                kind: DeltaKind::Added,
                target_id: (*id).to_string(),
                domain: "element".to_string(),
                before: None,
                after: Some(describe_element(element)),
            }),
            Some(previous_element) => {
                let moved = previous_element.bbox != element.bbox;
                let state_changed = previous_element.state != element.state;
                let text_changed = previous_element.text_refs != element.text_refs;
                if moved || state_changed || text_changed {
                    out.push(DeltaChange {
                        kind: DeltaKind::Changed,
                        target_id: (*id).to_string(),
                        domain: "element".to_string(),
                        before: Some(describe_element(previous_element)),
                        after: Some(describe_element(element)),
                    });
                }
            }
        }
    }
    for (id, element) in &previous_by_id {
        if !current_by_id.contains_key(id) {
            out.push(DeltaChange {
                kind: DeltaKind::Removed,
                target_id: (*id).to_string(),
                domain: "element".to_string(),
                before: Some(describe_element(element)),
                after: None,
            });
        }
    }
}

/// Diffs tables by `(row, col) → norm_text` over aligned table order.
fn diff_tables(previous: &ScreenState, current: &ScreenState, out: &mut Vec<DeltaChange>) {
    for (table_index, (previous_table, current_table)) in
        previous.tables.iter().zip(current.tables.iter()).enumerate()
    {
        let previous_cells: BTreeMap<(u32, u32), &str> = previous_table
            .cells
            .iter()
            .map(|cell| ((cell.row, cell.col), cell.norm_text.as_str()))
            .collect();
        let current_cells: BTreeMap<(u32, u32), &str> = current_table
            .cells
            .iter()
            .map(|cell| ((cell.row, cell.col), cell.norm_text.as_str()))
            .collect();
        for (address, text) in &current_cells {
            let target_id = format!("t{table_index}:r{}c{}", address.0, address.1);
            match previous_cells.get(address) {
                None => out.push(DeltaChange {
                    kind: DeltaKind::Added,
                    target_id,
                    domain: "cell".to_string(),
                    before: None,
                    after: Some((*text).to_string()),
                }),
                Some(previous_text) if previous_text != text => out.push(DeltaChange {
                    kind: DeltaKind::Changed,
                    target_id,
                    domain: "cell".to_string(),
                    before: Some((*previous_text).to_string()),
                    after: Some((*text).to_string()),
                }),
                Some(_) => {}
            }
        }
        for (address, text) in &previous_cells {
            if !current_cells.contains_key(address) {
                out.push(DeltaChange {
                    kind: DeltaKind::Removed,
                    target_id: format!("t{table_index}:r{}c{}", address.0, address.1),
                    domain: "cell".to_string(),
                    before: Some((*text).to_string()),
                    after: None,
                });
            }
        }
    }
}

/// Diffs code blocks line-by-line with a Myers diff.
fn diff_code(previous: &ScreenState, current: &ScreenState, out: &mut Vec<DeltaChange>) {
    for (block_index, (previous_block, current_block)) in
        previous.code_blocks.iter().zip(current.code_blocks.iter()).enumerate()
    {
        let previous_text = previous_block.text();
        let current_text = current_block.text();
        if previous_text == current_text {
            continue;
        }
        let diff = TextDiff::from_lines(&previous_text, &current_text);
        for (change_index, change) in diff.iter_all_changes().enumerate() {
            let target_id = format!("c{block_index}:l{change_index:04}");
            match change.tag() {
                ChangeTag::Insert => out.push(DeltaChange {
                    kind: DeltaKind::Added,
                    target_id,
                    domain: "code".to_string(),
                    before: None,
                    after: Some(change.value().trim_end().to_string()),
                }),
                ChangeTag::Delete => out.push(DeltaChange {
                    kind: DeltaKind::Removed,
                    target_id,
                    domain: "code".to_string(),
                    before: Some(change.value().trim_end().to_string()),
                    after: None,
                }),
                ChangeTag::Equal => {}
            }
        }
    }
}
