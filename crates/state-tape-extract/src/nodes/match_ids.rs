// state-tape-extract/src/nodes/match_ids.rs
// ============================================================================
// Module: Identifier Matching Node
// Description: Cross-frame element identity via Hungarian assignment.
// Purpose: Preserve element ids across frames when elements persist.
// Dependencies: state-tape-core, state-tape-plugins, crate::assign
// ============================================================================

//! ## Overview
//! Each element gets a signature `(type, normalized bbox, text hash, parent
//! signature)`. The cost between a previous and current element is
//! `1 − IoU + 0.5·type_mismatch + 0.3·text_distance + 0.2·parent_mismatch`;
//! the Hungarian solver produces the globally optimal assignment and matches
//! with cost ≤ 0.7 keep the previous `element_id`. Unmatched elements mint a
//! fresh id derived from their signature.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::ElementId;
use state_tape_core::ScreenState;
use state_tape_core::UIElement;
use state_tape_core::hash_bytes;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginMetrics;
use state_tape_plugins::PluginOutput;
use state_tape_plugins::TapePlugin;

use crate::assign::solve_assignment;
use crate::nodes::empty_config_schema;
use crate::nodes::node_descriptor;
use crate::nodes::object_schema;
use crate::nodes::parse_input;
use crate::nodes::parse_optional_input;
use crate::nodes::to_items;
use crate::wire::KEY_MATCHED_STATE;
use crate::wire::KEY_PREVIOUS_STATE;
use crate::wire::KEY_SCREEN_STATE;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum assignment cost accepted as a match.
const MATCH_COST_CEILING: f64 = 0.7;

// ============================================================================
// SECTION: Match Node
// ============================================================================

/// `match.ids` node.
pub struct MatchIdsNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl MatchIdsNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "match.ids",
                "state_build",
                &[KEY_SCREEN_STATE, KEY_PREVIOUS_STATE],
                &[KEY_MATCHED_STATE],
                empty_config_schema(),
                object_schema(),
                &["/state_id"],
            ),
        }
    }
}

impl Default for MatchIdsNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for MatchIdsNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let mut state: ScreenState = parse_input(inputs, KEY_SCREEN_STATE)?;
        let previous: Option<ScreenState> = parse_optional_input(inputs, KEY_PREVIOUS_STATE)?;
        let rows_in = state.elements.len() as u64;
        match previous {
            Some(previous) => match_elements(&mut state, &previous),
            None => mint_fresh_ids(&mut state),
        }
        Ok(PluginOutput {
            items: to_items(std::slice::from_ref(&state))?,
            metrics: PluginMetrics {
                rows_in,
                rows_out: state.elements.len() as u64,
                model_calls: 0,
            },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Signatures and Costs
// ============================================================================

/// Stable signature for one element.
fn element_signature(element: &UIElement, parents: &BTreeMap<&str, &UIElement>) -> String {
    let text_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, element.text_refs.join("|").as_bytes());
    let parent_part = element
        .parent_id
        .as_ref()
        .and_then(|parent| parents.get(parent.as_str()))
        .map_or_else(String::new, |parent| {
            format!("{:?}:{:?}", parent.element_type, <[i32; 4]>::from(parent.bbox))
        });
    format!(
        "{:?}|{:?}|{}|{}",
        element.element_type,
        <[i32; 4]>::from(element.bbox),
        text_hash.prefix(12),
        parent_part
    )
}

/// Pairwise match cost between a previous and a current element.
fn match_cost(previous: &UIElement, current: &UIElement) -> f64 {
    let iou = previous.bbox.iou(&current.bbox);
    let type_mismatch = f64::from(previous.element_type != current.element_type);
    let text_distance = text_distance(&previous.text_refs, &current.text_refs);
    let parent_mismatch = f64::from(previous.parent_id != current.parent_id);
    (1.0 - iou) + 0.5 * type_mismatch + 0.3 * text_distance + 0.2 * parent_mismatch
}

/// Jaccard distance over attached token references.
fn text_distance(previous: &[String], current: &[String]) -> f64 {
    if previous.is_empty() && current.is_empty() {
        return 0.0;
    }
    let previous_set: std::collections::BTreeSet<&String> = previous.iter().collect();
    let current_set: std::collections::BTreeSet<&String> = current.iter().collect();
    let intersection = previous_set.intersection(&current_set).count() as f64;
    let union = previous_set.union(&current_set).count() as f64;
    if union <= 0.0 { 0.0 } else { 1.0 - intersection / union }
}

// ============================================================================
// SECTION: Matching
// ============================================================================

/// Matches current elements to previous ones, preserving matched ids.
pub fn match_elements(state: &mut ScreenState, previous: &ScreenState) {
    let rows = previous.elements.len();
    let cols = state.elements.len();
    if rows == 0 || cols == 0 {
        mint_fresh_ids(state);
        return;
    }
    let mut costs = vec![0.0_f64; rows * cols];
    for (row, prev_element) in previous.elements.iter().enumerate() {
        for (col, cur_element) in state.elements.iter().enumerate() {
            costs[row * cols + col] = match_cost(prev_element, cur_element);
        }
    }
    let assignment = solve_assignment(&costs, rows, cols);
    let mut assigned_ids: Vec<Option<ElementId>> = vec![None; cols];
    for (row, maybe_col) in assignment.iter().enumerate() {
        if let Some(col) = maybe_col {
            if costs[row * cols + col] <= MATCH_COST_CEILING {
                assigned_ids[*col] = Some(previous.elements[row].element_id.clone());
            }
        }
    }
    let parents: BTreeMap<&str, &UIElement> = state
        .elements
        .iter()
        .map(|element| (element.element_id.as_str(), element))
        .collect();
    let fresh: Vec<Option<ElementId>> = state
        .elements
        .iter()
        .enumerate()
        .map(|(col, element)| {
            if assigned_ids[col].is_some() {
                None
            } else {
                Some(mint_id(element, &parents))
            }
        })
        .collect();
    let renames: BTreeMap<String, ElementId> = state
        .elements
        .iter()
        .enumerate()
        .map(|(col, element)| {
            let new_id = assigned_ids[col]
                .clone()
                .or_else(|| fresh[col].clone())
                .unwrap_or_else(|| element.element_id.clone());
            (element.element_id.as_str().to_string(), new_id)
        })
        .collect();
    apply_renames(state, &renames);
}

/// Mints signature-derived ids when no previous state exists.
pub fn mint_fresh_ids(state: &mut ScreenState) {
    let parents: BTreeMap<&str, &UIElement> = state
        .elements
        .iter()
        .map(|element| (element.element_id.as_str(), element))
        .collect();
    let renames: BTreeMap<String, ElementId> = state
        .elements
        .iter()
        .map(|element| {
            (element.element_id.as_str().to_string(), mint_id(element, &parents))
        })
        .collect();
    apply_renames(state, &renames);
}

/// Mints a deterministic id from the element signature.
fn mint_id(element: &UIElement, parents: &BTreeMap<&str, &UIElement>) -> ElementId {
    let signature = element_signature(element, parents);
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, signature.as_bytes());
    ElementId::new(format!("el-{}", digest.prefix(16)))
}

/// Applies an id rename map across elements and linkage fields.
fn apply_renames(state: &mut ScreenState, renames: &BTreeMap<String, ElementId>) {
    for element in &mut state.elements {
        if let Some(new_id) = renames.get(element.element_id.as_str()) {
            element.element_id = new_id.clone();
        }
        if let Some(parent) = &element.parent_id {
            if let Some(new_id) = renames.get(parent.as_str()) {
                element.parent_id = Some(new_id.clone());
            }
        }
        for child in &mut element.children_ids {
            if let Some(new_id) = renames.get(child.as_str()) {
                *child = new_id.clone();
            }
        }
    }
    if let Some(focus) = &state.focus_element_id {
        if let Some(new_id) = renames.get(focus.as_str()) {
            state.focus_element_id = Some(new_id.clone());
        }
    }
}
