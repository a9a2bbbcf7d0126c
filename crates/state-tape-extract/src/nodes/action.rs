// state-tape-extract/src/nodes/action.rs
// ============================================================================
// Module: Action Inference Node
// Description: Scores action hypotheses from cursor, focus, and deltas.
// Purpose: Attribute the user action that explains a state transition.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! `infer.action` scores the candidate kinds (click, double click, right
//! click, type, scroll, drag, key shortcut) from cursor–element overlap,
//! focus changes, text insertion, content translation, and scrollbar motion.
//! A `primary` hypothesis is always emitted (possibly `unknown`); when its
//! confidence falls below 0.5 at least one alternative accompanies it.
//! Impact classifies from the delta composition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::ActionEvent;
use state_tape_core::ActionHypothesis;
use state_tape_core::ActionImpact;
use state_tape_core::ActionKind;
use state_tape_core::DeltaEvent;
use state_tape_core::DeltaKind;
use state_tape_core::ElementType;
use state_tape_core::ScreenState;
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
use crate::wire::KEY_ACTION;
use crate::wire::KEY_DELTA;
use crate::wire::KEY_MATCHED_STATE;
use crate::wire::KEY_PREVIOUS_STATE;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Primary confidence below which alternatives must be emitted.
const ALTERNATIVE_FLOOR: f32 = 0.5;

// ============================================================================
// SECTION: Action Node
// ============================================================================

/// `infer.action` node.
pub struct ActionNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl ActionNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "infer.action",
                "state_build",
                &[KEY_DELTA, KEY_MATCHED_STATE, KEY_PREVIOUS_STATE],
                &[KEY_ACTION],
                empty_config_schema(),
                object_schema(),
                &["/from_state_id", "/to_state_id"],
            ),
        }
    }
}

impl Default for ActionNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for ActionNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let deltas: Vec<DeltaEvent> = parse_input(inputs, KEY_DELTA)?;
        let current: ScreenState = parse_input(inputs, KEY_MATCHED_STATE)?;
        let previous: Option<ScreenState> = parse_optional_input(inputs, KEY_PREVIOUS_STATE)?;
        let actions = match (deltas.first(), previous) {
            (Some(delta), Some(previous)) => {
                vec![infer_action(delta, &previous, &current)]
            }
            _ => Vec::new(),
        };
        Ok(PluginOutput {
            items: to_items(&actions)?,
            metrics: PluginMetrics {
                rows_in: deltas.len() as u64,
                rows_out: actions.len() as u64,
                model_calls: 0,
            },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Inference
// ============================================================================

/// Scores the candidate kinds and assembles the action event.
#[must_use]
pub fn infer_action(
    delta: &DeltaEvent,
    previous: &ScreenState,
    current: &ScreenState,
) -> ActionEvent {
    let mut scores: Vec<ActionHypothesis> = Vec::new();
    // Cursor–element overlap votes for click-family actions.
    let cursor_target = current.cursor.as_ref().and_then(|cursor| {
        cursor.bbox.as_ref().and_then(|cursor_bbox| {
            current
                .elements
                .iter()
                .filter(|element| element.interactable)
                .find(|element| element.bbox.iou(cursor_bbox) > 0.0
                    || element.bbox.contains(cursor_bbox))
                .map(|element| element.element_id.clone())
        })
    });
    let focus_changed = previous.focus_element_id != current.focus_element_id;
    let text_inserted = delta
        .changes
        .iter()
        .any(|change| change.kind == DeltaKind::Added && change.domain == "code")
        || delta
            .changes
            .iter()
            .any(|change| change.kind == DeltaKind::Added && change.domain == "cell");
    let scrollbar_moved = scrollbar_moved(previous, current);
    let translation = content_translated(previous, current);
    if let Some(target) = &cursor_target {
        let confidence = if focus_changed { 0.75 } else { 0.55 };
        scores.push(ActionHypothesis {
            kind: ActionKind::Click,
            confidence,
            target_element_id: Some(target.clone()),
        });
        scores.push(ActionHypothesis {
            kind: ActionKind::DoubleClick,
            confidence: confidence * 0.4,
            target_element_id: Some(target.clone()),
        });
        scores.push(ActionHypothesis {
            kind: ActionKind::RightClick,
            confidence: confidence * 0.3,
            target_element_id: Some(target.clone()),
        });
    }
    if text_inserted {
        scores.push(ActionHypothesis {
            kind: ActionKind::Type,
            confidence: if focus_changed { 0.5 } else { 0.8 },
            target_element_id: current.focus_element_id.clone(),
        });
    }
    if scrollbar_moved || translation {
        scores.push(ActionHypothesis {
            kind: ActionKind::Scroll,
            confidence: if scrollbar_moved { 0.8 } else { 0.55 },
            target_element_id: None,
        });
    }
    if focus_changed && cursor_target.is_none() && !text_inserted {
        scores.push(ActionHypothesis {
            kind: ActionKind::KeyShortcut,
            confidence: 0.45,
            target_element_id: current.focus_element_id.clone(),
        });
    }
    scores.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.kind.cmp(&b.kind))
    });
    for hypothesis in &mut scores {
        hypothesis.confidence = quantize_f32(hypothesis.confidence);
    }
    let primary = scores.first().cloned().unwrap_or(ActionHypothesis {
        kind: ActionKind::Unknown,
        confidence: 0.0,
        target_element_id: None,
    });
    let mut alternatives: Vec<ActionHypothesis> = scores.into_iter().skip(1).collect();
    if primary.confidence < ALTERNATIVE_FLOOR && alternatives.is_empty() {
        alternatives.push(ActionHypothesis {
            kind: ActionKind::Unknown,
            confidence: 0.0,
            target_element_id: None,
        });
    }
    ActionEvent {
        from_state_id: delta.from_state_id.clone(),
        to_state_id: delta.to_state_id.clone(),
        primary,
        alternatives,
        impact: classify_impact(delta),
    }
}

/// True when a scrollbar element moved between states.
fn scrollbar_moved(previous: &ScreenState, current: &ScreenState) -> bool {
    for current_bar in current
        .elements
        .iter()
        .filter(|element| element.element_type == ElementType::Scrollbar)
    {
        if let Some(previous_bar) = previous
            .elements
            .iter()
            .find(|element| element.element_id == current_bar.element_id)
        {
            if previous_bar.bbox != current_bar.bbox {
                return true;
            }
        }
    }
    false
}

/// True when surviving elements shifted by a common vertical offset.
fn content_translated(previous: &ScreenState, current: &ScreenState) -> bool {
    let mut offsets: Vec<i32> = Vec::new();
    for current_element in &current.elements {
        if let Some(previous_element) = previous
            .elements
            .iter()
            .find(|element| element.element_id == current_element.element_id)
        {
            let dy = current_element.bbox.y1() - previous_element.bbox.y1();
            let dx = current_element.bbox.x1() - previous_element.bbox.x1();
            if dx == 0 && dy != 0 {
                offsets.push(dy);
            }
        }
    }
    if offsets.len() < 2 {
        return false;
    }
    let first = offsets[0];
    offsets.iter().all(|offset| *offset == first)
}

/// Classifies impact from the delta composition.
#[must_use]
pub fn classify_impact(delta: &DeltaEvent) -> ActionImpact {
    let added = delta.changes.iter().filter(|change| change.kind == DeltaKind::Added).count();
    let removed =
        delta.changes.iter().filter(|change| change.kind == DeltaKind::Removed).count();
    if removed > added {
        ActionImpact::Deleted
    } else if added > removed {
        ActionImpact::Created
    } else {
        ActionImpact::Modified
    }
}
