// state-tape-extract/src/nodes/temporal.rs
// ============================================================================
// Module: Temporal Segmentation Node
// Description: pHash-distance boundary detection with a visual-diff middle.
// Purpose: Decide whether consecutive frames sit at the same equilibrium.
// Dependencies: state-tape-core, state-tape-plugins, crate::phash
// ============================================================================

//! ## Overview
//! The Hamming distance between consecutive perceptual hashes decides the
//! boundary: at or below the stable threshold there is none, at or above the
//! boundary threshold there is one, and the band in between falls back to a
//! cheap downscaled visual diff. The first frame of a session is always a
//! boundary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;
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
use crate::nodes::parse_optional_input;
use crate::nodes::to_items;
use crate::phash::downscaled_diff;
use crate::phash::hamming_distance;
use crate::phash::phash_from_hex;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_PREVIOUS_FRAME;
use crate::wire::KEY_SEGMENT;
use crate::wire::NormalizedFrame;
use crate::wire::SegmentObservation;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Mean-luminance diff above which the ambiguous band declares a boundary.
const VISUAL_DIFF_BOUNDARY: f64 = 8.0;

// ============================================================================
// SECTION: Segment Node
// ============================================================================

/// `temporal.segment` node.
pub struct TemporalSegmentNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl TemporalSegmentNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "temporal.segment",
                "state_build",
                &[KEY_FRAME_NORMALIZED, KEY_PREVIOUS_FRAME],
                &[KEY_SEGMENT],
                json!({
                    "type": "object",
                    "properties": {
                        "d_stable": { "type": "integer", "minimum": 0 },
                        "d_boundary": { "type": "integer", "minimum": 1 }
                    },
                    "additionalProperties": false
                }),
                object_schema(),
                &["/distance"],
            ),
        }
    }
}

impl Default for TemporalSegmentNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for TemporalSegmentNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let previous: Option<NormalizedFrame> = parse_optional_input(inputs, KEY_PREVIOUS_FRAME)?;
        let d_stable = ctx
            .config
            .get("d_stable")
            .and_then(serde_json::Value::as_u64)
            .map_or(4_u32, |v| v as u32);
        let d_boundary = ctx
            .config
            .get("d_boundary")
            .and_then(serde_json::Value::as_u64)
            .map_or(12_u32, |v| v as u32);
        let observation = segment(&frame, previous.as_ref(), d_stable, d_boundary)
            .map_err(PluginError::Execution)?;
        Ok(PluginOutput {
            items: to_items(std::slice::from_ref(&observation))?,
            metrics: PluginMetrics { rows_in: 1, rows_out: 1, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Segmentation
// ============================================================================

/// Decides the boundary observation for one frame pair.
///
/// # Errors
///
/// Returns a message when a pixel payload fails to decode.
pub fn segment(
    frame: &NormalizedFrame,
    previous: Option<&NormalizedFrame>,
    d_stable: u32,
    d_boundary: u32,
) -> Result<SegmentObservation, String> {
    let Some(previous) = previous else {
        return Ok(SegmentObservation {
            boundary: true,
            distance: u32::MAX,
            used_visual_diff: false,
            visual_diff: None,
        });
    };
    let current_hash = phash_from_hex(&frame.phash_hex)
        .ok_or_else(|| format!("invalid phash: {}", frame.phash_hex))?;
    let previous_hash = phash_from_hex(&previous.phash_hex)
        .ok_or_else(|| format!("invalid phash: {}", previous.phash_hex))?;
    let distance = hamming_distance(current_hash, previous_hash);
    if distance <= d_stable {
        return Ok(SegmentObservation {
            boundary: false,
            distance,
            used_visual_diff: false,
            visual_diff: None,
        });
    }
    if distance >= d_boundary {
        return Ok(SegmentObservation {
            boundary: true,
            distance,
            used_visual_diff: false,
            visual_diff: None,
        });
    }
    // Ambiguous band: fall back to the cheap downscaled diff.
    let current_gray = frame.gray().map_err(|err| err.to_string())?;
    let previous_gray = previous.gray().map_err(|err| err.to_string())?;
    let diff = downscaled_diff(
        &current_gray,
        frame.width,
        frame.height,
        &previous_gray,
        previous.width,
        previous.height,
    );
    Ok(SegmentObservation {
        boundary: diff >= VISUAL_DIFF_BOUNDARY,
        distance,
        used_visual_diff: true,
        visual_diff: Some(diff),
    })
}
