// state-tape-extract/src/nodes/cursor.rs
// ============================================================================
// Module: Cursor Tracking Node
// Description: Multi-scale template matching against built-in cursor masks.
// Purpose: Locate and classify the pointer per frame.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! The node matches built-in binary cursor templates (arrow and I-beam)
//! against the grayscale frame at scales {0.75, 1.0, 1.25}. The best
//! normalized match above the acceptance threshold yields the cursor shape
//! and bounds; anything below reports `unknown` with low confidence rather
//! than a guessed position.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::BBox;
use state_tape_core::CursorShape;
use state_tape_core::CursorTrack;
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
use crate::wire::KEY_CURSOR;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Scales the templates are matched at.
const MATCH_SCALES: [f32; 3] = [0.75, 1.0, 1.25];
/// Acceptance threshold on the normalized match score.
const MATCH_THRESHOLD: f64 = 0.72;
/// Confidence reported for an unmatched cursor.
const UNKNOWN_CONFIDENCE: f32 = 0.1;
/// Match stride in pixels (dense matching is unnecessary for a pointer).
const MATCH_STRIDE: usize = 2;

/// 12×16 arrow template; `1` marks cursor-body pixels.
const ARROW_TEMPLATE: [[u8; 12]; 16] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0],
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0],
    [1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0],
];

/// 12×16 I-beam template.
const IBEAM_TEMPLATE: [[u8; 12]; 16] = [
    [0, 1, 1, 1, 0, 1, 1, 1, 0, 0, 0, 0],
    [0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 0, 1, 1, 1, 0, 0, 0, 0],
];

// ============================================================================
// SECTION: Cursor Node
// ============================================================================

/// `track.cursor` node.
pub struct CursorNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl CursorNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "track.cursor",
                "preprocess",
                &[KEY_FRAME_NORMALIZED],
                &[KEY_CURSOR],
                empty_config_schema(),
                object_schema(),
                &["/frame_id"],
            ),
        }
    }
}

impl Default for CursorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for CursorNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let gray = frame.gray().map_err(|err| PluginError::Execution(err.to_string()))?;
        let track = track_cursor(&frame, &gray);
        Ok(PluginOutput {
            items: to_items(std::slice::from_ref(&track))?,
            metrics: PluginMetrics { rows_in: 1, rows_out: 1, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Matching
// ============================================================================

/// Matches the built-in templates and reports the best acceptable hit.
#[must_use]
pub fn track_cursor(frame: &NormalizedFrame, gray: &[u8]) -> CursorTrack {
    let mut best_score = 0.0_f64;
    let mut best: Option<(CursorShape, BBox, f32)> = None;
    for (shape, template) in
        [(CursorShape::Arrow, &ARROW_TEMPLATE), (CursorShape::IBeam, &IBEAM_TEMPLATE)]
    {
        for scale in MATCH_SCALES {
            if let Some((score, bbox)) = match_template(frame, gray, template, scale) {
                if score > best_score {
                    best_score = score;
                    best = Some((shape, bbox, scale));
                }
            }
        }
    }
    match best {
        Some((shape, bbox, scale)) if best_score >= MATCH_THRESHOLD => CursorTrack {
            frame_id: frame.frame_id.clone(),
            bbox: Some(bbox),
            shape,
            scale,
            confidence: quantize_f32(best_score as f32),
        },
        _ => CursorTrack {
            frame_id: frame.frame_id.clone(),
            bbox: None,
            shape: CursorShape::Unknown,
            scale: 1.0,
            confidence: UNKNOWN_CONFIDENCE,
        },
    }
}

/// Slides one scaled template over the frame, returning the best normalized
/// contrast score and its bounds.
fn match_template(
    frame: &NormalizedFrame,
    gray: &[u8],
    template: &[[u8; 12]; 16],
    scale: f32,
) -> Option<(f64, BBox)> {
    let t_width = (12.0 * scale).round() as usize;
    let t_height = (16.0 * scale).round() as usize;
    if t_width == 0
        || t_height == 0
        || frame.width as usize <= t_width
        || frame.height as usize <= t_height
    {
        return None;
    }
    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut best_score = 0.0_f64;
    let mut best_origin = (0_usize, 0_usize);
    let mut y = 0_usize;
    while y + t_height < height {
        let mut x = 0_usize;
        while x + t_width < width {
            let score = score_at(gray, width, x, y, template, t_width, t_height);
            if score > best_score {
                best_score = score;
                best_origin = (x, y);
            }
            x += MATCH_STRIDE;
        }
        y += MATCH_STRIDE;
    }
    let bbox = BBox::new(
        best_origin.0 as i32,
        best_origin.1 as i32,
        (best_origin.0 + t_width) as i32,
        (best_origin.1 + t_height) as i32,
    )
    .ok()?;
    Some((best_score, bbox))
}

/// Scores one placement: contrast between template-body and background
/// pixels, normalized to `[0, 1]`.
fn score_at(
    gray: &[u8],
    width: usize,
    origin_x: usize,
    origin_y: usize,
    template: &[[u8; 12]; 16],
    t_width: usize,
    t_height: usize,
) -> f64 {
    let mut body_sum = 0.0_f64;
    let mut body_count = 0.0_f64;
    let mut back_sum = 0.0_f64;
    let mut back_count = 0.0_f64;
    for ty in 0..t_height {
        let sy = ty * 16 / t_height;
        for tx in 0..t_width {
            let sx = tx * 12 / t_width;
            let value = f64::from(gray[(origin_y + ty) * width + origin_x + tx]);
            if template[sy][sx] == 1 {
                body_sum += value;
                body_count += 1.0;
            } else {
                back_sum += value;
                back_count += 1.0;
            }
        }
    }
    if body_count == 0.0 || back_count == 0.0 {
        return 0.0;
    }
    ((back_sum / back_count) - (body_sum / body_count)).abs() / 255.0
}
