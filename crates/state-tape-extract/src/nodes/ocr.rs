// state-tape-extract/src/nodes/ocr.rs
// ============================================================================
// Module: OCR Node
// Description: Per-tile recognition, remapping, NMS, and normalization.
// Purpose: Produce frame-coordinate text tokens from the OCR backend.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! For each tile, the node calls the OCR backend, remaps token bboxes into
//! frame coordinates, and suppresses duplicates from overlapping tiles:
//! tokens with the same normalized text and IoU ≥ 0.7 keep only the highest
//! confidence. Tokens below the confidence floor are dropped; text is
//! whitespace-collapsed. Tokens whose bbox leaves the frame are dropped,
//! never clamped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use state_tape_core::BBox;
use state_tape_core::OcrBackend;
use state_tape_core::TextToken;
use state_tape_core::TextTokenFlags;
use state_tape_core::TextTokenSource;
use state_tape_core::normalize_text;
use state_tape_core::quantize_f32;
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
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_TEXT_TOKENS;
use crate::wire::KEY_TILES;
use crate::wire::NormalizedFrame;
use crate::wire::Tile;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// IoU threshold above which same-text tokens are considered duplicates.
const NMS_IOU_THRESHOLD: f64 = 0.7;

// ============================================================================
// SECTION: OCR Node
// ============================================================================

/// `ocr` node wrapping the configured backend.
pub struct OcrNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
    /// Backing OCR engine (deterministic invocation contract).
    backend: Arc<dyn OcrBackend>,
}

impl OcrNode {
    /// Creates the node over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn OcrBackend>) -> Self {
        Self {
            descriptor: node_descriptor(
                "ocr",
                "ocr",
                &[KEY_FRAME_NORMALIZED, KEY_TILES],
                &[KEY_TEXT_TOKENS],
                json!({
                    "type": "object",
                    "properties": {
                        "min_conf": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    },
                    "additionalProperties": false
                }),
                object_schema(),
                &["/bbox/1", "/bbox/0", "/norm_text"],
            ),
            backend,
        }
    }
}

impl TapePlugin for OcrNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let tiles: Vec<Tile> = parse_input(inputs, KEY_TILES)?;
        let min_conf = ctx
            .config
            .get("min_conf")
            .and_then(serde_json::Value::as_f64)
            .map_or(0.35_f32, |v| v as f32);
        let mut candidates: Vec<TextToken> = Vec::new();
        let mut model_calls = 0_u64;
        for tile in &tiles {
            if ctx.cancel.is_cancelled() {
                return Err(PluginError::Cancelled("ocr".to_string()));
            }
            let patch = frame
                .crop(&tile.bbox)
                .map_err(|err| PluginError::Execution(err.to_string()))?;
            let raw_tokens = self
                .backend
                .recognize(&patch)
                .map_err(|err| PluginError::Execution(err.to_string()))?;
            model_calls += 1;
            for raw in raw_tokens {
                if raw.confidence < min_conf {
                    continue;
                }
                // Remap into frame coordinates; out-of-frame boxes drop.
                let remapped = BBox::new(
                    raw.bbox.x1() + tile.bbox.x1(),
                    raw.bbox.y1() + tile.bbox.y1(),
                    raw.bbox.x2() + tile.bbox.x1(),
                    raw.bbox.y2() + tile.bbox.y1(),
                );
                let Ok(bbox) = remapped else {
                    continue;
                };
                if !bbox.within_frame(frame.width, frame.height) {
                    continue;
                }
                let norm_text = normalize_text(&raw.text);
                if norm_text.is_empty() {
                    continue;
                }
                let is_number = norm_text.parse::<f64>().is_ok();
                candidates.push(TextToken {
                    token_id: String::new(),
                    text: raw.text,
                    norm_text,
                    bbox,
                    confidence: quantize_f32(raw.confidence),
                    line_id: None,
                    block_id: None,
                    source: TextTokenSource::Ocr,
                    flags: TextTokenFlags { monospace_likely: false, is_number },
                });
            }
        }
        let rows_in = tiles.len() as u64;
        let mut tokens = suppress_duplicates(candidates);
        for (index, token) in tokens.iter_mut().enumerate() {
            token.token_id = format!("{}-t{index:05}", frame.frame_id);
        }
        Ok(PluginOutput {
            items: to_items(&tokens)?,
            metrics: PluginMetrics { rows_in, rows_out: tokens.len() as u64, model_calls },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Non-Maximum Suppression
// ============================================================================

/// Suppresses duplicate tokens across overlapping tiles: same normalized
/// text with IoU ≥ 0.7 keeps only the highest confidence.
#[must_use]
pub fn suppress_duplicates(mut candidates: Vec<TextToken>) -> Vec<TextToken> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.bbox.y1(), a.bbox.x1()).cmp(&(b.bbox.y1(), b.bbox.x1())))
            .then_with(|| a.norm_text.cmp(&b.norm_text))
    });
    let mut kept: Vec<TextToken> = Vec::new();
    for candidate in candidates {
        let duplicate = kept.iter().any(|existing| {
            existing.norm_text == candidate.norm_text
                && existing.bbox.iou(&candidate.bbox) >= NMS_IOU_THRESHOLD
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept.sort_by(|a, b| {
        (a.bbox.y1(), a.bbox.x1(), a.norm_text.as_str()).cmp(&(
            b.bbox.y1(),
            b.bbox.x1(),
            b.norm_text.as_str(),
        ))
    });
    kept
}
