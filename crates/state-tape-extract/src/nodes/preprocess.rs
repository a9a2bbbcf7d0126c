// state-tape-extract/src/nodes/preprocess.rs
// ============================================================================
// Module: Preprocess Nodes
// Description: Frame normalization, hashing, and overlapping tiling.
// Purpose: Decode media to sRGB, fingerprint it, and cut OCR tiles.
// Dependencies: image, state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! `preprocess.normalize` decodes media bytes to 8-bit sRGB, computes the
//! image SHA-256 and the 64-bit perceptual hash, and publishes the
//! normalized frame. Frames that fail to decode are dropped with a
//! diagnostic. `preprocess.tile` cuts overlapping tiles (optionally plus a
//! full-frame patch) sorted by `(y1, x1, −area, patch_id)`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;
use state_tape_core::BBox;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::hash_bytes;
use state_tape_plugins::Diagnostic;
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
use crate::phash::phash_gray;
use crate::phash::phash_to_hex;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_FRAME_RAW;
use crate::wire::KEY_TILES;
use crate::wire::NormalizedFrame;
use crate::wire::RawFrame;
use crate::wire::Tile;
use crate::wire::decode_b64;
use crate::wire::encode_b64;

// ============================================================================
// SECTION: Normalize Node
// ============================================================================

/// `preprocess.normalize` node.
pub struct NormalizeNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl NormalizeNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "preprocess.normalize",
                "preprocess",
                &[KEY_FRAME_RAW],
                &[KEY_FRAME_NORMALIZED],
                empty_config_schema(),
                object_schema(),
                &["/frame_id"],
            ),
        }
    }
}

impl Default for NormalizeNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for NormalizeNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let raw: RawFrame = parse_input(inputs, KEY_FRAME_RAW)?;
        let media = decode_b64(&raw.media_b64)
            .map_err(|err| PluginError::Execution(err.to_string()))?;
        let decoded = match image::load_from_memory(&media) {
            Ok(decoded) => decoded,
            Err(err) => {
                // Undecodable frames are dropped, not fatal for the run.
                return Ok(PluginOutput {
                    items: Vec::new(),
                    metrics: PluginMetrics { rows_in: 1, rows_out: 0, model_calls: 0 },
                    diagnostics: vec![Diagnostic {
                        code: "frame_decode_failed".to_string(),
                        message: format!("frame {} dropped: {err}", raw.frame_id),
                    }],
                });
            }
        };
        let rgb = decoded.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());
        let rgb_bytes = rgb.into_raw();
        let image_sha256 = hash_bytes(DEFAULT_HASH_ALGORITHM, &rgb_bytes);
        let mut gray = Vec::with_capacity(rgb_bytes.len() / 3);
        for pixel in rgb_bytes.chunks_exact(3) {
            let luminance = 0.299 * f64::from(pixel[0])
                + 0.587 * f64::from(pixel[1])
                + 0.114 * f64::from(pixel[2]);
            gray.push(luminance.round().clamp(0.0, 255.0) as u8);
        }
        let phash = phash_gray(&gray, width, height);
        let normalized = NormalizedFrame {
            frame_id: raw.frame_id,
            ts_ms: raw.ts_ms,
            session_id: raw.session_id,
            media_id: raw.media_id,
            frame_index: raw.frame_index,
            width,
            height,
            image_sha256,
            phash_hex: phash_to_hex(phash),
            rgb_b64: encode_b64(&rgb_bytes),
        };
        Ok(PluginOutput {
            items: to_items(std::slice::from_ref(&normalized))?,
            metrics: PluginMetrics { rows_in: 1, rows_out: 1, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Tile Node
// ============================================================================

/// `preprocess.tile` node.
pub struct TileNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl TileNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "preprocess.tile",
                "preprocess",
                &[KEY_FRAME_NORMALIZED],
                &[KEY_TILES],
                json!({
                    "type": "object",
                    "properties": {
                        "tile_size_px": { "type": "integer", "minimum": 64 },
                        "tile_overlap_px": { "type": "integer", "minimum": 0 },
                        "include_full_frame": { "type": "boolean" }
                    },
                    "additionalProperties": false
                }),
                object_schema(),
                &["/bbox/1", "/bbox/0", "/patch_id"],
            ),
        }
    }
}

impl Default for TileNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for TileNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let tile_size = ctx
            .config
            .get("tile_size_px")
            .and_then(serde_json::Value::as_u64)
            .map_or(1024, |v| v as u32);
        let overlap = ctx
            .config
            .get("tile_overlap_px")
            .and_then(serde_json::Value::as_u64)
            .map_or(64, |v| v as u32);
        let include_full = ctx
            .config
            .get("include_full_frame")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let tiles = cut_tiles(frame.width, frame.height, tile_size, overlap, include_full);
        Ok(PluginOutput {
            items: to_items(&tiles)?,
            metrics: PluginMetrics { rows_in: 1, rows_out: tiles.len() as u64, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

/// Cuts overlapping tiles over the frame, sorted by `(y1, x1, −area,
/// patch_id)`.
#[must_use]
pub fn cut_tiles(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    include_full_frame: bool,
) -> Vec<Tile> {
    let mut tiles = Vec::new();
    if width == 0 || height == 0 || tile_size <= overlap {
        return tiles;
    }
    let step = (tile_size - overlap) as i64;
    let mut patch_id = 0_u32;
    let mut y = 0_i64;
    while y < i64::from(height) {
        let y2 = (y + i64::from(tile_size)).min(i64::from(height));
        let mut x = 0_i64;
        while x < i64::from(width) {
            let x2 = (x + i64::from(tile_size)).min(i64::from(width));
            if let Ok(bbox) = BBox::new(x as i32, y as i32, x2 as i32, y2 as i32) {
                tiles.push(Tile { patch_id, bbox, full_frame: false });
                patch_id += 1;
            }
            if x2 >= i64::from(width) {
                break;
            }
            x += step;
        }
        if y2 >= i64::from(height) {
            break;
        }
        y += step;
    }
    if include_full_frame {
        if let Ok(bbox) = BBox::new(0, 0, width as i32, height as i32) {
            tiles.push(Tile { patch_id, bbox, full_frame: true });
        }
    }
    tiles.sort_by_key(|tile| (tile.bbox.y1(), tile.bbox.x1(), -tile.bbox.area(), tile.patch_id));
    tiles
}
