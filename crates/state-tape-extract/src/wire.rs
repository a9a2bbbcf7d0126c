// state-tape-extract/src/wire.rs
// ============================================================================
// Module: DAG Wire Types
// Description: Values exchanged between extraction nodes on the blackboard.
// Purpose: Typed views over the JSON payloads flowing through the DAG.
// Dependencies: state-tape-core, serde, base64
// ============================================================================

//! ## Overview
//! Nodes exchange JSON values keyed by their `provides` labels. These wire
//! types give each node a typed view: the normalized frame (with its decoded
//! pixel plane carried as base64), overlapping tiles, and the temporal
//! segmentation observation. Pixel payloads never reach the derived store;
//! they exist only on the in-run blackboard.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;
use state_tape_core::BBox;
use state_tape_core::EvidenceRef;
use state_tape_core::FrameId;
use state_tape_core::HashDigest;
use state_tape_core::ImagePatch;
use state_tape_core::MediaId;
use state_tape_core::SessionId;
use state_tape_core::Timestamp;
use thiserror::Error;

// ============================================================================
// SECTION: Blackboard Keys
// ============================================================================

/// Raw frame input key (metadata plus base64 media bytes).
pub const KEY_FRAME_RAW: &str = "frame.raw";
/// Normalized frame output key.
pub const KEY_FRAME_NORMALIZED: &str = "frame.normalized";
/// Tile list output key.
pub const KEY_TILES: &str = "frame.tiles";
/// OCR token output key.
pub const KEY_TEXT_TOKENS: &str = "frame.text_tokens";
/// Element graph output key.
pub const KEY_ELEMENT_GRAPH: &str = "frame.element_graph";
/// Layout-assembled token output key.
pub const KEY_LAYOUT_TOKENS: &str = "frame.layout_tokens";
/// Table output key.
pub const KEY_TABLES: &str = "frame.tables";
/// Spreadsheet metadata output key.
pub const KEY_SPREADSHEETS: &str = "frame.spreadsheets";
/// Code block output key.
pub const KEY_CODE_BLOCKS: &str = "frame.code_blocks";
/// Chart output key.
pub const KEY_CHARTS: &str = "frame.charts";
/// Cursor observation output key.
pub const KEY_CURSOR: &str = "frame.cursor";
/// Screen state output key.
pub const KEY_SCREEN_STATE: &str = "frame.screen_state";
/// Identifier-matched screen state output key.
pub const KEY_MATCHED_STATE: &str = "frame.matched_state";
/// Temporal segmentation output key.
pub const KEY_SEGMENT: &str = "frame.segment";
/// Delta event output key.
pub const KEY_DELTA: &str = "frame.delta";
/// Action event output key.
pub const KEY_ACTION: &str = "frame.action";
/// Previous screen state input key (injected by the orchestrator).
pub const KEY_PREVIOUS_STATE: &str = "previous.screen_state";
/// Previous normalized frame input key (injected by the orchestrator).
pub const KEY_PREVIOUS_FRAME: &str = "previous.frame";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Wire decoding errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// A pixel payload failed to decode.
    #[error("invalid pixel payload: {0}")]
    InvalidPixels(String),
}

// ============================================================================
// SECTION: Raw Frame
// ============================================================================

/// Raw frame handed to the DAG: Stage-1 metadata plus media bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    /// Frame identifier.
    pub frame_id: FrameId,
    /// Capture timestamp.
    pub ts_ms: Timestamp,
    /// Owning session.
    pub session_id: SessionId,
    /// Media blob identifier.
    pub media_id: MediaId,
    /// Frame index within the session stream.
    pub frame_index: u64,
    /// Base64 PNG bytes.
    pub media_b64: String,
}

// ============================================================================
// SECTION: Normalized Frame
// ============================================================================

/// Normalized frame: decoded dimensions, hashes, and the sRGB plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFrame {
    /// Frame identifier.
    pub frame_id: FrameId,
    /// Capture timestamp.
    pub ts_ms: Timestamp,
    /// Owning session.
    pub session_id: SessionId,
    /// Media blob identifier.
    pub media_id: MediaId,
    /// Frame index within the session stream.
    pub frame_index: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// SHA-256 of the decoded image bytes.
    pub image_sha256: HashDigest,
    /// 64-bit perceptual hash, stable hex form.
    pub phash_hex: String,
    /// Base64 interleaved RGB plane (blackboard only, never persisted).
    pub rgb_b64: String,
}

impl NormalizedFrame {
    /// Decodes the interleaved RGB plane.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPixels`] when the payload is malformed.
    pub fn rgb(&self) -> Result<Vec<u8>, WireError> {
        let bytes = BASE64
            .decode(&self.rgb_b64)
            .map_err(|err| WireError::InvalidPixels(err.to_string()))?;
        let expected = self.width as usize * self.height as usize * 3;
        if bytes.len() != expected {
            return Err(WireError::InvalidPixels(format!(
                "expected {expected} bytes, found {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Decodes the frame into an owned image patch at the frame origin.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPixels`] when the payload is malformed.
    pub fn patch(&self) -> Result<ImagePatch, WireError> {
        Ok(ImagePatch {
            width: self.width,
            height: self.height,
            rgb: self.rgb()?,
            origin_x: 0,
            origin_y: 0,
        })
    }

    /// Returns the 8-bit grayscale plane derived from the RGB payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPixels`] when the payload is malformed.
    pub fn gray(&self) -> Result<Vec<u8>, WireError> {
        let rgb = self.rgb()?;
        let mut gray = Vec::with_capacity(rgb.len() / 3);
        for pixel in rgb.chunks_exact(3) {
            let luminance = 0.299 * f64::from(pixel[0])
                + 0.587 * f64::from(pixel[1])
                + 0.114 * f64::from(pixel[2]);
            gray.push(luminance.round().clamp(0.0, 255.0) as u8);
        }
        Ok(gray)
    }

    /// Extracts an owned patch for a clipped region of the frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPixels`] when the payload is malformed.
    pub fn crop(&self, bbox: &BBox) -> Result<ImagePatch, WireError> {
        let rgb = self.rgb()?;
        let width = bbox.width() as usize;
        let height = bbox.height() as usize;
        let mut out = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            let src_y = bbox.y1() as usize + y;
            let row_start = (src_y * self.width as usize + bbox.x1() as usize) * 3;
            let row_end = row_start + width * 3;
            if row_end <= rgb.len() {
                out.extend_from_slice(&rgb[row_start..row_end]);
            } else {
                out.resize(out.len() + width * 3, 0);
            }
        }
        Ok(ImagePatch {
            width: width as u32,
            height: height as u32,
            rgb: out,
            origin_x: bbox.x1(),
            origin_y: bbox.y1(),
        })
    }

    /// Builds the whole-frame evidence reference for derived artifacts. The
    /// reference hash names the media blob so citations resolve in the blob
    /// store.
    #[must_use]
    pub fn evidence(&self) -> EvidenceRef {
        let media_sha = HashDigest {
            algorithm: state_tape_core::HashAlgorithm::Sha256,
            value: self.media_id.as_str().to_string(),
        };
        EvidenceRef::for_frame(self.media_id.clone(), media_sha, self.ts_ms, self.frame_index)
    }
}

/// Encodes raw bytes into the base64 wire form.
#[must_use]
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes the base64 wire form.
///
/// # Errors
///
/// Returns [`WireError::InvalidPixels`] when the payload is malformed.
pub fn decode_b64(text: &str) -> Result<Vec<u8>, WireError> {
    BASE64.decode(text).map_err(|err| WireError::InvalidPixels(err.to_string()))
}

// ============================================================================
// SECTION: Tiles and Segments
// ============================================================================

/// One overlapping tile of the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Tile identifier, dense from zero.
    pub patch_id: u32,
    /// Tile bounds in frame coordinates.
    pub bbox: BBox,
    /// True when the tile covers the whole frame.
    pub full_frame: bool,
}

/// Temporal segmentation observation between consecutive frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentObservation {
    /// True when a state boundary was declared.
    pub boundary: bool,
    /// pHash Hamming distance to the previous frame.
    pub distance: u32,
    /// True when the cheap visual diff resolved an ambiguous distance.
    pub used_visual_diff: bool,
    /// Mean absolute downscaled difference when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_diff: Option<f64>,
}
