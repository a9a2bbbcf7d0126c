// state-tape-core/src/core/frame.rs
// ============================================================================
// Module: State Tape Frame Model
// Description: Captured frame metadata and OCR text tokens.
// Purpose: Provide the immutable Stage-1 frame record and per-frame text.
// Dependencies: crate::core::{geometry, hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A [`Frame`] is the immutable metadata record for one captured screenshot,
//! created at Stage-1 import and never mutated. [`TextToken`] records are
//! produced by the OCR node per frame, with bboxes remapped to frame
//! coordinates and normalized text suitable for indexing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::geometry::BBox;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::FrameId;
use crate::core::identifiers::SessionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Frame
// ============================================================================

/// Source descriptor for a captured frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSource {
    /// Monitor identifier on the capture host.
    pub monitor: String,
    /// Capture session identifier.
    pub session: SessionId,
}

/// Immutable metadata for one captured screenshot.
///
/// # Invariants
/// - Created at Stage-1 import; never mutated afterwards.
/// - `image_sha256` matches the media blob backing the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame identifier.
    pub frame_id: FrameId,
    /// Capture timestamp (unix epoch milliseconds).
    pub ts_ms: Timestamp,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// SHA-256 of the backing image blob.
    pub image_sha256: HashDigest,
    /// Capture source descriptor.
    pub source: FrameSource,
}

// ============================================================================
// SECTION: Text Tokens
// ============================================================================

/// Origin of a text token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextTokenSource {
    /// Produced by the OCR engine.
    Ocr,
    /// Produced by a vision-language model parse.
    Vlm,
}

/// Heuristic flags attached to a text token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextTokenFlags {
    /// True when the glyph widths suggest a monospace font.
    pub monospace_likely: bool,
    /// True when the normalized text parses as a number.
    pub is_number: bool,
}

/// One recognized text token in frame coordinates.
///
/// # Invariants
/// - `bbox` lies within the owning frame bounds (validated before persist).
/// - `norm_text` is unicode-normalized with collapsed whitespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToken {
    /// Token identifier, unique within the owning frame artifact.
    pub token_id: String,
    /// Raw recognized text.
    pub text: String,
    /// Normalized text used for matching and indexing.
    pub norm_text: String,
    /// Token bounds in frame coordinates.
    pub bbox: BBox,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
    /// Owning line identifier once layout assembly ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<String>,
    /// Owning block identifier once layout assembly ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    /// Token origin.
    pub source: TextTokenSource,
    /// Heuristic flags.
    #[serde(default)]
    pub flags: TextTokenFlags,
}

/// Normalizes recognized text: NFKC-style compatibility folding is delegated
/// to the OCR backend; this helper collapses whitespace runs and trims.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}
