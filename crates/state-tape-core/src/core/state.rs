// state-tape-core/src/core/state.rs
// ============================================================================
// Module: State Tape Temporal Model
// Description: Screen states, tape spans/edges, deltas, and action events.
// Purpose: Typed payloads for the state tape and its transitions.
// Dependencies: crate::core::{envelope, extraction, element, frame,
//               geometry, hashing, identifiers, time}, serde, base64
// ============================================================================

//! ## Overview
//! A [`ScreenState`] aggregates everything observed at one visual
//! equilibrium. The tape builder windows screen states into [`StateSpan`]
//! records with unit-normalized embeddings and links consecutive spans with
//! [`StateEdge`] records carrying `Δz` and `pred_error`. Deltas and inferred
//! actions reference states by identifier. All lists are sorted by their
//! documented keys before hashing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::element::UIElement;
use crate::core::extraction::Chart;
use crate::core::extraction::CodeBlock;
use crate::core::extraction::CursorTrack;
use crate::core::extraction::Table;
use crate::core::frame::TextToken;
use crate::core::hashing::HashDigest;
use crate::core::hashing::quantize_f32;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::ElementId;
use crate::core::identifiers::FrameId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::StateId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Embeddings
// ============================================================================

/// Errors raised when decoding embedding blobs.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The blob is not valid base64 or has a truncated float payload.
    #[error("invalid embedding blob: {0}")]
    InvalidBlob(String),
    /// The declared dimension does not match the decoded payload.
    #[error("embedding dimension mismatch: declared {declared}, decoded {decoded}")]
    DimensionMismatch {
        /// Declared dimension.
        declared: u32,
        /// Decoded dimension.
        decoded: usize,
    },
}

/// Fixed-dimension embedding stored as a base64 blob of little-endian `f32`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    /// Vector dimension.
    pub dim: u32,
    /// Element dtype label (always `f32`).
    pub dtype: String,
    /// Base64-encoded little-endian float payload.
    pub blob: String,
}

impl EmbeddingVector {
    /// Encodes a float slice into an embedding blob, quantizing each value
    /// for deterministic hashing.
    #[must_use]
    pub fn encode(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&quantize_f32(*value).to_le_bytes());
        }
        Self {
            dim: values.len() as u32,
            dtype: "f32".to_string(),
            blob: BASE64.encode(bytes),
        }
    }

    /// Decodes the blob back into float values.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] when the blob or dimension is invalid.
    pub fn decode(&self) -> Result<Vec<f32>, EmbeddingError> {
        let bytes =
            BASE64.decode(&self.blob).map_err(|err| EmbeddingError::InvalidBlob(err.to_string()))?;
        if bytes.len() % 4 != 0 {
            return Err(EmbeddingError::InvalidBlob("payload not a multiple of 4 bytes".into()));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if values.len() != self.dim as usize {
            return Err(EmbeddingError::DimensionMismatch {
                declared: self.dim,
                decoded: values.len(),
            });
        }
        Ok(values)
    }
}

/// Cosine similarity between two equal-length vectors; zero vectors compare
/// as zero similarity.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Unit-normalizes a vector in place; zero vectors are left untouched.
pub fn unit_normalize(values: &mut [f32]) {
    let norm: f64 = values.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in values.iter_mut() {
            *value = (f64::from(*value) / norm) as f32;
        }
    }
}

// ============================================================================
// SECTION: Screen State
// ============================================================================

/// Aggregate of all artifacts observed at one visual equilibrium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenState {
    /// State identifier.
    pub state_id: StateId,
    /// Frames contributing to this state.
    pub frame_ids: Vec<FrameId>,
    /// Parsed UI elements.
    pub elements: Vec<UIElement>,
    /// Recognized text tokens.
    pub text_tokens: Vec<TextToken>,
    /// Extracted tables.
    pub tables: Vec<Table>,
    /// Extracted code blocks.
    pub code_blocks: Vec<CodeBlock>,
    /// Extracted charts.
    pub charts: Vec<Chart>,
    /// Cursor observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorTrack>,
    /// Focused element when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_element_id: Option<ElementId>,
    /// Applications visible in this state.
    pub visible_apps: Vec<String>,
    /// Weighted mean of component confidences in `[0, 1]`.
    pub state_confidence: f32,
}

// ============================================================================
// SECTION: State Spans
// ============================================================================

/// Summary features carried by a span for cheap filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanSummaryFeatures {
    /// Dominant application for the span.
    pub app: String,
    /// Hash of the focused window title.
    pub window_title_hash: HashDigest,
    /// Most salient entities observed in the span.
    pub top_entities: Vec<String>,
}

/// One temporal unit of the state tape.
///
/// # Invariants
/// - `ts_start_ms < ts_end_ms`.
/// - Spans are append-only and written in frame-timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpan {
    /// State identifier.
    pub state_id: StateId,
    /// Owning capture session.
    pub session_id: SessionId,
    /// Span start (unix epoch milliseconds).
    pub ts_start_ms: Timestamp,
    /// Span end (unix epoch milliseconds).
    pub ts_end_ms: Timestamp,
    /// Unit-normalized span embedding.
    pub z_embedding: EmbeddingVector,
    /// Cheap summary features.
    pub summary_features: SpanSummaryFeatures,
}

impl StateSpan {
    /// Returns true when the span window is well-formed.
    #[must_use]
    pub fn window_is_valid(&self) -> bool {
        self.ts_start_ms < self.ts_end_ms
    }
}

// ============================================================================
// SECTION: State Edges
// ============================================================================

/// Transition between two consecutive spans.
///
/// # Invariants
/// - `from_state_id != to_state_id`; both endpoints exist in the span table.
/// - `pred_error` lies in `[0, 2]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEdge {
    /// Edge identifier.
    pub edge_id: EdgeId,
    /// Source span identifier.
    pub from_state_id: StateId,
    /// Destination span identifier.
    pub to_state_id: StateId,
    /// `z_to − z_from` embedding delta.
    pub delta_embedding: EmbeddingVector,
    /// `1 − cosine(z_to, z_from)`, clamped to `[0, 2]`.
    pub pred_error: f32,
}

/// Clamps a raw prediction error into the documented `[0, 2]` interval.
#[must_use]
pub fn clamp_pred_error(raw: f64) -> f32 {
    quantize_f32(raw.clamp(0.0, 2.0) as f32)
}

// ============================================================================
// SECTION: Delta Events
// ============================================================================

/// Kind of a structured change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Entity appeared.
    Added,
    /// Entity disappeared.
    Removed,
    /// Entity changed in place.
    Changed,
}

/// One structured change between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaChange {
    /// Change kind.
    pub kind: DeltaKind,
    /// Identifier of the changed entity (element id, cell address, line key).
    pub target_id: String,
    /// Human-readable domain of the change (`element`, `cell`, `code`).
    pub domain: String,
    /// Previous value when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// New value when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Structured delta between two consecutive states.
///
/// # Invariants
/// - `changes` is sorted by `(kind, target_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    /// Source state identifier.
    pub from_state_id: StateId,
    /// Destination state identifier.
    pub to_state_id: StateId,
    /// Sorted change list.
    pub changes: Vec<DeltaChange>,
}

impl DeltaEvent {
    /// Sorts changes into canonical `(kind, target_id)` order.
    pub fn normalize(&mut self) {
        self.changes.sort_by(|a, b| {
            (a.kind, a.target_id.as_str()).cmp(&(b.kind, b.target_id.as_str()))
        });
    }
}

// ============================================================================
// SECTION: Action Events
// ============================================================================

/// Candidate action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Single click.
    Click,
    /// Double click.
    DoubleClick,
    /// Right click.
    RightClick,
    /// Typed text.
    Type,
    /// Scroll.
    Scroll,
    /// Drag.
    Drag,
    /// Keyboard shortcut.
    KeyShortcut,
    /// Could not attribute an action.
    Unknown,
}

/// Impact classification derived from delta composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionImpact {
    /// Content was deleted.
    Deleted,
    /// Content was created.
    Created,
    /// Content was modified in place.
    Modified,
}

/// One scored action hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHypothesis {
    /// Hypothesized action kind.
    pub kind: ActionKind,
    /// Attribution confidence in `[0, 1]`.
    pub confidence: f32,
    /// Target element when attributable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_element_id: Option<ElementId>,
}

/// Probabilistic action attribution between two states.
///
/// # Invariants
/// - `primary.kind` is always present (possibly `unknown`).
/// - When `primary.confidence < 0.5`, `alternatives` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// Source state identifier.
    pub from_state_id: StateId,
    /// Destination state identifier.
    pub to_state_id: StateId,
    /// Primary hypothesis.
    pub primary: ActionHypothesis,
    /// Alternative hypotheses, sorted by descending confidence.
    pub alternatives: Vec<ActionHypothesis>,
    /// Impact classification.
    pub impact: ActionImpact,
}
