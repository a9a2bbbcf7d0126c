// state-tape-core/src/core/envelope.rs
// ============================================================================
// Module: State Tape Artifact Envelope
// Description: Common wrapper for every persisted derived artifact.
// Purpose: Enforce provenance, evidence, and deterministic-ID invariants.
// Dependencies: crate::core::{hashing, identifiers, geometry, time}, serde
// ============================================================================

//! ## Overview
//! Every persisted record carries the artifact envelope: identifier, kind,
//! schema version, extractor identity, provenance, confidence, evidence, and
//! the typed payload as canonical JSON. Envelopes are sealed through
//! [`ArtifactEnvelope::seal`], which derives the content-addressed identifier,
//! and validated at the persistence boundary through
//! [`ArtifactEnvelope::validate`]. A violating envelope is refused, never
//! repaired.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::geometry::BBox;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::hashing::quantize_f32;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::MediaId;
use crate::core::identifiers::PluginId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Artifact Kinds
// ============================================================================

/// Persisted artifact kinds.
///
/// # Invariants
/// - `Frame` is the only kind minted at Stage-1; every other kind is derived
///   and must carry evidence and complete provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Raw captured frame metadata (immutable, Stage-1).
    Frame,
    /// OCR text tokens for one frame.
    TextTokens,
    /// UI element graph for one frame.
    ElementGraph,
    /// Extracted table.
    Table,
    /// Extracted code block.
    CodeBlock,
    /// Extracted chart.
    Chart,
    /// Cursor track observation.
    CursorTrack,
    /// Assembled screen state.
    ScreenState,
    /// Temporal state span.
    StateSpan,
    /// Temporal state edge.
    StateEdge,
    /// Structured delta event.
    DeltaEvent,
    /// Inferred action event.
    ActionEvent,
}

impl ArtifactKind {
    /// Returns the stable string label used in projections and citations.
    ///
    /// Derived kinds carry the `derived.` prefix; frames do not.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::TextTokens => "derived.text_tokens",
            Self::ElementGraph => "derived.element_graph",
            Self::Table => "derived.table",
            Self::CodeBlock => "derived.code_block",
            Self::Chart => "derived.chart",
            Self::CursorTrack => "derived.cursor_track",
            Self::ScreenState => "derived.screen_state",
            Self::StateSpan => "derived.state_span",
            Self::StateEdge => "derived.state_edge",
            Self::DeltaEvent => "derived.delta_event",
            Self::ActionEvent => "derived.action_event",
        }
    }

    /// Parses a stable kind label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "frame" => Some(Self::Frame),
            "derived.text_tokens" => Some(Self::TextTokens),
            "derived.element_graph" => Some(Self::ElementGraph),
            "derived.table" => Some(Self::Table),
            "derived.code_block" => Some(Self::CodeBlock),
            "derived.chart" => Some(Self::Chart),
            "derived.cursor_track" => Some(Self::CursorTrack),
            "derived.screen_state" => Some(Self::ScreenState),
            "derived.state_span" => Some(Self::StateSpan),
            "derived.state_edge" => Some(Self::StateEdge),
            "derived.delta_event" => Some(Self::DeltaEvent),
            "derived.action_event" => Some(Self::ActionEvent),
            _ => None,
        }
    }

    /// Returns true when the kind is derived (not a Stage-1 frame).
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        !matches!(self, Self::Frame)
    }
}

// ============================================================================
// SECTION: Provenance
// ============================================================================

/// Provenance attached to every derived artifact.
///
/// # Invariants
/// - `input_artifact_ids` is sorted before hashing and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Producer plugin identifier.
    pub producer_plugin_id: PluginId,
    /// Producer plugin semantic version.
    pub producer_plugin_version: String,
    /// Backing model identifier, when a model was involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Backing model version, when a model was involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Canonical hash of the producing plugin's configuration.
    pub config_hash: HashDigest,
    /// Sorted input artifact identifiers.
    pub input_artifact_ids: Vec<ArtifactId>,
    /// Creation timestamp in unix epoch milliseconds.
    pub created_ts_ms: Timestamp,
}

impl ProvenanceRecord {
    /// Returns true when all mandatory provenance fields are populated.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.producer_plugin_id.as_str().is_empty()
            && !self.producer_plugin_version.is_empty()
            && !self.config_hash.value.is_empty()
    }

    /// Sorts the input artifact list into canonical order.
    pub fn normalize(&mut self) {
        self.input_artifact_ids.sort();
        self.input_artifact_ids.dedup();
    }
}

// ============================================================================
// SECTION: Evidence References
// ============================================================================

/// Character span inside an extracted text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    /// Inclusive start offset.
    pub start: u32,
    /// Exclusive end offset.
    pub end: u32,
}

/// Citation pointing at media, a frame index, a bbox, and an optional span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Media blob identifier (SHA-256 hex).
    pub media_id: MediaId,
    /// Evidence window start (unix epoch milliseconds).
    pub ts_start_ms: Timestamp,
    /// Evidence window end (unix epoch milliseconds).
    pub ts_end_ms: Timestamp,
    /// Frame index within the media stream.
    pub frame_index: u64,
    /// Region of interest in `[x, y, w, h]` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox_xywh: Option<[i32; 4]>,
    /// Character span when the evidence is textual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_span: Option<TextSpan>,
    /// Content hash of the referenced media blob.
    pub sha256: HashDigest,
    /// True when redaction was applied to the referenced content.
    pub redaction_applied: bool,
}

impl EvidenceRef {
    /// Builds an evidence reference covering a whole frame.
    #[must_use]
    pub fn for_frame(
        media_id: MediaId,
        sha256: HashDigest,
        ts_ms: Timestamp,
        frame_index: u64,
    ) -> Self {
        Self {
            media_id,
            ts_start_ms: ts_ms,
            ts_end_ms: ts_ms.saturating_add_millis(1),
            frame_index,
            bbox_xywh: None,
            text_span: None,
            sha256,
            redaction_applied: false,
        }
    }

    /// Returns a copy narrowed to the provided region.
    #[must_use]
    pub fn with_bbox(mut self, bbox: &BBox) -> Self {
        self.bbox_xywh = Some(bbox.to_xywh());
        self
    }
}

// ============================================================================
// SECTION: Extractor Identity
// ============================================================================

/// Identity of the extractor that produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorInfo {
    /// Plugin identifier.
    pub id: PluginId,
    /// Plugin semantic version.
    pub version: String,
    /// Canonical hash of the plugin configuration.
    pub config_hash: HashDigest,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Envelope validation errors. A failing envelope is refused at the
/// persistence boundary and reported as a diagnostic; the pipeline continues.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A derived artifact is missing evidence references.
    #[error("derived artifact has empty evidence: {0}")]
    EmptyEvidence(String),
    /// Provenance fields are incomplete.
    #[error("provenance incomplete: {0}")]
    ProvenanceIncomplete(String),
    /// The artifact identifier does not match the canonical content hash.
    #[error("artifact id mismatch: expected {expected}, found {found}")]
    IdMismatch {
        /// Canonical identifier derived from content.
        expected: String,
        /// Identifier carried by the envelope.
        found: String,
    },
    /// Envelope hashing failed.
    #[error("envelope hashing failed: {0}")]
    Hashing(String),
    /// The confidence value is outside `[0, 1]`.
    #[error("confidence out of range: {0}")]
    ConfidenceOutOfRange(f32),
}

impl From<HashError> for EnvelopeError {
    fn from(error: HashError) -> Self {
        Self::Hashing(error.to_string())
    }
}

// ============================================================================
// SECTION: Artifact Envelope
// ============================================================================

/// Identifier derivation input, hashed with RFC 8785 canonical JSON.
#[derive(Debug, Serialize)]
struct IdInput<'a> {
    /// Producer plugin identifier.
    plugin_id: &'a PluginId,
    /// Producer plugin version.
    plugin_version: &'a str,
    /// Backing model version when present.
    model_version: Option<&'a str>,
    /// Plugin configuration hash.
    config_hash: &'a HashDigest,
    /// Sorted input artifact identifiers.
    input_refs: &'a [ArtifactId],
    /// Canonical payload value.
    payload: &'a Value,
}

/// Common wrapper carried by every persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    /// Content-addressed artifact identifier.
    pub artifact_id: ArtifactId,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Payload schema version.
    pub schema_version: u32,
    /// Creation timestamp (unix epoch milliseconds).
    pub created_ts_ms: Timestamp,
    /// Extractor identity.
    pub extractor: ExtractorInfo,
    /// Provenance record.
    pub provenance: ProvenanceRecord,
    /// Aggregate confidence in `[0, 1]`.
    pub confidence: f32,
    /// Evidence references backing the artifact.
    pub evidence: Vec<EvidenceRef>,
    /// Typed payload as canonical JSON.
    pub payload: Value,
}

impl ArtifactEnvelope {
    /// Seals an envelope: normalizes provenance, quantizes confidence, and
    /// derives the canonical content-addressed identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when hashing fails or the confidence is out
    /// of range.
    #[allow(clippy::too_many_arguments, reason = "envelope fields are fixed by the data model")]
    pub fn seal(
        kind: ArtifactKind,
        schema_version: u32,
        extractor: ExtractorInfo,
        mut provenance: ProvenanceRecord,
        confidence: f32,
        evidence: Vec<EvidenceRef>,
        payload: Value,
        created_ts_ms: Timestamp,
    ) -> Result<Self, EnvelopeError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EnvelopeError::ConfidenceOutOfRange(confidence));
        }
        provenance.normalize();
        let artifact_id = derive_artifact_id(&provenance, &payload)?;
        Ok(Self {
            artifact_id,
            kind,
            schema_version,
            created_ts_ms,
            extractor,
            provenance,
            confidence: quantize_f32(confidence),
            evidence,
            payload,
        })
    }

    /// Validates the envelope invariants enforced at the persistence
    /// boundary: derived artifacts carry non-empty evidence and complete
    /// provenance, and the identifier replays from content.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] naming the violated invariant.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.kind.is_derived() {
            if self.evidence.is_empty() {
                return Err(EnvelopeError::EmptyEvidence(self.kind.label().to_string()));
            }
            if !self.provenance.is_complete() {
                return Err(EnvelopeError::ProvenanceIncomplete(format!(
                    "artifact {} is missing producer identity or config hash",
                    self.artifact_id
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EnvelopeError::ConfidenceOutOfRange(self.confidence));
        }
        let expected = derive_artifact_id(&self.provenance, &self.payload)?;
        if expected != self.artifact_id {
            return Err(EnvelopeError::IdMismatch {
                expected: expected.as_str().to_string(),
                found: self.artifact_id.as_str().to_string(),
            });
        }
        Ok(())
    }
}

/// Derives the canonical artifact identifier for a provenance + payload pair.
///
/// # Errors
///
/// Returns [`EnvelopeError::Hashing`] when canonicalization fails.
pub fn derive_artifact_id(
    provenance: &ProvenanceRecord,
    payload: &Value,
) -> Result<ArtifactId, EnvelopeError> {
    let input = IdInput {
        plugin_id: &provenance.producer_plugin_id,
        plugin_version: &provenance.producer_plugin_version,
        model_version: provenance.model_version.as_deref(),
        config_hash: &provenance.config_hash,
        input_refs: &provenance.input_artifact_ids,
        payload,
    };
    let digest = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &input)?;
    Ok(ArtifactId::from_digest(&digest))
}
