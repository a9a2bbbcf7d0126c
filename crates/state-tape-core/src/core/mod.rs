// state-tape-core/src/core/mod.rs
// ============================================================================
// Module: State Tape Core Data Model
// Description: Canonical records, identifiers, hashing, and geometry.
// Purpose: Group the core data model modules and re-export common types.
// Dependencies: crate::core::{audit, element, envelope, extraction, frame,
//               geometry, hashing, identifiers, state, time}
// ============================================================================

//! ## Overview
//! The core data model for State Tape: artifact envelopes with provenance
//! and evidence, frame and extraction records, the temporal tape, audit
//! surfaces, and the deterministic hashing primitives everything hangs off.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod element;
pub mod envelope;
pub mod extraction;
pub mod frame;
pub mod geometry;
pub mod hashing;
pub mod identifiers;
pub mod state;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditRow;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::memory_probe;
pub use element::ElementEdge;
pub use element::ElementEdgeKind;
pub use element::ElementGraph;
pub use element::ElementState;
pub use element::ElementType;
pub use element::UIElement;
pub use element::check_acyclic;
pub use envelope::ArtifactEnvelope;
pub use envelope::ArtifactKind;
pub use envelope::EnvelopeError;
pub use envelope::EvidenceRef;
pub use envelope::ExtractorInfo;
pub use envelope::ProvenanceRecord;
pub use envelope::TextSpan;
pub use envelope::derive_artifact_id;
pub use extraction::AxisOrientation;
pub use extraction::AxisTick;
pub use extraction::CaretObservation;
pub use extraction::Chart;
pub use extraction::ChartAxis;
pub use extraction::ChartPoint;
pub use extraction::ChartSeries;
pub use extraction::CodeBlock;
pub use extraction::CodeLine;
pub use extraction::CursorShape;
pub use extraction::CursorTrack;
pub use extraction::SelectionObservation;
pub use extraction::SpreadsheetMeta;
pub use extraction::Table;
pub use extraction::TableCell;
pub use extraction::escape_csv_field;
pub use extraction::parse_csv;
pub use frame::Frame;
pub use frame::FrameSource;
pub use frame::TextToken;
pub use frame::TextTokenFlags;
pub use frame::TextTokenSource;
pub use frame::normalize_text;
pub use geometry::BBox;
pub use geometry::GeometryError;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use hashing::quantize_f32;
pub use hashing::quantize_f64;
pub use identifiers::ArtifactId;
pub use identifiers::EdgeId;
pub use identifiers::ElementId;
pub use identifiers::FrameId;
pub use identifiers::MediaId;
pub use identifiers::PluginId;
pub use identifiers::QueryRunId;
pub use identifiers::RunId;
pub use identifiers::SessionId;
pub use identifiers::StateId;
pub use state::ActionEvent;
pub use state::ActionHypothesis;
pub use state::ActionImpact;
pub use state::ActionKind;
pub use state::DeltaChange;
pub use state::DeltaEvent;
pub use state::DeltaKind;
pub use state::EmbeddingError;
pub use state::EmbeddingVector;
pub use state::ScreenState;
pub use state::SpanSummaryFeatures;
pub use state::StateEdge;
pub use state::StateSpan;
pub use state::clamp_pred_error;
pub use state::cosine_similarity;
pub use state::unit_normalize;
pub use time::TimeRange;
pub use time::Timestamp;
