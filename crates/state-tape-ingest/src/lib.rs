// state-tape-ingest/src/lib.rs
// ============================================================================
// Module: State Tape Ingest Library
// Description: Public API surface for the Stage-1 handoff ingestor.
// Purpose: Expose the ingestor, reap marker, and error taxonomy.
// Dependencies: crate::{ingest, marker}
// ============================================================================

//! ## Overview
//! Stage-1 of the pipeline: the fast, idempotent, model-free import of
//! upstream handoff directories into the content-addressed store, terminated
//! by the atomic reap marker.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod ingest;
pub mod marker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use ingest::HandoffIngestor;
pub use ingest::INGEST_COMPLETED_METHOD;
pub use ingest::IngestError;
pub use ingest::IngestReport;
pub use ingest::TransferMode;
pub use ingest::rfc3339_utc;
pub use marker::COMPLETE_MARKER_FILENAME;
pub use marker::REAP_MARKER_FILENAME;
pub use marker::REAP_MARKER_SCHEMA;
pub use marker::ReapCounts;
pub use marker::ReapMarker;
pub use marker::read_marker;
pub use marker::write_marker;
