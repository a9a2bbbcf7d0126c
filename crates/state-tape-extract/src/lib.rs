// state-tape-extract/src/lib.rs
// ============================================================================
// Module: State Tape Extract Library
// Description: Public API surface for the extraction DAG and tape builder.
// Purpose: Expose the builtin node pack, orchestrator, and embeddings.
// Dependencies: crate::{assign, backends, dag, embed, nodes, phash, tape,
//               wire}
// ============================================================================

//! ## Overview
//! The extraction layer: deterministic perceptual hashing, feature-hash
//! embeddings with the shipped pooling projection, the fifteen builtin DAG
//! nodes, the per-node-committing orchestrator, and the state tape builder.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod assign;
pub mod backends;
pub mod dag;
pub mod embed;
pub mod nodes;
pub mod phash;
pub mod tape;
pub mod wire;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backends::ScriptedOcrBackend;
pub use backends::ScriptedVlmBackend;
pub use dag::DagError;
pub use dag::ExtractionPipeline;
pub use dag::FrameReport;
pub use dag::PipelineBackends;
pub use dag::builtin_admission;
pub use dag::builtin_manifests;
pub use dag::register_builtin_pack;
pub use embed::PoolingProjection;
pub use nodes::table::SheetObservation;
pub use phash::hamming_distance;
pub use phash::phash_gray;
pub use tape::TapeBuilder;
pub use tape::TapeBuilderConfig;
pub use tape::TapeEmit;
pub use wire::NormalizedFrame;
pub use wire::RawFrame;
pub use wire::SegmentObservation;
pub use wire::Tile;
