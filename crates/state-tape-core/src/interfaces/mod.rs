// state-tape-core/src/interfaces/mod.rs
// ============================================================================
// Module: State Tape Interfaces
// Description: Backend-agnostic interfaces for storage, activity, and models.
// Purpose: Define the contract surfaces used by the State Tape pipeline.
// Dependencies: crate::core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how State Tape integrates with storage engines, the
//! activity signal, and model backends without embedding backend-specific
//! details. Implementations must be deterministic and fail closed on missing
//! or invalid data. Model-backed implementations must honor the deterministic
//! invocation contract: fixed parameters, schema-validated output, results
//! sorted by documented keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::ArtifactEnvelope;
use crate::core::ArtifactId;
use crate::core::ArtifactKind;
use crate::core::AuditRow;
use crate::core::BBox;
use crate::core::EnvelopeError;
use crate::core::MediaId;
use crate::core::RunId;
use crate::core::TimeRange;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Record and blob store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Storage engine error.
    #[error("store db error: {0}")]
    Db(String),
    /// Transient contention; callers retry with backoff.
    #[error("store transient error: {0}")]
    Transient(String),
    /// Store corruption; fatal, writes must halt.
    #[error("store corruption: {0}")]
    Corruption(String),
    /// Invalid record or blob data.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Envelope violated a persistence invariant.
    #[error("store refused artifact: {0}")]
    Refused(String),
    /// Requested blob is past its TTL.
    #[error("blob past ttl: {0}")]
    TtlExpired(String),
}

impl From<EnvelopeError> for StoreError {
    fn from(error: EnvelopeError) -> Self {
        Self::Refused(error.to_string())
    }
}

// ============================================================================
// SECTION: Record Store
// ============================================================================

/// Append-only content-addressed record store.
///
/// # Invariants
/// - `put_record` validates envelope invariants and refuses violations.
/// - Re-inserting an existing artifact identifier is a no-op (idempotent
///   retries).
/// - `scan_by_*` reads from projection tables only.
pub trait RecordStore: Send + Sync {
    /// Persists a validated envelope and its projection rows transactionally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Refused`] on invariant violations and other
    /// [`StoreError`] kinds on engine failures.
    fn put_record(&self, envelope: &ArtifactEnvelope) -> Result<ArtifactId, StoreError>;

    /// Loads one record by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn get_record(&self, id: &ArtifactId) -> Result<Option<ArtifactEnvelope>, StoreError>;

    /// Scans records of one kind within a time range, ordered by timestamp
    /// then identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn scan_by_kind(
        &self,
        kind: ArtifactKind,
        range: TimeRange,
    ) -> Result<Vec<ArtifactEnvelope>, StoreError>;

    /// Scans all records within a time range, ordered by timestamp then
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn scan_by_time(&self, range: TimeRange) -> Result<Vec<ArtifactEnvelope>, StoreError>;

    /// Counts records of one kind within a time range.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn count_by_kind(&self, kind: ArtifactKind, range: TimeRange) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Blob Store
// ============================================================================

/// Content-addressed media blob store with mandatory TTL metadata.
pub trait BlobStore: Send + Sync {
    /// Stores a blob and returns its SHA-256 media identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn put_blob(&self, bytes: &[u8], ttl_expires_at: Timestamp) -> Result<MediaId, StoreError>;

    /// Loads a blob by identifier; fails when the blob is past its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TtlExpired`] past TTL and other [`StoreError`]
    /// kinds on engine failures.
    fn get_blob(&self, id: &MediaId) -> Result<Vec<u8>, StoreError>;
}

// ============================================================================
// SECTION: Audit Store
// ============================================================================

/// Append-only durable audit store, isolated from the metadata store.
pub trait AuditStore: Send + Sync {
    /// Appends one audit row atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn append_row(&self, row: &AuditRow) -> Result<(), StoreError>;

    /// Returns all rows for a run, ordered by timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine failures.
    fn rows_for_run(&self, run_id: &RunId) -> Result<Vec<AuditRow>, StoreError>;
}

// ============================================================================
// SECTION: Activity Signal
// ============================================================================

/// One sample of the upstream activity signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    /// True when the user is active.
    pub active: bool,
    /// Last input timestamp (unix epoch milliseconds).
    pub last_input_ms: Timestamp,
    /// Foreground application when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground_app: Option<String>,
    /// Sample timestamp (unix epoch milliseconds).
    pub sampled_at_ms: Timestamp,
}

/// Activity signal source errors.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// The signal could not be read.
    #[error("activity signal unavailable: {0}")]
    Unavailable(String),
}

/// Source of the periodic activity signal.
///
/// # Invariants
/// - A missing or stale sample must be treated as `active = true` by
///   consumers (fail closed).
pub trait ActivitySource: Send + Sync {
    /// Returns the most recent sample, or `None` when no signal exists.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] when the source cannot be read.
    fn sample(&self) -> Result<Option<ActivitySample>, ActivityError>;
}

// ============================================================================
// SECTION: Model Backends
// ============================================================================

/// Model backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend reported an error.
    #[error("model backend error: {0}")]
    Backend(String),
    /// The backend exceeded its invocation deadline.
    #[error("model backend timeout: {0}")]
    Timeout(String),
}

/// Decoded 8-bit sRGB pixel patch in frame coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePatch {
    /// Patch width in pixels.
    pub width: u32,
    /// Patch height in pixels.
    pub height: u32,
    /// Interleaved RGB bytes, row-major.
    pub rgb: Vec<u8>,
    /// Patch origin `(x, y)` in the owning frame.
    pub origin_x: i32,
    /// Patch origin y coordinate in the owning frame.
    pub origin_y: i32,
}

/// One raw OCR token in patch coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOcrToken {
    /// Recognized text.
    pub text: String,
    /// Token bounds in patch coordinates.
    pub bbox: BBox,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
}

/// OCR model backend. Implementations must be deterministic: fixed decoding
/// parameters and output sorted by `(bbox.y1, bbox.x1, text)`.
pub trait OcrBackend: Send + Sync {
    /// Returns the backing model identifier.
    fn model_id(&self) -> &str;

    /// Returns the backing model version.
    fn model_version(&self) -> &str;

    /// Recognizes text in a patch.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on inference failures.
    fn recognize(&self, patch: &ImagePatch) -> Result<Vec<RawOcrToken>, BackendError>;
}

/// Vision-language model backend for UI parsing. Implementations must run
/// with temperature 0, fixed max tokens, and return JSON for schema
/// validation; non-schema output is discarded whole by the caller.
pub trait VlmBackend: Send + Sync {
    /// Returns the backing model identifier.
    fn model_id(&self) -> &str;

    /// Returns the backing model version.
    fn model_version(&self) -> &str;

    /// Parses UI elements from a frame image, returning raw JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on inference failures.
    fn parse_elements(&self, image: &ImagePatch) -> Result<Value, BackendError>;
}

/// Text/region embedding backend. The builtin implementation is a
/// deterministic feature-hashing embedder; trainable replacements are gated
/// by the approved-model list in config.
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the backing model identifier.
    fn model_id(&self) -> &str;

    /// Returns the backing model version.
    fn model_version(&self) -> &str;

    /// Embeds normalized text into a fixed-dimension vector.
    fn embed_text(&self, text: &str) -> Vec<f32>;

    /// Embeds a pixel region into a fixed-dimension vector.
    fn embed_region(&self, patch: &ImagePatch) -> Vec<f32>;
}
