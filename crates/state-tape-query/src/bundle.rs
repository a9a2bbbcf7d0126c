// state-tape-query/src/bundle.rs
// ============================================================================
// Module: Query Evidence Bundle
// Description: The policy-gated evidence bundle and response shapes.
// Purpose: Define the only input surface the answer layer may see.
// Dependencies: state-tape-core, serde
// ============================================================================

//! ## Overview
//! A [`QueryEvidenceBundle`] is the sole product of retrieval: scored hits
//! with redacted snippets and resolvable [`EvidenceRef`] citations. The
//! answer layer consumes bundles and nothing else; an empty bundle obliges
//! the caller to answer "no evidence". The HTTP response shapes mirror the
//! popup contract, including per-claim citations.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::ArtifactId;
use state_tape_core::EvidenceRef;
use state_tape_core::QueryRunId;
use state_tape_core::StateId;
use state_tape_core::TimeRange;

// ============================================================================
// SECTION: Query Outcome
// ============================================================================

/// First-class query outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Evidence found and compiled.
    Ok,
    /// No evidence exists for the query (not an error).
    NoEvidence,
    /// The deadline elapsed; any partial bundle is diagnostic only.
    Timeout,
    /// Internal failure.
    Error,
}

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Structured filters parsed from the query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Time range restriction.
    pub time_range: TimeRange,
    /// Application restriction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Free-text terms after filter extraction.
    pub terms: String,
}

// ============================================================================
// SECTION: Evidence Hits
// ============================================================================

/// Span kind of one citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationSpanKind {
    /// Citation points into a single record.
    Record,
    /// Citation points at a temporal span.
    Span,
}

/// One policy-gated evidence hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceHit {
    /// Source artifact.
    pub artifact_id: ArtifactId,
    /// Stable record-kind label.
    pub record_type: String,
    /// Owning span when the hit is temporal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_id: Option<StateId>,
    /// Retrieval score (BM25 or cosine).
    pub score: f64,
    /// Redacted snippet text.
    pub snippet: String,
    /// Citation span kind.
    pub span_kind: CitationSpanKind,
    /// Resolvable evidence reference.
    pub evidence: EvidenceRef,
    /// True when redaction touched the snippet.
    pub redaction_applied: bool,
}

/// The policy-gated bundle handed to the answer layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvidenceBundle {
    /// Query run identifier.
    pub query_run_id: QueryRunId,
    /// Parsed filters.
    pub filters: QueryFilters,
    /// Gated hits, ranked.
    pub hits: Vec<EvidenceHit>,
    /// Export flag: raw media visibility.
    pub can_show_raw_media: bool,
    /// Export flag: text export.
    pub can_export_text: bool,
    /// Hits refused by the redaction residue check.
    pub refused_hits: u64,
}

impl QueryEvidenceBundle {
    /// True when no evidence survived the gate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

// ============================================================================
// SECTION: HTTP Shapes
// ============================================================================

/// Popup query request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopupRequest {
    /// Natural-language query.
    pub query: String,
    /// Must be absent or false: the query path never schedules work.
    #[serde(default)]
    pub schedule_extract: Option<bool>,
    /// Citation cap override.
    #[serde(default)]
    pub max_citations: Option<u32>,
}

/// One response citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Claim (bullet) index the citation backs.
    pub claim_index: u32,
    /// Citation ordinal within the response.
    pub citation_index: u32,
    /// Claim text backed by this citation.
    pub claim_text: String,
    /// Source record identifier.
    pub record_id: String,
    /// Stable record-kind label (derived kinds carry `derived.`).
    pub record_type: String,
    /// Producing source label.
    pub source: String,
    /// Citation span kind.
    pub span_kind: CitationSpanKind,
    /// Snippet start offset within the claim text.
    pub offset_start: u32,
    /// Snippet end offset within the claim text.
    pub offset_end: u32,
    /// True when the backing index was stale at answer time.
    pub stale: bool,
    /// Staleness reason when `stale` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_reason: Option<String>,
}

/// Popup query response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupResponse {
    /// True unless an internal error occurred.
    pub ok: bool,
    /// Echoed query.
    pub query: String,
    /// Query run identifier.
    pub query_run_id: String,
    /// Outcome state.
    pub state: QueryOutcome,
    /// Extractive summary, empty on no evidence.
    pub summary: String,
    /// Supporting bullets.
    pub bullets: Vec<String>,
    /// Dominant topic (app or entity).
    pub topic: String,
    /// Confidence percentage in `[0, 100]`.
    pub confidence_pct: u8,
    /// True when query-critical indexes were stale.
    pub needs_processing: bool,
    /// Reason processing is blocked, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_blocked_reason: Option<String>,
    /// Always null: the query path never schedules extraction.
    pub scheduled_extract_job_id: Option<String>,
    /// Total latency in milliseconds.
    pub latency_ms_total: u64,
    /// Citations backing the bullets.
    pub citations: Vec<Citation>,
}
