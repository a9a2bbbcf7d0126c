// state-tape-query/src/engine.rs
// ============================================================================
// Module: Evidence Compiler
// Description: Query → filters → retrieval → policy gate → bundle → answer.
// Purpose: Answer only from precomputed, citable evidence; never infer.
// Dependencies: state-tape-core, state-tape-index, state-tape-extract,
//               crate::{bundle, policy}
// ============================================================================

//! ## Overview
//! The engine is strictly read-only: it parses structured filters from the
//! query, retrieves candidates (lexical BM25 plus vector top-K over span
//! embeddings, expanded one bounded hop along the edge graph), compiles
//! redacted snippets with resolvable evidence references, applies the policy
//! gate, and assembles a deterministic extractive answer from the bundle.
//! No model endpoint is invoked and nothing is scheduled or written. An
//! empty bundle yields the first-class `no_evidence` outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::QueryRunId;
use state_tape_core::RecordStore;
use state_tape_core::StateId;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_extract::PoolingProjection;
use state_tape_extract::embed::concat_features;
use state_tape_extract::embed::embed_text;
use state_tape_index::IndexSet;
use state_tape_index::Posting;

use crate::bundle::Citation;
use crate::bundle::CitationSpanKind;
use crate::bundle::EvidenceHit;
use crate::bundle::PopupResponse;
use crate::bundle::QueryEvidenceBundle;
use crate::bundle::QueryFilters;
use crate::bundle::QueryOutcome;
use crate::policy::PolicyGate;
use crate::policy::redact_checked;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lexical candidate cap before gating.
const LEXICAL_CANDIDATES: usize = 32;
/// Vector candidate cap before gating.
const VECTOR_CANDIDATES: usize = 8;
/// Edge-expansion hop bound.
const EDGE_EXPANSION_LIMIT: usize = 4;
/// Bullets included in the extractive answer.
const MAX_BULLETS: usize = 3;

// ============================================================================
// SECTION: Engine
// ============================================================================

/// The read-only evidence compiler.
pub struct QueryEngine {
    /// Derived indexes (rebuilt after Stage-2 commits).
    index: IndexSet,
    /// Authoritative record store (snapshot reads only).
    store: Arc<dyn RecordStore>,
    /// Policy gate.
    gate: PolicyGate,
    /// Shipped projection for query embeddings.
    projection: PoolingProjection,
    /// Stale query-critical document count at engine construction.
    stale_docs: u64,
}

impl QueryEngine {
    /// Creates an engine over prebuilt indexes.
    #[must_use]
    pub fn new(index: IndexSet, store: Arc<dyn RecordStore>, gate: PolicyGate) -> Self {
        let stale_docs = index.stale_docs_count(store.as_ref()).unwrap_or(0);
        Self { index, store, gate, projection: PoolingProjection::shipped(), stale_docs }
    }

    /// Returns the stale-document count observed at construction.
    #[must_use]
    pub const fn stale_docs(&self) -> u64 {
        self.stale_docs
    }

    /// Parses structured filters out of the query text.
    ///
    /// Recognized prefixes: `app:<name>`, `after:<ms>`, `before:<ms>`.
    #[must_use]
    pub fn parse_filters(query: &str) -> QueryFilters {
        let mut app = None;
        let mut start = Timestamp::from_millis(i64::MIN);
        let mut end = Timestamp::from_millis(i64::MAX);
        let mut terms: Vec<&str> = Vec::new();
        for token in query.split_whitespace() {
            if let Some(value) = token.strip_prefix("app:") {
                app = Some(value.to_string());
            } else if let Some(value) = token.strip_prefix("after:") {
                if let Ok(ms) = value.parse::<i64>() {
                    start = Timestamp::from_millis(ms);
                }
            } else if let Some(value) = token.strip_prefix("before:") {
                if let Ok(ms) = value.parse::<i64>() {
                    end = Timestamp::from_millis(ms);
                }
            } else {
                terms.push(token);
            }
        }
        QueryFilters { time_range: TimeRange::new(start, end), app, terms: terms.join(" ") }
    }

    /// Compiles the policy-gated evidence bundle for a query.
    #[must_use]
    pub fn compile_bundle(&self, query: &str) -> QueryEvidenceBundle {
        let filters = Self::parse_filters(query);
        let query_run_id = derive_query_run_id(query);
        let mut hits: Vec<EvidenceHit> = Vec::new();
        let mut refused = 0_u64;

        // Lexical retrieval over every indexed text surface.
        for (artifact_id, score, posting) in
            self.index.lexical.search(&filters.terms, LEXICAL_CANDIDATES)
        {
            if !filters.time_range.contains(posting.ts_ms) {
                continue;
            }
            let Ok(Some(record)) = self.store.get_record(&artifact_id) else {
                continue;
            };
            if self.record_denied(&record, filters.app.as_deref()) {
                continue;
            }
            match self.compile_snippet(&record, &posting, &filters.terms, score) {
                Ok(Some(hit)) => hits.push(hit),
                Ok(None) => {}
                Err(()) => refused += 1,
            }
        }

        // Vector retrieval over span embeddings, expanded one hop.
        let query_embedding = self.embed_query(&filters.terms);
        let mut span_ids: Vec<(StateId, f64)> = self
            .index
            .vector
            .top_k(&query_embedding, VECTOR_CANDIDATES)
            .into_iter()
            .map(|hit| (hit.state_id, hit.score))
            .collect();
        let mut expanded: Vec<(StateId, f64)> = Vec::new();
        for (state_id, score) in &span_ids {
            if let Some(neighbors) = self.index.edges_by_source.get(state_id.as_str()) {
                for (neighbor, _) in neighbors.iter().take(EDGE_EXPANSION_LIMIT) {
                    expanded.push((neighbor.clone(), score * 0.5));
                }
            }
        }
        span_ids.extend(expanded);
        span_ids.sort_by(|a, b| a.0.cmp(&b.0));
        span_ids.dedup_by(|a, b| a.0 == b.0);
        for (state_id, score) in span_ids {
            if let Some(hit) = self.compile_span_hit(&state_id, score, &filters) {
                hits.push(hit);
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.artifact_id.cmp(&b.artifact_id))
        });
        QueryEvidenceBundle {
            query_run_id,
            filters,
            hits,
            can_show_raw_media: self.gate.can_show_raw_media(),
            can_export_text: self.gate.can_export_text(),
            refused_hits: refused,
        }
    }

    /// Executes the full query path and assembles the extractive response.
    #[must_use]
    pub fn execute(&self, query: &str, max_citations: usize, latency_ms: u64) -> PopupResponse {
        let bundle = self.compile_bundle(query);
        if bundle.is_empty() {
            return PopupResponse {
                ok: true,
                query: query.to_string(),
                query_run_id: bundle.query_run_id.as_str().to_string(),
                state: QueryOutcome::NoEvidence,
                summary: String::new(),
                bullets: Vec::new(),
                topic: String::new(),
                confidence_pct: 0,
                needs_processing: self.stale_docs > 0,
                processing_blocked_reason: None,
                scheduled_extract_job_id: None,
                latency_ms_total: latency_ms,
                citations: Vec::new(),
            };
        }
        let bullets: Vec<String> = bundle
            .hits
            .iter()
            .take(MAX_BULLETS)
            .map(|hit| hit.snippet.clone())
            .collect();
        let summary = bullets.first().cloned().unwrap_or_default();
        let topic = bundle
            .hits
            .first()
            .and_then(|hit| hit.state_id.as_ref().map(ToString::to_string))
            .unwrap_or_else(|| "screen activity".to_string());
        let confidence_pct = confidence_from_score(bundle.hits.first().map_or(0.0, |h| h.score));
        let citations: Vec<Citation> = bundle
            .hits
            .iter()
            .take(max_citations)
            .enumerate()
            .map(|(index, hit)| Citation {
                claim_index: (index.min(MAX_BULLETS.saturating_sub(1))) as u32,
                citation_index: index as u32,
                claim_text: hit.snippet.clone(),
                record_id: hit.artifact_id.as_str().to_string(),
                record_type: hit.record_type.clone(),
                source: "state-tape".to_string(),
                span_kind: hit.span_kind,
                offset_start: 0,
                offset_end: hit.snippet.chars().count() as u32,
                stale: self.stale_docs > 0,
                stale_reason: (self.stale_docs > 0)
                    .then(|| format!("{} query-critical docs unindexed", self.stale_docs)),
            })
            .collect();
        PopupResponse {
            ok: true,
            query: query.to_string(),
            query_run_id: bundle.query_run_id.as_str().to_string(),
            state: QueryOutcome::Ok,
            summary,
            bullets,
            topic,
            confidence_pct,
            needs_processing: self.stale_docs > 0,
            processing_blocked_reason: None,
            scheduled_extract_job_id: None,
            latency_ms_total: latency_ms,
            citations,
        }
    }

    /// Embeds the query terms into span space.
    fn embed_query(&self, terms: &str) -> Vec<f32> {
        let text = embed_text(terms);
        let zeros_region = vec![0.0_f32; state_tape_extract::embed::REGION_EMBED_DIM];
        let zeros_app = vec![0.0_f32; state_tape_extract::embed::APP_EMBED_DIM];
        let zeros_window = vec![0.0_f32; state_tape_extract::embed::WINDOW_EMBED_DIM];
        let concat = concat_features(&zeros_region, &text, &zeros_app, &zeros_window);
        self.projection.project(&concat)
    }

    /// True when the policy gate denies the record's app surface.
    fn record_denied(&self, record: &ArtifactEnvelope, app_filter: Option<&str>) -> bool {
        let apps = record_apps(&record.payload);
        if apps.iter().any(|app| self.gate.app_denied(Some(app))) {
            return true;
        }
        if let Some(filter) = app_filter {
            if !apps.is_empty() && !apps.iter().any(|app| app == filter) {
                return true;
            }
        }
        false
    }

    /// Compiles one lexical hit into a gated snippet.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` when redaction residue refuses the hit.
    fn compile_snippet(
        &self,
        record: &ArtifactEnvelope,
        posting: &Posting,
        terms: &str,
        score: f64,
    ) -> Result<Option<EvidenceHit>, ()> {
        let Some(raw_text) = snippet_text(&record.payload, terms) else {
            return Ok(None);
        };
        let Ok(redacted) = redact_checked(&raw_text) else {
            return Err(());
        };
        let Some(mut evidence) = record.evidence.first().cloned() else {
            return Ok(None);
        };
        if let Some(bbox) = posting.bbox {
            evidence.bbox_xywh = Some([bbox[0], bbox[1], bbox[2] - bbox[0], bbox[3] - bbox[1]]);
        }
        evidence.redaction_applied = redacted.applied;
        Ok(Some(EvidenceHit {
            artifact_id: record.artifact_id.clone(),
            record_type: record.kind.label().to_string(),
            state_id: None,
            score,
            snippet: redacted.text,
            span_kind: CitationSpanKind::Record,
            evidence,
            redaction_applied: redacted.applied,
        }))
    }

    /// Compiles one span hit when the span's record passes the gate.
    fn compile_span_hit(
        &self,
        state_id: &StateId,
        score: f64,
        filters: &QueryFilters,
    ) -> Option<EvidenceHit> {
        let records = self
            .store
            .scan_by_kind(state_tape_core::ArtifactKind::StateSpan, filters.time_range)
            .ok()?;
        let record = records.iter().find(|record| {
            record.payload.get("state_id").and_then(Value::as_str) == Some(state_id.as_str())
        })?;
        if self.record_denied(record, filters.app.as_deref()) {
            return None;
        }
        let entities = record
            .payload
            .pointer("/summary_features/top_entities")
            .and_then(Value::as_array)
            .map(|entities| {
                entities.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" ")
            })
            .unwrap_or_default();
        let app = record
            .payload
            .pointer("/summary_features/app")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let raw = if entities.is_empty() {
            format!("activity in {app}")
        } else {
            format!("{entities} ({app})")
        };
        let redacted = redact_checked(&raw).ok()?;
        let evidence = record.evidence.first().cloned()?;
        Some(EvidenceHit {
            artifact_id: record.artifact_id.clone(),
            record_type: record.kind.label().to_string(),
            state_id: Some(state_id.clone()),
            score,
            snippet: redacted.text,
            span_kind: CitationSpanKind::Span,
            evidence,
            redaction_applied: redacted.applied,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Derives the deterministic query run identifier.
fn derive_query_run_id(query: &str) -> QueryRunId {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, query.as_bytes());
    QueryRunId::new(format!("query-{}", digest.prefix(16)))
}

/// Maps a retrieval score to a confidence percentage.
fn confidence_from_score(score: f64) -> u8 {
    let pct = (score.clamp(0.0, 4.0) / 4.0 * 99.0).round();
    pct.clamp(0.0, 99.0) as u8
}

/// Collects the app labels present on a payload.
fn record_apps(payload: &Value) -> Vec<String> {
    let mut apps = Vec::new();
    if let Some(list) = payload.get("visible_apps").and_then(Value::as_array) {
        apps.extend(list.iter().filter_map(Value::as_str).map(ToString::to_string));
    }
    if let Some(app) = payload.pointer("/summary_features/app").and_then(Value::as_str) {
        apps.push(app.to_string());
    }
    if let Some(elements) = payload.get("elements").and_then(Value::as_array) {
        for element in elements {
            if let Some(app) = element.get("app_hint").and_then(Value::as_str) {
                apps.push(app.to_string());
            }
        }
    }
    apps.sort();
    apps.dedup();
    apps
}

/// Extracts a snippet containing a query term from any text surface.
fn snippet_text(payload: &Value, terms: &str) -> Option<String> {
    let lowered_terms: Vec<String> =
        terms.split_whitespace().map(str::to_lowercase).collect();
    let mut fields: Vec<String> = Vec::new();
    collect_text_fields(payload, &mut fields);
    // Prefer the field containing a query term; fall back to the first.
    let matched = fields.iter().find(|field| {
        let lowered = field.to_lowercase();
        lowered_terms.iter().any(|term| lowered.contains(term))
    });
    matched.or_else(|| fields.first()).cloned()
}

/// Collects candidate text fields from known payload shapes.
fn collect_text_fields(payload: &Value, out: &mut Vec<String>) {
    if let Some(tokens) = payload.get("tokens").and_then(Value::as_array) {
        let joined: Vec<&str> = tokens
            .iter()
            .filter_map(|token| token.get("norm_text").and_then(Value::as_str))
            .collect();
        if !joined.is_empty() {
            out.push(joined.join(" "));
        }
    }
    for pointer in ["/table/cells", "/code_block/lines"] {
        if let Some(items) = payload.pointer(pointer).and_then(Value::as_array) {
            let joined: Vec<&str> = items
                .iter()
                .filter_map(|item| {
                    item.get("norm_text").or_else(|| item.get("text")).and_then(Value::as_str)
                })
                .collect();
            if !joined.is_empty() {
                out.push(joined.join(" "));
            }
        }
    }
    if let Some(elements) = payload.get("elements").and_then(Value::as_array) {
        let labels: Vec<&str> = elements
            .iter()
            .filter_map(|element| element.get("label").and_then(Value::as_str))
            .collect();
        if !labels.is_empty() {
            out.push(labels.join(" "));
        }
        // Screen states also carry their token text.
        let token_text: Vec<&str> = payload
            .get("text_tokens")
            .and_then(Value::as_array)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter_map(|token| token.get("norm_text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if !token_text.is_empty() {
            out.push(token_text.join(" "));
        }
    }
}
