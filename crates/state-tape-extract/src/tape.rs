// state-tape-extract/src/tape.rs
// ============================================================================
// Module: State Tape Builder
// Description: Windows screen states into spans and links them with edges.
// Purpose: Produce the append-only temporal tape with embeddings.
// Dependencies: state-tape-core, state-tape-config, crate::embed
// ============================================================================

//! ## Overview
//! The builder windows processed frames into [`StateSpan`] records: a window
//! closes on an app/window change (preferred by default) or when the fixed
//! duration elapses. Each span carries `z_t`, the unit-normalized projection
//! of pooled region, text, app, and window-hash features; consecutive spans
//! link with a [`StateEdge`] carrying `Δz` and `pred_error = 1 − cos`. Span
//! evidence is the union of the contributing frames' references, and
//! provenance records the projection matrix hash.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_config::WindowBoundaryPreference;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::EdgeId;
use state_tape_core::EmbeddingVector;
use state_tape_core::EvidenceRef;
use state_tape_core::HashDigest;
use state_tape_core::ScreenState;
use state_tape_core::SessionId;
use state_tape_core::SpanSummaryFeatures;
use state_tape_core::StateEdge;
use state_tape_core::StateId;
use state_tape_core::StateSpan;
use state_tape_core::Timestamp;
use state_tape_core::clamp_pred_error;
use state_tape_core::cosine_similarity;
use state_tape_core::hash_bytes;

use crate::embed::PoolingProjection;
use crate::embed::concat_features;
use crate::embed::embed_app;
use crate::embed::embed_region;
use crate::embed::embed_text;
use crate::embed::embed_window_hash;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Tape builder configuration.
#[derive(Debug, Clone)]
pub struct TapeBuilderConfig {
    /// Fixed window duration in milliseconds (3–10 s).
    pub window_ms: u64,
    /// Preference when both boundary triggers apply.
    pub boundary_preference: WindowBoundaryPreference,
    /// Tokens below this confidence do not contribute to the text pooling.
    pub token_confidence_floor: f32,
}

impl Default for TapeBuilderConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            boundary_preference: WindowBoundaryPreference::AppChange,
            token_confidence_floor: 0.5,
        }
    }
}

// ============================================================================
// SECTION: Emissions
// ============================================================================

/// One span emission with its evidence union.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    /// The span payload.
    pub span: StateSpan,
    /// Union of contributing frame evidence.
    pub evidence: Vec<EvidenceRef>,
}

/// One edge emission with its endpoint evidence.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    /// The edge payload.
    pub edge: StateEdge,
    /// Evidence inherited from both endpoints.
    pub evidence: Vec<EvidenceRef>,
}

/// Tape emissions produced when a window closes.
#[derive(Debug, Clone, Default)]
pub struct TapeEmit {
    /// Closed span, when a window completed.
    pub span: Option<SpanRecord>,
    /// Edge from the previous span, when one exists.
    pub edge: Option<EdgeRecord>,
}

// ============================================================================
// SECTION: Open Window
// ============================================================================

/// Accumulated state for the window currently being built.
#[derive(Debug)]
struct OpenWindow {
    /// Owning session.
    session_id: SessionId,
    /// Window start timestamp.
    ts_start: Timestamp,
    /// Timestamp of the most recent frame.
    ts_last: Timestamp,
    /// Dominant app (first observed in the window).
    app: String,
    /// Window-title hash for the window.
    window_title_hash: HashDigest,
    /// Pooled region features (running sum).
    region_sum: Vec<f64>,
    /// Pooled text features (running sum).
    text_sum: Vec<f64>,
    /// Frames pooled so far.
    frame_count: u64,
    /// Evidence union.
    evidence: Vec<EvidenceRef>,
    /// Salient entity texts (highest-confidence tokens).
    entities: Vec<(String, f32)>,
}

// ============================================================================
// SECTION: Tape Builder
// ============================================================================

/// Builds the state tape from processed frames in timestamp order.
pub struct TapeBuilder {
    /// Builder configuration.
    config: TapeBuilderConfig,
    /// Shipped pooling projection.
    projection: PoolingProjection,
    /// Currently open window.
    current: Option<OpenWindow>,
    /// Previous span identity and embedding.
    previous: Option<(StateId, Vec<f32>)>,
}

impl TapeBuilder {
    /// Creates a builder with the shipped projection matrix.
    #[must_use]
    pub fn new(config: TapeBuilderConfig) -> Self {
        Self { config, projection: PoolingProjection::shipped(), current: None, previous: None }
    }

    /// Returns the projection matrix hash recorded in provenance.
    #[must_use]
    pub fn matrix_hash(&self) -> &HashDigest {
        self.projection.matrix_hash()
    }

    /// Observes one processed frame. Returns emissions when the observation
    /// closed the open window.
    #[must_use]
    pub fn observe(
        &mut self,
        frame: &NormalizedFrame,
        state: &ScreenState,
        visual_boundary: bool,
    ) -> TapeEmit {
        let app = state.visible_apps.first().cloned().unwrap_or_else(|| "unknown".to_string());
        let window_title = window_title(state);
        let window_title_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, window_title.as_bytes());
        let mut emit = TapeEmit::default();
        let should_close = match &self.current {
            None => false,
            Some(window) => {
                let app_changed =
                    window.app != app || window.window_title_hash != window_title_hash;
                let app_boundary = app_changed || visual_boundary;
                let elapsed = frame.ts_ms.saturating_millis_since(window.ts_start);
                let time_boundary = elapsed >= self.config.window_ms as i64;
                match self.config.boundary_preference {
                    WindowBoundaryPreference::AppChange => app_boundary || time_boundary,
                    WindowBoundaryPreference::TimeBased => time_boundary || app_boundary,
                }
            }
        };
        if should_close {
            emit = self.close_window();
        }
        let window = self.current.get_or_insert_with(|| OpenWindow {
            session_id: frame.session_id.clone(),
            ts_start: frame.ts_ms,
            ts_last: frame.ts_ms,
            app: app.clone(),
            window_title_hash: window_title_hash.clone(),
            region_sum: vec![0.0; crate::embed::REGION_EMBED_DIM],
            text_sum: vec![0.0; crate::embed::TEXT_EMBED_DIM],
            frame_count: 0,
            evidence: Vec::new(),
            entities: Vec::new(),
        });
        window.ts_last = frame.ts_ms;
        window.frame_count += 1;
        if let Ok(patch) = frame.patch() {
            for (slot, value) in window.region_sum.iter_mut().zip(embed_region(&patch)) {
                *slot += f64::from(value);
            }
        }
        let mut window_text = String::new();
        for token in &state.text_tokens {
            if token.confidence >= self.config.token_confidence_floor {
                window_text.push_str(&token.norm_text);
                window_text.push(' ');
                window.entities.push((token.norm_text.clone(), token.confidence));
            }
        }
        for (slot, value) in window.text_sum.iter_mut().zip(embed_text(&window_text)) {
            *slot += f64::from(value);
        }
        window.evidence.push(frame.evidence());
        emit
    }

    /// Closes any open window at the end of a batch.
    #[must_use]
    pub fn flush(&mut self) -> TapeEmit {
        self.close_window()
    }

    /// Closes the open window into span and edge emissions.
    fn close_window(&mut self) -> TapeEmit {
        let Some(window) = self.current.take() else {
            return TapeEmit::default();
        };
        if window.frame_count == 0 {
            return TapeEmit::default();
        }
        let count = window.frame_count as f64;
        let region: Vec<f32> =
            window.region_sum.iter().map(|value| (*value / count) as f32).collect();
        let text: Vec<f32> =
            window.text_sum.iter().map(|value| (*value / count) as f32).collect();
        let app_features = embed_app(&window.app);
        let window_features = embed_window_hash(&window.window_title_hash);
        let concat = concat_features(&region, &text, &app_features, &window_features);
        let z = self.projection.project(&concat);
        let ts_end = if window.ts_last > window.ts_start {
            window.ts_last
        } else {
            window.ts_start.saturating_add_millis(1)
        };
        let state_id = span_state_id(&window.session_id, window.ts_start, ts_end);
        // Highest confidence per distinct entity text.
        let mut best: std::collections::BTreeMap<String, f32> = std::collections::BTreeMap::new();
        for (text, confidence) in window.entities {
            let entry = best.entry(text).or_insert(confidence);
            if confidence > *entry {
                *entry = confidence;
            }
        }
        let mut entities: Vec<(String, f32)> = best.into_iter().collect();
        entities.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let top_entities: Vec<String> =
            entities.into_iter().take(8).map(|(text, _)| text).collect();
        let span = StateSpan {
            state_id: state_id.clone(),
            session_id: window.session_id,
            ts_start_ms: window.ts_start,
            ts_end_ms: ts_end,
            z_embedding: EmbeddingVector::encode(&z),
            summary_features: SpanSummaryFeatures {
                app: window.app,
                window_title_hash: window.window_title_hash,
                top_entities,
            },
        };
        let edge = self.previous.take().map(|(previous_id, previous_z)| {
            let delta: Vec<f32> =
                z.iter().zip(previous_z.iter()).map(|(a, b)| a - b).collect();
            let pred_error = clamp_pred_error(1.0 - cosine_similarity(&z, &previous_z));
            EdgeRecord {
                edge: StateEdge {
                    edge_id: edge_id(&previous_id, &state_id),
                    from_state_id: previous_id,
                    to_state_id: state_id.clone(),
                    delta_embedding: EmbeddingVector::encode(&delta),
                    pred_error,
                },
                evidence: window.evidence.clone(),
            }
        });
        self.previous = Some((state_id, z));
        TapeEmit {
            span: Some(SpanRecord { span, evidence: window.evidence }),
            edge,
        }
    }
}

// ============================================================================
// SECTION: Identity Helpers
// ============================================================================

/// Derives the deterministic span identifier.
fn span_state_id(session_id: &SessionId, ts_start: Timestamp, ts_end: Timestamp) -> StateId {
    let digest = hash_bytes(
        DEFAULT_HASH_ALGORITHM,
        format!("{session_id}|{ts_start}|{ts_end}").as_bytes(),
    );
    StateId::new(format!("span-{}", digest.prefix(24)))
}

/// Derives the deterministic edge identifier.
fn edge_id(from: &StateId, to: &StateId) -> EdgeId {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, format!("{from}->{to}").as_bytes());
    EdgeId::new(format!("edge-{}", digest.prefix(24)))
}

/// Derives the window title from the focused window element.
fn window_title(state: &ScreenState) -> String {
    state
        .elements
        .iter()
        .filter(|element| element.element_type == state_tape_core::ElementType::Window)
        .filter_map(|element| element.label.clone())
        .next()
        .unwrap_or_default()
}
