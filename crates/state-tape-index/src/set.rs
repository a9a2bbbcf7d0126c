// state-tape-index/src/set.rs
// ============================================================================
// Module: Index Set
// Description: Builds all derived indexes from the authoritative store.
// Purpose: One rebuildable bundle with a staleness guard.
// Dependencies: state-tape-core, crate::{lexical, temporal, vector}
// ============================================================================

//! ## Overview
//! The index set scans the record store and populates the lexical, vector,
//! time, and structure indexes. Everything here is derived: a rebuild over a
//! stable corpus reproduces identical postings. After every Stage-2 commit
//! the scheduler enqueues a refresh; `stale_docs_count` compares store
//! counts against indexed counts for the query-critical kinds and gates
//! release when nonzero.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::BBox;
use state_tape_core::EmbeddingVector;
use state_tape_core::RecordStore;
use state_tape_core::StateId;
use state_tape_core::StoreError;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;

use crate::lexical::LexicalIndex;
use crate::temporal::StructureIndex;
use crate::temporal::TimeEntry;
use crate::temporal::TimeEntryKind;
use crate::temporal::TimeIndex;
use crate::vector::AnnSnapshot;
use crate::vector::VectorIndex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Kinds the query path depends on; staleness here gates release.
pub const QUERY_CRITICAL_KINDS: [ArtifactKind; 4] = [
    ArtifactKind::TextTokens,
    ArtifactKind::ScreenState,
    ArtifactKind::StateSpan,
    ArtifactKind::StateEdge,
];

// ============================================================================
// SECTION: Index Set
// ============================================================================

/// The derived index bundle.
#[derive(Debug, Default)]
pub struct IndexSet {
    /// BM25 inverted index.
    pub lexical: LexicalIndex,
    /// Exact vector index.
    pub vector: VectorIndex,
    /// Optional ANN snapshot (rebuild-on-commit).
    pub ann: Option<AnnSnapshot>,
    /// Instant lookup.
    pub time: TimeIndex,
    /// Element-type lookup.
    pub structure: StructureIndex,
    /// Edges by source span, for k-hop expansion.
    pub edges_by_source: BTreeMap<String, Vec<(StateId, f32)>>,
    /// Indexed record counts per kind at build time.
    indexed_counts: BTreeMap<&'static str, u64>,
}

impl IndexSet {
    /// Rebuilds every index from the store, optionally with the ANN
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the scan fails.
    pub fn rebuild(store: &dyn RecordStore, ann_enabled: bool) -> Result<Self, StoreError> {
        let mut set = Self::default();
        for kind in [
            ArtifactKind::TextTokens,
            ArtifactKind::ScreenState,
            ArtifactKind::Table,
            ArtifactKind::CodeBlock,
            ArtifactKind::StateSpan,
            ArtifactKind::StateEdge,
            ArtifactKind::DeltaEvent,
            ArtifactKind::ActionEvent,
        ] {
            let records = store.scan_by_kind(kind, TimeRange::all())?;
            *set.indexed_counts.entry(kind.label()).or_insert(0) += records.len() as u64;
            for record in &records {
                set.index_record(record);
            }
        }
        if ann_enabled {
            set.ann = Some(AnnSnapshot::build(&set.vector));
        }
        Ok(set)
    }

    /// Persists the serializable index snapshots under
    /// `<data_root>/index/{lexical,vector}`. The snapshots are a cache: a
    /// rebuild from the store always reproduces them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when a snapshot cannot be written.
    pub fn persist(&self, data_root: &std::path::Path) -> Result<(), StoreError> {
        let lexical_dir = data_root.join("index").join("lexical");
        let vector_dir = data_root.join("index").join("vector");
        for dir in [&lexical_dir, &vector_dir] {
            std::fs::create_dir_all(dir).map_err(|err| StoreError::Io(err.to_string()))?;
        }
        let lexical = serde_json::to_vec(&self.lexical)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        std::fs::write(lexical_dir.join("postings.json"), lexical)
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let vector = serde_json::to_vec(&self.vector)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        std::fs::write(vector_dir.join("embeddings.json"), vector)
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    /// Counts query-critical records newer than the indexed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the count fails.
    pub fn stale_docs_count(&self, store: &dyn RecordStore) -> Result<u64, StoreError> {
        let mut stale = 0_u64;
        for kind in QUERY_CRITICAL_KINDS {
            let live = store.count_by_kind(kind, TimeRange::all())?;
            let indexed = self.indexed_counts.get(kind.label()).copied().unwrap_or(0);
            stale += live.saturating_sub(indexed);
        }
        Ok(stale)
    }

    /// Indexes one record by kind.
    fn index_record(&mut self, record: &ArtifactEnvelope) {
        let ts = payload_ts(record);
        match record.kind {
            ArtifactKind::TextTokens => self.index_text_tokens(record, ts),
            ArtifactKind::ScreenState => self.index_screen_state(record, ts),
            ArtifactKind::Table => self.index_table(record, ts),
            ArtifactKind::CodeBlock => self.index_code_block(record, ts),
            ArtifactKind::StateSpan => self.index_span(record, ts),
            ArtifactKind::StateEdge => self.index_edge(record, ts),
            ArtifactKind::DeltaEvent => {
                self.time.insert(
                    ts,
                    TimeEntry {
                        kind: TimeEntryKind::Delta,
                        artifact_id: record.artifact_id.clone(),
                    },
                );
            }
            ArtifactKind::ActionEvent => {
                self.time.insert(
                    ts,
                    TimeEntry {
                        kind: TimeEntryKind::Action,
                        artifact_id: record.artifact_id.clone(),
                    },
                );
            }
            _ => {}
        }
    }

    /// Indexes OCR tokens.
    fn index_text_tokens(&mut self, record: &ArtifactEnvelope, ts: Timestamp) {
        let Some(tokens) = record.payload.get("tokens").and_then(Value::as_array) else {
            return;
        };
        for token in tokens {
            let Some(text) = token.get("norm_text").and_then(Value::as_str) else {
                continue;
            };
            let bbox = parse_bbox(token.get("bbox"));
            self.lexical.insert_field(&record.artifact_id, ts, text, bbox.as_ref());
        }
    }

    /// Indexes UI labels, window titles, and element structure.
    fn index_screen_state(&mut self, record: &ArtifactEnvelope, ts: Timestamp) {
        let Some(elements) = record.payload.get("elements").and_then(Value::as_array) else {
            return;
        };
        for element in elements {
            if let Some(label) = element.get("label").and_then(Value::as_str) {
                let bbox = parse_bbox(element.get("bbox"));
                self.lexical.insert_field(&record.artifact_id, ts, label, bbox.as_ref());
            }
            if let Some(type_label) = element.get("type").and_then(Value::as_str) {
                self.structure.insert(type_label, &record.artifact_id, ts);
            }
        }
        if let Some(apps) = record.payload.get("visible_apps").and_then(Value::as_array) {
            for app in apps.iter().filter_map(Value::as_str) {
                self.lexical.insert_field(&record.artifact_id, ts, app, None);
            }
        }
    }

    /// Indexes table cell values.
    fn index_table(&mut self, record: &ArtifactEnvelope, ts: Timestamp) {
        let Some(cells) = record
            .payload
            .get("table")
            .and_then(|table| table.get("cells"))
            .and_then(Value::as_array)
        else {
            return;
        };
        for cell in cells {
            let Some(text) = cell.get("norm_text").and_then(Value::as_str) else {
                continue;
            };
            let bbox = parse_bbox(cell.get("bbox"));
            self.lexical.insert_field(&record.artifact_id, ts, text, bbox.as_ref());
        }
    }

    /// Indexes reconstructed code lines.
    fn index_code_block(&mut self, record: &ArtifactEnvelope, ts: Timestamp) {
        let Some(lines) = record
            .payload
            .get("code_block")
            .and_then(|block| block.get("lines"))
            .and_then(Value::as_array)
        else {
            return;
        };
        for line in lines {
            let Some(text) = line.get("text").and_then(Value::as_str) else {
                continue;
            };
            let bbox = parse_bbox(line.get("bbox"));
            self.lexical.insert_field(&record.artifact_id, ts, text, bbox.as_ref());
        }
    }

    /// Indexes a state span into the vector, time, and lexical indexes.
    fn index_span(&mut self, record: &ArtifactEnvelope, ts: Timestamp) {
        let Some(state_id) = record.payload.get("state_id").and_then(Value::as_str) else {
            return;
        };
        if let Ok(embedding) =
            serde_json::from_value::<EmbeddingVector>(
                record.payload.get("z_embedding").cloned().unwrap_or(Value::Null),
            )
        {
            if let Ok(values) = embedding.decode() {
                self.vector.insert(StateId::new(state_id), values);
            }
        }
        self.time.insert(
            ts,
            TimeEntry { kind: TimeEntryKind::State, artifact_id: record.artifact_id.clone() },
        );
        if let Some(features) = record.payload.get("summary_features") {
            if let Some(app) = features.get("app").and_then(Value::as_str) {
                self.lexical.insert_field(&record.artifact_id, ts, app, None);
            }
            if let Some(entities) = features.get("top_entities").and_then(Value::as_array) {
                for entity in entities.iter().filter_map(Value::as_str) {
                    self.lexical.insert_field(&record.artifact_id, ts, entity, None);
                }
            }
        }
    }

    /// Indexes an edge for k-hop expansion.
    fn index_edge(&mut self, record: &ArtifactEnvelope, _ts: Timestamp) {
        let (Some(from), Some(to)) = (
            record.payload.get("from_state_id").and_then(Value::as_str),
            record.payload.get("to_state_id").and_then(Value::as_str),
        ) else {
            return;
        };
        let pred_error = record
            .payload
            .get("pred_error")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;
        self.edges_by_source
            .entry(from.to_string())
            .or_default()
            .push((StateId::new(to), pred_error));
        // Bidirectional expansion uses reverse entries too.
        self.edges_by_source
            .entry(to.to_string())
            .or_default()
            .push((StateId::new(from), pred_error));
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Extracts the projection timestamp of a record.
fn payload_ts(record: &ArtifactEnvelope) -> Timestamp {
    for key in ["ts_ms", "ts_start_ms"] {
        if let Some(value) = record.payload.get(key).and_then(Value::as_i64) {
            return Timestamp::from_millis(value);
        }
    }
    record.created_ts_ms
}

/// Parses an optional `[x1, y1, x2, y2]` payload bbox.
fn parse_bbox(value: Option<&Value>) -> Option<BBox> {
    let coords = value?.as_array()?;
    let parsed: Vec<i32> = coords
        .iter()
        .filter_map(Value::as_i64)
        .map(|value| i32::try_from(value).ok())
        .collect::<Option<Vec<i32>>>()?;
    if parsed.len() != 4 {
        return None;
    }
    BBox::new(parsed[0], parsed[1], parsed[2], parsed[3]).ok()
}
