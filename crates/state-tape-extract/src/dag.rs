// state-tape-extract/src/dag.rs
// ============================================================================
// Module: Extraction DAG Orchestrator
// Description: Ordered node execution with per-node commits and cancel.
// Purpose: Run the builtin pack over frames and write the state tape.
// Dependencies: state-tape-core, state-tape-config, state-tape-plugins,
//               crate::{nodes, tape, wire}
// ============================================================================

//! ## Overview
//! The orchestrator loads the fixed topological node order from
//! configuration, runs each node when its `requires` inputs are present on
//! the blackboard, and commits that node's artifacts to the store before the
//! next node runs. Cancellation is checked at every node boundary. A node
//! failure drops its artifacts for the frame (with a diagnostic) and the
//! pipeline continues; a timed-out node is retried once. After the last node
//! the tape builder windows the frame into spans and edges. Retries reuse
//! the same content-addressed artifact identifiers, so a replayed commit is
//! a no-op.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use state_tape_config::ExtractionConfig;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactId;
use state_tape_core::ArtifactKind;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::EvidenceRef;
use state_tape_core::ExtractorInfo;
use state_tape_core::Frame;
use state_tape_core::HashDigest;
use state_tape_core::OcrBackend;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::RecordStore;
use state_tape_core::RunId;
use state_tape_core::ScreenState;
use state_tape_core::StoreError;
use state_tape_core::Timestamp;
use state_tape_core::VlmBackend;
use state_tape_core::hash_canonical_json;
use state_tape_plugins::AdmissionPolicy;
use state_tape_plugins::CancelToken;
use state_tape_plugins::Capability;
use state_tape_plugins::Diagnostic;
use state_tape_plugins::Entrypoint;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginLockfile;
use state_tape_plugins::PluginManifest;
use state_tape_plugins::PluginRegistry;
use state_tape_plugins::TapePlugin;
use thiserror::Error;

use crate::nodes::BUILTIN_PACK_VERSION;
use crate::nodes::action::ActionNode;
use crate::nodes::chart::ChartNode;
use crate::nodes::code::CodeNode;
use crate::nodes::cursor::CursorNode;
use crate::nodes::delta::DeltaNode;
use crate::nodes::layout::LayoutNode;
use crate::nodes::match_ids::MatchIdsNode;
use crate::nodes::ocr::OcrNode;
use crate::nodes::preprocess::NormalizeNode;
use crate::nodes::preprocess::TileNode;
use crate::nodes::state_build::StateBuildNode;
use crate::nodes::table::SpreadsheetNode;
use crate::nodes::table::TableNode;
use crate::nodes::temporal::TemporalSegmentNode;
use crate::nodes::ui_parse::UiParseNode;
use crate::tape::TapeBuilder;
use crate::tape::TapeBuilderConfig;
use crate::tape::TapeEmit;
use crate::wire::KEY_ACTION;
use crate::wire::KEY_CHARTS;
use crate::wire::KEY_CODE_BLOCKS;
use crate::wire::KEY_CURSOR;
use crate::wire::KEY_DELTA;
use crate::wire::KEY_ELEMENT_GRAPH;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_FRAME_RAW;
use crate::wire::KEY_LAYOUT_TOKENS;
use crate::wire::KEY_MATCHED_STATE;
use crate::wire::KEY_PREVIOUS_FRAME;
use crate::wire::KEY_PREVIOUS_STATE;
use crate::wire::KEY_SCREEN_STATE;
use crate::wire::KEY_SEGMENT;
use crate::wire::KEY_SPREADSHEETS;
use crate::wire::KEY_TABLES;
use crate::wire::NormalizedFrame;
use crate::wire::RawFrame;
use crate::wire::SegmentObservation;
use crate::wire::encode_b64;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Blackboard keys whose node output is a single value rather than a list.
const SINGLE_VALUE_KEYS: [&str; 5] = [
    KEY_FRAME_NORMALIZED,
    KEY_ELEMENT_GRAPH,
    KEY_SCREEN_STATE,
    KEY_MATCHED_STATE,
    KEY_SEGMENT,
];

/// Producer identity for tape span and edge artifacts.
const TAPE_PRODUCER_ID: &str = "tape.window";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum DagError {
    /// Store failure while committing artifacts.
    #[error("dag store error: {0}")]
    Store(String),
    /// Run cancelled cooperatively.
    #[error("dag cancelled: {0}")]
    Cancelled(String),
    /// Frame payload malformed.
    #[error("dag frame invalid: {0}")]
    FrameInvalid(String),
}

impl From<StoreError> for DagError {
    fn from(error: StoreError) -> Self {
        Self::Store(error.to_string())
    }
}

// ============================================================================
// SECTION: Builtin Pack
// ============================================================================

/// Backends injected into the builtin pack.
pub struct PipelineBackends {
    /// OCR engine.
    pub ocr: Arc<dyn OcrBackend>,
    /// Vision-language model for UI parsing.
    pub vlm: Arc<dyn VlmBackend>,
}

/// Builds the manifests for the audited builtin pack.
#[must_use]
pub fn builtin_manifests() -> Vec<PluginManifest> {
    let entries: [(&str, Capability); 15] = [
        ("preprocess.normalize", Capability::Preprocess),
        ("preprocess.tile", Capability::Preprocess),
        ("ocr", Capability::Ocr),
        ("ui.parse", Capability::UiParse),
        ("layout.assemble", Capability::Preprocess),
        ("extract.table", Capability::UiParse),
        ("extract.spreadsheet", Capability::UiParse),
        ("extract.code", Capability::UiParse),
        ("extract.chart", Capability::UiParse),
        ("track.cursor", Capability::Preprocess),
        ("build.state", Capability::StateBuild),
        ("match.ids", Capability::StateBuild),
        ("temporal.segment", Capability::StateBuild),
        ("build.delta", Capability::StateBuild),
        ("infer.action", Capability::StateBuild),
    ];
    entries
        .iter()
        .map(|(id, capability)| PluginManifest {
            id: PluginId::new(*id),
            version: BUILTIN_PACK_VERSION.to_string(),
            capabilities: [*capability].into_iter().collect(),
            permissions: std::collections::BTreeSet::new(),
            entrypoint: Entrypoint::InProcess { builtin: (*id).to_string() },
            code_sha256: builtin_code_hash(id),
        })
        .collect()
}

/// Deterministic code hash for an audited builtin.
fn builtin_code_hash(id: &str) -> HashDigest {
    state_tape_core::hash_bytes(
        DEFAULT_HASH_ALGORITHM,
        format!("builtin:{id}:{BUILTIN_PACK_VERSION}").as_bytes(),
    )
}

/// Builds the admission policy pinning the builtin pack.
///
/// # Errors
///
/// Returns [`PluginError`] when the lockfile cannot be derived.
pub fn builtin_admission() -> Result<AdmissionPolicy, PluginError> {
    let manifests = builtin_manifests();
    Ok(AdmissionPolicy {
        allowlist: manifests.iter().map(|m| m.id.as_str().to_string()).collect(),
        lockfile: PluginLockfile::pin(&manifests)
            .map_err(|err| PluginError::LoadFailure(err.to_string()))?,
    })
}

/// Registers the builtin pack into a registry under the given policy.
///
/// # Errors
///
/// Returns [`PluginError`] when any node fails admission.
pub fn register_builtin_pack(
    registry: &mut PluginRegistry,
    policy: &AdmissionPolicy,
    backends: &PipelineBackends,
) -> Result<(), PluginError> {
    let manifests = builtin_manifests();
    for manifest in manifests {
        let plugin: Box<dyn TapePlugin> = match manifest.id.as_str() {
            "preprocess.normalize" => Box::new(NormalizeNode::new()),
            "preprocess.tile" => Box::new(TileNode::new()),
            "ocr" => Box::new(OcrNode::new(Arc::clone(&backends.ocr))),
            "ui.parse" => Box::new(UiParseNode::new(Arc::clone(&backends.vlm))),
            "layout.assemble" => Box::new(LayoutNode::new()),
            "extract.table" => Box::new(TableNode::new()),
            "extract.spreadsheet" => Box::new(SpreadsheetNode::new()),
            "extract.code" => Box::new(CodeNode::new()),
            "extract.chart" => Box::new(ChartNode::new()),
            "track.cursor" => Box::new(CursorNode::new()),
            "build.state" => Box::new(StateBuildNode::new()),
            "match.ids" => Box::new(MatchIdsNode::new()),
            "temporal.segment" => Box::new(TemporalSegmentNode::new()),
            "build.delta" => Box::new(DeltaNode::new()),
            "infer.action" => Box::new(ActionNode::new()),
            other => {
                return Err(PluginError::LoadFailure(format!("unknown builtin: {other}")));
            }
        };
        registry.register(policy, manifest, plugin)?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Frame Report
// ============================================================================

/// Outcome of processing one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// True when the frame was dropped at normalization.
    pub dropped: bool,
    /// Artifact identifiers committed for the frame.
    pub committed: Vec<ArtifactId>,
    /// Diagnostics accumulated across nodes.
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// The extraction pipeline: registry, node order, tape builder, and store.
pub struct ExtractionPipeline {
    /// Hosted plugin registry.
    registry: PluginRegistry,
    /// Extraction configuration.
    extraction: ExtractionConfig,
    /// Tape builder for spans and edges.
    tape: TapeBuilder,
    /// Destination record store.
    store: Arc<dyn RecordStore>,
    /// Previous normalized frame (session memory).
    previous_frame: Option<NormalizedFrame>,
    /// Previous matched screen state (session memory).
    previous_state: Option<ScreenState>,
    /// Frames observed so far in the session stream.
    frame_counter: u64,
}

impl ExtractionPipeline {
    /// Creates a pipeline over an already-populated registry.
    #[must_use]
    pub fn new(
        registry: PluginRegistry,
        extraction: ExtractionConfig,
        tape_config: TapeBuilderConfig,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            registry,
            extraction,
            tape: TapeBuilder::new(tape_config),
            store,
            previous_frame: None,
            previous_state: None,
            frame_counter: 0,
        }
    }

    /// Processes one frame end to end, committing per node.
    ///
    /// # Errors
    ///
    /// Returns [`DagError`] on cancellation, store failure, or a malformed
    /// frame record. Node failures degrade to diagnostics.
    pub fn process_frame(
        &mut self,
        run_id: &RunId,
        cancel: &CancelToken,
        frame_envelope: &ArtifactEnvelope,
        media_bytes: &[u8],
    ) -> Result<FrameReport, DagError> {
        let frame: Frame = serde_json::from_value(frame_envelope.payload.clone())
            .map_err(|err| DagError::FrameInvalid(err.to_string()))?;
        let raw = RawFrame {
            frame_id: frame.frame_id.clone(),
            ts_ms: frame.ts_ms,
            session_id: frame.source.session.clone(),
            media_id: state_tape_core::MediaId::new(frame.image_sha256.value.clone()),
            frame_index: self.frame_counter,
            media_b64: encode_b64(media_bytes),
        };
        self.frame_counter += 1;
        let mut report = FrameReport::default();
        let mut blackboard: BTreeMap<String, Value> = BTreeMap::new();
        blackboard.insert(
            KEY_FRAME_RAW.to_string(),
            serde_json::to_value(&raw).map_err(|err| DagError::FrameInvalid(err.to_string()))?,
        );
        blackboard.insert(
            KEY_PREVIOUS_STATE.to_string(),
            self.previous_state
                .as_ref()
                .and_then(|state| serde_json::to_value(state).ok())
                .unwrap_or(Value::Null),
        );
        blackboard.insert(
            KEY_PREVIOUS_FRAME.to_string(),
            self.previous_frame
                .as_ref()
                .and_then(|previous| serde_json::to_value(previous).ok())
                .unwrap_or(Value::Null),
        );
        let order = self.extraction.dag_order.clone();
        for node_id in &order {
            if cancel.is_cancelled() {
                return Err(DagError::Cancelled(node_id.clone()));
            }
            let plugin_id = PluginId::new(node_id.clone());
            if !self.registry.is_available(&plugin_id) {
                report.diagnostics.push(Diagnostic {
                    code: "node_unavailable".to_string(),
                    message: format!("node {node_id} skipped for this run"),
                });
                continue;
            }
            let Some(descriptor) = self.registry.descriptor_for(&plugin_id) else {
                continue;
            };
            let provides: Vec<String> = descriptor.provides.iter().cloned().collect();
            let requires: Vec<String> = descriptor.requires.iter().cloned().collect();
            let mut inputs = PluginInputs::default();
            for key in &requires {
                let value = blackboard.get(key).cloned().unwrap_or(Value::Null);
                inputs.insert(key.clone(), value);
            }
            let ctx = PluginContext {
                run_id: run_id.clone(),
                ts_ms: frame.ts_ms,
                config: self.node_config(node_id),
                cancel: cancel.clone(),
            };
            let result = match self.registry.invoke(&plugin_id, &ctx, &inputs) {
                Err(PluginError::ExecutionTimeout(message)) => {
                    report.diagnostics.push(Diagnostic {
                        code: "node_timeout_retry".to_string(),
                        message,
                    });
                    self.registry.invoke(&plugin_id, &ctx, &inputs)
                }
                other => other,
            };
            let items = match result {
                Ok(output) => {
                    report.diagnostics.extend(output.diagnostics);
                    output.items
                }
                Err(PluginError::Cancelled(message)) => {
                    return Err(DagError::Cancelled(message));
                }
                Err(err) => {
                    report.diagnostics.push(Diagnostic {
                        code: err.audit_label().to_string(),
                        message: err.to_string(),
                    });
                    Vec::new()
                }
            };
            if node_id.as_str() == "preprocess.normalize" && items.is_empty() {
                report.dropped = true;
                return Ok(report);
            }
            for provide in &provides {
                let value = if SINGLE_VALUE_KEYS.contains(&provide.as_str()) {
                    items.first().cloned().unwrap_or(Value::Null)
                } else {
                    Value::Array(items.clone())
                };
                blackboard.insert(provide.clone(), value);
            }
            self.commit_node_artifacts(
                node_id,
                &ctx,
                &frame_envelope.artifact_id,
                &blackboard,
                &mut report,
            )?;
        }
        self.finish_frame(&blackboard, &mut report)?;
        Ok(report)
    }

    /// Flushes the open tape window at the end of a batch.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::Store`] when the final span fails to commit.
    pub fn flush(&mut self) -> Result<Vec<ArtifactId>, DagError> {
        let emit = self.tape.flush();
        let mut committed = Vec::new();
        self.commit_tape(emit, &mut committed)?;
        Ok(committed)
    }

    /// Clears demotions and session memory at the start of a run.
    pub fn begin_run(&mut self) {
        self.registry.reset_demotions();
    }

    /// Builds the node configuration from extraction defaults and overrides.
    fn node_config(&self, node_id: &str) -> Value {
        if let Some(value) = self.extraction.plugin_options.get(node_id) {
            return value.clone();
        }
        match node_id {
            "preprocess.tile" => json!({
                "tile_size_px": self.extraction.tile_size_px,
                "tile_overlap_px": self.extraction.tile_overlap_px,
                "include_full_frame": true
            }),
            "ocr" => json!({ "min_conf": self.extraction.ocr_min_confidence }),
            "temporal.segment" => json!({
                "d_stable": self.extraction.phash_stable_distance,
                "d_boundary": self.extraction.phash_boundary_distance
            }),
            _ => json!({}),
        }
    }

    /// Commits the artifacts a node just produced.
    fn commit_node_artifacts(
        &mut self,
        node_id: &str,
        ctx: &PluginContext,
        frame_artifact_id: &ArtifactId,
        blackboard: &BTreeMap<String, Value>,
        report: &mut FrameReport,
    ) -> Result<(), DagError> {
        let Some(normalized) = normalized_from(blackboard) else {
            return Ok(());
        };
        let evidence = vec![normalized.evidence()];
        let context = CommitContext {
            node_id,
            config_hash: hash_json(&ctx.config),
            frame_artifact_id,
            ts_ms: normalized.ts_ms,
        };
        match node_id {
            "layout.assemble" => {
                if let Some(Value::Array(tokens)) = blackboard.get(KEY_LAYOUT_TOKENS) {
                    let payload = json!({
                        "frame_id": normalized.frame_id,
                        "ts_ms": normalized.ts_ms,
                        "session_id": normalized.session_id,
                        "tokens": tokens,
                    });
                    self.commit_one(&context, ArtifactKind::TextTokens, payload, evidence, report)?;
                }
            }
            "ui.parse" => {
                if let Some(graph) = blackboard.get(KEY_ELEMENT_GRAPH) {
                    if !graph.is_null() {
                        let payload = json!({
                            "frame_id": normalized.frame_id,
                            "ts_ms": normalized.ts_ms,
                            "session_id": normalized.session_id,
                            "graph": graph,
                        });
                        self.commit_one(
                            &context,
                            ArtifactKind::ElementGraph,
                            payload,
                            evidence,
                            report,
                        )?;
                    }
                }
            }
            "extract.spreadsheet" => {
                let tables = blackboard.get(KEY_TABLES).and_then(Value::as_array);
                let sheets = blackboard.get(KEY_SPREADSHEETS).and_then(Value::as_array);
                if let Some(tables) = tables {
                    for (index, table) in tables.iter().enumerate() {
                        let bbox = table.get("bbox").cloned().unwrap_or(Value::Null);
                        // Observations carry the index of the table they
                        // describe; join on it, never on list position.
                        let sheet_meta = sheets
                            .and_then(|sheets| {
                                sheets.iter().find(|observation| {
                                    observation.get("table_index").and_then(Value::as_u64)
                                        == Some(index as u64)
                                })
                            })
                            .and_then(|observation| observation.get("sheet"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        let payload = json!({
                            "frame_id": normalized.frame_id,
                            "ts_ms": normalized.ts_ms,
                            "session_id": normalized.session_id,
                            "table": table,
                            "sheet_meta": sheet_meta,
                        });
                        let evidence = region_evidence(&normalized, &bbox);
                        self.commit_one(&context, ArtifactKind::Table, payload, evidence, report)?;
                    }
                }
            }
            "extract.code" => {
                self.commit_list(
                    &context,
                    &normalized,
                    blackboard.get(KEY_CODE_BLOCKS),
                    ArtifactKind::CodeBlock,
                    "code_block",
                    report,
                )?;
            }
            "extract.chart" => {
                self.commit_list(
                    &context,
                    &normalized,
                    blackboard.get(KEY_CHARTS),
                    ArtifactKind::Chart,
                    "chart",
                    report,
                )?;
            }
            "track.cursor" => {
                self.commit_list(
                    &context,
                    &normalized,
                    blackboard.get(KEY_CURSOR),
                    ArtifactKind::CursorTrack,
                    "cursor",
                    report,
                )?;
            }
            "match.ids" => {
                if let Some(state) = blackboard.get(KEY_MATCHED_STATE) {
                    if !state.is_null() {
                        let mut payload = state.clone();
                        if let Some(map) = payload.as_object_mut() {
                            map.insert("ts_ms".to_string(), json!(normalized.ts_ms));
                            map.insert(
                                "session_id".to_string(),
                                json!(normalized.session_id),
                            );
                        }
                        self.commit_one(
                            &context,
                            ArtifactKind::ScreenState,
                            payload,
                            evidence,
                            report,
                        )?;
                    }
                }
            }
            "build.delta" => {
                self.commit_list(
                    &context,
                    &normalized,
                    blackboard.get(KEY_DELTA),
                    ArtifactKind::DeltaEvent,
                    "delta",
                    report,
                )?;
            }
            "infer.action" => {
                self.commit_list(
                    &context,
                    &normalized,
                    blackboard.get(KEY_ACTION),
                    ArtifactKind::ActionEvent,
                    "action",
                    report,
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Commits one list-shaped node output, wrapping each item.
    fn commit_list(
        &mut self,
        context: &CommitContext<'_>,
        normalized: &NormalizedFrame,
        items: Option<&Value>,
        kind: ArtifactKind,
        payload_key: &str,
        report: &mut FrameReport,
    ) -> Result<(), DagError> {
        let Some(Value::Array(items)) = items else {
            return Ok(());
        };
        for item in items {
            let bbox = item.get("bbox").cloned().unwrap_or(Value::Null);
            let payload = json!({
                "frame_id": normalized.frame_id,
                "ts_ms": normalized.ts_ms,
                "session_id": normalized.session_id,
                payload_key: item,
            });
            let evidence = region_evidence(normalized, &bbox);
            self.commit_one(context, kind, payload, evidence, report)?;
        }
        Ok(())
    }

    /// Seals and commits one artifact envelope.
    fn commit_one(
        &mut self,
        context: &CommitContext<'_>,
        kind: ArtifactKind,
        payload: Value,
        evidence: Vec<EvidenceRef>,
        report: &mut FrameReport,
    ) -> Result<(), DagError> {
        let provenance = ProvenanceRecord {
            producer_plugin_id: PluginId::new(context.node_id),
            producer_plugin_version: BUILTIN_PACK_VERSION.to_string(),
            model_id: None,
            model_version: None,
            config_hash: context.config_hash.clone(),
            input_artifact_ids: vec![context.frame_artifact_id.clone()],
            created_ts_ms: context.ts_ms,
        };
        let extractor = ExtractorInfo {
            id: PluginId::new(context.node_id),
            version: BUILTIN_PACK_VERSION.to_string(),
            config_hash: context.config_hash.clone(),
        };
        let envelope = ArtifactEnvelope::seal(
            kind,
            1,
            extractor,
            provenance,
            payload_confidence(&payload),
            evidence,
            payload,
            context.ts_ms,
        );
        match envelope {
            Ok(envelope) => {
                let id = self.store.put_record(&envelope)?;
                report.committed.push(id);
            }
            Err(err) => report.diagnostics.push(Diagnostic {
                code: "artifact_refused".to_string(),
                message: err.to_string(),
            }),
        }
        Ok(())
    }

    /// Feeds the tape builder and commits emitted spans and edges.
    fn finish_frame(
        &mut self,
        blackboard: &BTreeMap<String, Value>,
        report: &mut FrameReport,
    ) -> Result<(), DagError> {
        let Some(normalized) = normalized_from(blackboard) else {
            return Ok(());
        };
        let matched: Option<ScreenState> = blackboard
            .get(KEY_MATCHED_STATE)
            .filter(|value| !value.is_null())
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        let segment: Option<SegmentObservation> = blackboard
            .get(KEY_SEGMENT)
            .filter(|value| !value.is_null())
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        let Some(state) = matched else {
            return Ok(());
        };
        let boundary = segment.as_ref().is_some_and(|observation| observation.boundary);
        let emit = self.tape.observe(&normalized, &state, boundary);
        let mut committed = Vec::new();
        self.commit_tape(emit, &mut committed)?;
        report.committed.extend(committed);
        self.previous_frame = Some(normalized);
        self.previous_state = Some(state);
        Ok(())
    }

    /// Commits tape emissions (span, then edge).
    fn commit_tape(
        &mut self,
        emit: TapeEmit,
        committed: &mut Vec<ArtifactId>,
    ) -> Result<(), DagError> {
        let matrix_hash = self.tape.matrix_hash().clone();
        let span_ts = emit.span.as_ref().map(|record| record.span.ts_start_ms);
        if let Some(span_record) = emit.span {
            let payload = serde_json::to_value(&span_record.span)
                .map_err(|err| DagError::Store(err.to_string()))?;
            let envelope = seal_tape_artifact(
                ArtifactKind::StateSpan,
                payload,
                span_record.evidence,
                &matrix_hash,
                span_record.span.ts_start_ms,
            )
            .map_err(DagError::Store)?;
            committed.push(self.store.put_record(&envelope)?);
        }
        if let Some(edge_record) = emit.edge {
            let edge_ts = span_ts.unwrap_or(Timestamp::from_millis(0));
            let mut payload = serde_json::to_value(&edge_record.edge)
                .map_err(|err| DagError::Store(err.to_string()))?;
            if let Some(map) = payload.as_object_mut() {
                map.insert("ts_ms".to_string(), json!(edge_ts));
            }
            let envelope = seal_tape_artifact(
                ArtifactKind::StateEdge,
                payload,
                edge_record.evidence,
                &matrix_hash,
                edge_ts,
            )
            .map_err(DagError::Store)?;
            committed.push(self.store.put_record(&envelope)?);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Per-node commit context.
struct CommitContext<'a> {
    /// Node identifier.
    node_id: &'a str,
    /// Hash of the node configuration.
    config_hash: HashDigest,
    /// Frame artifact id feeding provenance inputs.
    frame_artifact_id: &'a ArtifactId,
    /// Frame timestamp.
    ts_ms: Timestamp,
}

/// Reads the normalized frame off the blackboard.
fn normalized_from(blackboard: &BTreeMap<String, Value>) -> Option<NormalizedFrame> {
    blackboard
        .get(KEY_FRAME_NORMALIZED)
        .filter(|value| !value.is_null())
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Narrows frame evidence to a payload bbox when one exists.
fn region_evidence(normalized: &NormalizedFrame, bbox: &Value) -> Vec<EvidenceRef> {
    let base = normalized.evidence();
    let Some(coords) = bbox.as_array() else {
        return vec![base];
    };
    let parsed: Vec<i32> = coords
        .iter()
        .filter_map(Value::as_i64)
        .map(|value| i32::try_from(value).unwrap_or(i32::MAX))
        .collect();
    if parsed.len() == 4 {
        if let Ok(bbox) = state_tape_core::BBox::new(parsed[0], parsed[1], parsed[2], parsed[3]) {
            return vec![base.with_bbox(&bbox)];
        }
    }
    vec![base]
}

/// Derives an envelope confidence from the payload when it carries one.
fn payload_confidence(payload: &Value) -> f32 {
    for pointer in [
        "/state_confidence",
        "/cursor/confidence",
        "/action/primary/confidence",
    ] {
        if let Some(value) = payload.pointer(pointer).and_then(Value::as_f64) {
            return value.clamp(0.0, 1.0) as f32;
        }
    }
    0.9
}

/// Hashes a node configuration value.
fn hash_json(value: &Value) -> HashDigest {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)
        .unwrap_or_else(|_| state_tape_core::hash_bytes(DEFAULT_HASH_ALGORITHM, b""))
}

/// Seals one tape artifact with the builder's provenance.
fn seal_tape_artifact(
    kind: ArtifactKind,
    payload: Value,
    evidence: Vec<EvidenceRef>,
    matrix_hash: &HashDigest,
    created_ts: Timestamp,
) -> Result<ArtifactEnvelope, String> {
    let provenance = ProvenanceRecord {
        producer_plugin_id: PluginId::new(TAPE_PRODUCER_ID),
        producer_plugin_version: BUILTIN_PACK_VERSION.to_string(),
        model_id: Some("baseline-pooling".to_string()),
        model_version: Some(matrix_hash.prefix(16).to_string()),
        config_hash: matrix_hash.clone(),
        input_artifact_ids: Vec::new(),
        created_ts_ms: created_ts,
    };
    let extractor = ExtractorInfo {
        id: PluginId::new(TAPE_PRODUCER_ID),
        version: BUILTIN_PACK_VERSION.to_string(),
        config_hash: matrix_hash.clone(),
    };
    ArtifactEnvelope::seal(kind, 1, extractor, provenance, 0.9, evidence, payload, created_ts)
        .map_err(|err| err.to_string())
}
