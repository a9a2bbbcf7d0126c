// state-tape-core/tests/envelope.rs
// ============================================================================
// Module: Envelope Tests
// Description: Tests for artifact envelope sealing and validation.
// ============================================================================
//! ## Overview
//! Validates the persistence-boundary invariants: deterministic identifiers,
//! mandatory evidence, and complete provenance for derived artifacts.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use serde_json::json;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::EnvelopeError;
use state_tape_core::EvidenceRef;
use state_tape_core::ExtractorInfo;
use state_tape_core::MediaId;
use state_tape_core::PluginId;
use state_tape_core::ProvenanceRecord;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds a complete provenance record for tests.
fn provenance() -> ProvenanceRecord {
    ProvenanceRecord {
        producer_plugin_id: PluginId::new("extract.table"),
        producer_plugin_version: "1.2.0".to_string(),
        model_id: None,
        model_version: None,
        config_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}"),
        input_artifact_ids: Vec::new(),
        created_ts_ms: Timestamp::from_millis(1_700_000_000_000),
    }
}

/// Builds extractor identity matching the test provenance.
fn extractor() -> ExtractorInfo {
    ExtractorInfo {
        id: PluginId::new("extract.table"),
        version: "1.2.0".to_string(),
        config_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, b"{}"),
    }
}

/// Builds one evidence reference for tests.
fn evidence() -> EvidenceRef {
    EvidenceRef::for_frame(
        MediaId::new("ab".repeat(32)),
        hash_bytes(DEFAULT_HASH_ALGORITHM, b"frame"),
        Timestamp::from_millis(1_700_000_000_000),
        0,
    )
}

// ============================================================================
// SECTION: Sealing
// ============================================================================

/// Tests sealing the same content twice yields the same identifier.
#[test]
fn test_seal_is_deterministic() {
    let a = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        0.9,
        vec![evidence()],
        json!({"rows": 2, "cols": 2}),
        Timestamp::from_millis(1),
    )
    .unwrap();
    let b = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        0.9,
        vec![evidence()],
        json!({"rows": 2, "cols": 2}),
        Timestamp::from_millis(99),
    )
    .unwrap();
    assert_eq!(a.artifact_id, b.artifact_id);
    assert!(a.artifact_id.has_canonical_prefix());
}

/// Tests payload changes change the identifier.
#[test]
fn test_seal_payload_sensitivity() {
    let a = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        0.9,
        vec![evidence()],
        json!({"rows": 2}),
        Timestamp::from_millis(1),
    )
    .unwrap();
    let b = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        0.9,
        vec![evidence()],
        json!({"rows": 3}),
        Timestamp::from_millis(1),
    )
    .unwrap();
    assert_ne!(a.artifact_id, b.artifact_id);
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Tests derived artifacts with empty evidence are refused.
#[test]
fn test_validate_refuses_empty_evidence() {
    let envelope = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        0.9,
        Vec::new(),
        json!({}),
        Timestamp::from_millis(1),
    )
    .unwrap();
    assert!(matches!(envelope.validate(), Err(EnvelopeError::EmptyEvidence(_))));
}

/// Tests incomplete provenance is refused.
#[test]
fn test_validate_refuses_incomplete_provenance() {
    let mut bad = provenance();
    bad.producer_plugin_version = String::new();
    let envelope = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        bad,
        0.9,
        vec![evidence()],
        json!({}),
        Timestamp::from_millis(1),
    )
    .unwrap();
    assert!(matches!(envelope.validate(), Err(EnvelopeError::ProvenanceIncomplete(_))));
}

/// Tests a tampered identifier fails validation.
#[test]
fn test_validate_detects_id_tampering() {
    let mut envelope = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        0.9,
        vec![evidence()],
        json!({"rows": 1}),
        Timestamp::from_millis(1),
    )
    .unwrap();
    envelope.payload = json!({"rows": 2});
    assert!(matches!(envelope.validate(), Err(EnvelopeError::IdMismatch { .. })));
}

/// Tests confidence outside the unit interval is rejected at seal time.
#[test]
fn test_seal_rejects_out_of_range_confidence() {
    let result = ArtifactEnvelope::seal(
        ArtifactKind::Table,
        1,
        extractor(),
        provenance(),
        1.5,
        vec![evidence()],
        json!({}),
        Timestamp::from_millis(1),
    );
    assert!(matches!(result, Err(EnvelopeError::ConfidenceOutOfRange(_))));
}
