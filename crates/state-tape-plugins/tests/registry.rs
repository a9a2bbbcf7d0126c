// state-tape-plugins/tests/registry.rs
// ============================================================================
// Module: Plugin Registry Tests
// Description: Tests for admission, contract enforcement, and demotion.
// ============================================================================
//! ## Overview
//! Validates lockfile admission, closed-config rejection, whole-output
//! discard on schema failure, canonical sorting, crash demotion, and audit
//! row emission.

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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use serde_json::json;
use state_tape_core::AuditRow;
use state_tape_core::AuditStore;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::PluginId;
use state_tape_core::RunId;
use state_tape_core::StoreError;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_plugins::AdmissionPolicy;
use state_tape_plugins::CancelToken;
use state_tape_plugins::Capability;
use state_tape_plugins::Entrypoint;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginLockfile;
use state_tape_plugins::PluginManifest;
use state_tape_plugins::PluginMetrics;
use state_tape_plugins::PluginOutput;
use state_tape_plugins::PluginRegistry;
use state_tape_plugins::TapePlugin;

// ============================================================================
// SECTION: Fakes
// ============================================================================

/// In-memory audit store capturing appended rows.
#[derive(Default)]
struct MemoryAudit {
    /// Captured rows.
    rows: Mutex<Vec<AuditRow>>,
}

impl AuditStore for MemoryAudit {
    fn append_row(&self, row: &AuditRow) -> Result<(), StoreError> {
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }

    fn rows_for_run(&self, run_id: &RunId) -> Result<Vec<AuditRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.run_id == *run_id)
            .cloned()
            .collect())
    }
}

/// Configurable fake plugin.
struct FakePlugin {
    /// Descriptor returned to the registry.
    descriptor: PluginDescriptor,
    /// Items returned by each call.
    items: Vec<Value>,
    /// When set, every call fails with a worker crash.
    crash: bool,
}

impl TapePlugin for FakePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        _inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        if self.crash {
            return Err(PluginError::WorkerCrashed("boom".to_string()));
        }
        Ok(PluginOutput {
            items: self.items.clone(),
            metrics: PluginMetrics { rows_in: 1, rows_out: self.items.len() as u64, model_calls: 0 },
            diagnostics: Vec::new(),
        })
    }
}

/// Builds a descriptor with a closed config and simple item schema.
fn descriptor(id: &str) -> PluginDescriptor {
    PluginDescriptor {
        id: PluginId::new(id),
        version: "1.0.0".to_string(),
        capability: "preprocess".to_string(),
        requires: BTreeSet::new(),
        provides: ["out"].iter().map(ToString::to_string).collect(),
        config_schema: json!({
            "type": "object",
            "properties": { "threshold": { "type": "number" } },
            "additionalProperties": false
        }),
        output_schema: json!({
            "type": "object",
            "required": ["key"],
            "properties": { "key": { "type": "string" } },
            "additionalProperties": true
        }),
        sort_key_pointers: vec!["/key".to_string()],
    }
}

/// Builds a manifest for the descriptor.
fn manifest(id: &str) -> PluginManifest {
    PluginManifest {
        id: PluginId::new(id),
        version: "1.0.0".to_string(),
        capabilities: [Capability::Preprocess].into_iter().collect(),
        permissions: BTreeSet::new(),
        entrypoint: Entrypoint::InProcess { builtin: id.to_string() },
        code_sha256: hash_bytes(DEFAULT_HASH_ALGORITHM, id.as_bytes()),
    }
}

/// Builds an admission policy pinning the given manifests.
fn policy(manifests: &[PluginManifest]) -> AdmissionPolicy {
    AdmissionPolicy {
        allowlist: manifests.iter().map(|m| m.id.as_str().to_string()).collect(),
        lockfile: PluginLockfile::pin(manifests).unwrap(),
    }
}

/// Builds an invocation context with the given config.
fn context(config: Value) -> PluginContext {
    PluginContext {
        run_id: RunId::new("run-1"),
        ts_ms: Timestamp::from_millis(1_000),
        config,
        cancel: CancelToken::new(),
    }
}

// ============================================================================
// SECTION: Admission
// ============================================================================

/// Tests an unlisted plugin is refused.
#[test]
fn test_unlisted_plugin_refused() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(audit);
    let m = manifest("fake.a");
    let empty_policy = policy(&[]);
    let plugin = Box::new(FakePlugin { descriptor: descriptor("fake.a"), items: vec![], crash: false });
    let result = registry.register(&empty_policy, m, plugin);
    assert!(matches!(result, Err(PluginError::LoadFailure(_))));
}

/// Tests a code-hash mismatch is refused.
#[test]
fn test_code_hash_mismatch_refused() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(audit);
    let pinned = manifest("fake.a");
    let admission = policy(&[pinned]);
    let mut tampered = manifest("fake.a");
    tampered.code_sha256 = hash_bytes(DEFAULT_HASH_ALGORITHM, b"other code");
    let plugin = Box::new(FakePlugin { descriptor: descriptor("fake.a"), items: vec![], crash: false });
    let result = registry.register(&admission, tampered, plugin);
    assert!(matches!(result, Err(PluginError::LoadFailure(_))));
}

// ============================================================================
// SECTION: Contract Enforcement
// ============================================================================

/// Tests unknown config options are rejected at call time.
#[test]
fn test_unknown_config_option_rejected() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(audit);
    let m = manifest("fake.a");
    let admission = policy(std::slice::from_ref(&m));
    registry
        .register(
            &admission,
            m,
            Box::new(FakePlugin {
                descriptor: descriptor("fake.a"),
                items: vec![json!({"key": "x"})],
                crash: false,
            }),
        )
        .unwrap();
    let result = registry.invoke(
        &PluginId::new("fake.a"),
        &context(json!({"threshold": 0.5, "mystery": true})),
        &PluginInputs::default(),
    );
    assert!(matches!(result, Err(PluginError::ConfigRejected(_))));
}

/// Tests one invalid item discards the whole output.
#[test]
fn test_invalid_item_discards_whole_output() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(audit);
    let m = manifest("fake.a");
    let admission = policy(std::slice::from_ref(&m));
    registry
        .register(
            &admission,
            m,
            Box::new(FakePlugin {
                descriptor: descriptor("fake.a"),
                items: vec![json!({"key": "good"}), json!({"other": 1})],
                crash: false,
            }),
        )
        .unwrap();
    let result = registry.invoke(
        &PluginId::new("fake.a"),
        &context(json!({})),
        &PluginInputs::default(),
    );
    assert!(matches!(result, Err(PluginError::OutputRejected(_))));
}

/// Tests output items come back sorted by the documented key.
#[test]
fn test_output_sorted_by_documented_key() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(audit);
    let m = manifest("fake.a");
    let admission = policy(std::slice::from_ref(&m));
    registry
        .register(
            &admission,
            m,
            Box::new(FakePlugin {
                descriptor: descriptor("fake.a"),
                items: vec![json!({"key": "zeta"}), json!({"key": "alpha"}), json!({"key": "mid"})],
                crash: false,
            }),
        )
        .unwrap();
    let output = registry
        .invoke(&PluginId::new("fake.a"), &context(json!({})), &PluginInputs::default())
        .unwrap();
    let keys: Vec<&str> =
        output.items.iter().map(|item| item["key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
}

// ============================================================================
// SECTION: Demotion and Audit
// ============================================================================

/// Tests a crash demotes the plugin for the rest of the run.
#[test]
fn test_crash_demotes_plugin() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(audit);
    let m = manifest("fake.a");
    let admission = policy(std::slice::from_ref(&m));
    registry
        .register(
            &admission,
            m,
            Box::new(FakePlugin { descriptor: descriptor("fake.a"), items: vec![], crash: true }),
        )
        .unwrap();
    let id = PluginId::new("fake.a");
    let first = registry.invoke(&id, &context(json!({})), &PluginInputs::default());
    assert!(matches!(first, Err(PluginError::WorkerCrashed(_))));
    assert!(registry.is_demoted(&id));
    let second = registry.invoke(&id, &context(json!({})), &PluginInputs::default());
    assert!(matches!(second, Err(PluginError::LoadFailure(_))));
    registry.reset_demotions();
    assert!(!registry.is_demoted(&id));
}

/// Tests a config change between calls emits a unified mapping diff.
#[test]
fn test_mapping_change_emits_unified_diff() {
    use state_tape_core::AuditEvent;
    use state_tape_core::AuditSink;

    /// Sink capturing emitted events.
    #[derive(Default)]
    struct CaptureSink {
        /// Captured event details.
        events: Mutex<Vec<String>>,
    }

    impl AuditSink for CaptureSink {
        fn emit(&self, event: &AuditEvent) {
            self.events.lock().unwrap().push(event.details.to_string());
        }
    }

    let audit = Arc::new(MemoryAudit::default());
    let sink = Arc::new(CaptureSink::default());
    let mut registry =
        PluginRegistry::new(audit).with_sink(Arc::clone(&sink) as Arc<dyn AuditSink>);
    let m = manifest("fake.a");
    let admission = policy(std::slice::from_ref(&m));
    registry
        .register(
            &admission,
            m,
            Box::new(FakePlugin {
                descriptor: descriptor("fake.a"),
                items: vec![json!({"key": "x"})],
                crash: false,
            }),
        )
        .unwrap();
    let id = PluginId::new("fake.a");
    registry.invoke(&id, &context(json!({"threshold": 0.1})), &PluginInputs::default()).unwrap();
    assert!(sink.events.lock().unwrap().is_empty());
    registry.invoke(&id, &context(json!({"threshold": 0.9})), &PluginInputs::default()).unwrap();
    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].contains("unified_diff"));
    assert!(events[0].contains("-{"));
}

/// Tests every call writes exactly one audit row.
#[test]
fn test_each_call_writes_audit_row() {
    let audit = Arc::new(MemoryAudit::default());
    let mut registry = PluginRegistry::new(Arc::clone(&audit) as Arc<dyn AuditStore>);
    let m = manifest("fake.a");
    let admission = policy(std::slice::from_ref(&m));
    registry
        .register(
            &admission,
            m,
            Box::new(FakePlugin {
                descriptor: descriptor("fake.a"),
                items: vec![json!({"key": "x"})],
                crash: false,
            }),
        )
        .unwrap();
    let id = PluginId::new("fake.a");
    registry.invoke(&id, &context(json!({})), &PluginInputs::default()).unwrap();
    registry.invoke(&id, &context(json!({})), &PluginInputs::default()).unwrap();
    let rows = audit.rows_for_run(&RunId::new("run-1")).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.success));
    assert_eq!(rows[0].plugin_id, PluginId::new("fake.a"));
}
