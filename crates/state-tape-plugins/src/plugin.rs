// state-tape-plugins/src/plugin.rs
// ============================================================================
// Module: Plugin Interface
// Description: The abstract plugin contract and invocation payloads.
// Purpose: Define requires/provides wiring and the deterministic call shape.
// Dependencies: state-tape-core, serde, serde_json
// ============================================================================

//! ## Overview
//! A plugin declares the input keys it requires, the output keys it provides,
//! a closed configuration schema, and an output item schema. The orchestrator
//! injects a [`PluginContext`] and a [`PluginInputs`] map; a call produces a
//! [`PluginOutput`] of items, metrics, and diagnostics. Outputs failing schema
//! validation are discarded whole, never partially consumed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use state_tape_core::PluginId;
use state_tape_core::RunId;
use state_tape_core::Timestamp;
use thiserror::Error;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation token checked at node boundaries and before
/// model calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Shared cancel flag.
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true when cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Descriptor
// ============================================================================

/// Static plugin descriptor used for wiring and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin identifier.
    pub id: PluginId,
    /// Semantic version.
    pub version: String,
    /// Capability label exercised by this plugin.
    pub capability: String,
    /// Input keys the plugin requires.
    pub requires: BTreeSet<String>,
    /// Output keys the plugin provides.
    pub provides: BTreeSet<String>,
    /// Closed configuration schema (unknown options rejected).
    pub config_schema: Value,
    /// JSON schema every output item must satisfy.
    pub output_schema: Value,
    /// JSON pointers, in order, that define the documented output sort key.
    pub sort_key_pointers: Vec<String>,
}

// ============================================================================
// SECTION: Invocation Payloads
// ============================================================================

/// Context injected into every plugin call.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Invocation timestamp (unix epoch milliseconds).
    pub ts_ms: Timestamp,
    /// Validated closed configuration for this plugin.
    pub config: Value,
    /// Cooperative cancellation token.
    pub cancel: CancelToken,
}

/// Input values keyed by the plugin's `requires` labels.
#[derive(Debug, Clone, Default)]
pub struct PluginInputs {
    /// Values keyed by input label.
    pub values: BTreeMap<String, Value>,
}

impl PluginInputs {
    /// Returns the input for one key.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MissingInput`] when the key is absent.
    pub fn require(&self, key: &str) -> Result<&Value, PluginError> {
        self.values.get(key).ok_or_else(|| PluginError::MissingInput(key.to_string()))
    }

    /// Inserts one input value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }
}

/// Per-call metrics reported by the plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetrics {
    /// Items consumed.
    pub rows_in: u64,
    /// Items produced.
    pub rows_out: u64,
    /// Model invocations performed.
    pub model_calls: u64,
}

/// One structured diagnostic emitted during a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Result of one plugin call.
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
    /// Output items, schema-validated and sorted by the documented keys.
    pub items: Vec<Value>,
    /// Call metrics.
    pub metrics: PluginMetrics,
    /// Structured diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plugin loading and execution errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin admission failed; the plugin is demoted for the run.
    #[error("plugin load failure: {0}")]
    LoadFailure(String),
    /// A required input key was absent.
    #[error("plugin missing input: {0}")]
    MissingInput(String),
    /// Plugin configuration failed the closed schema.
    #[error("plugin config rejected: {0}")]
    ConfigRejected(String),
    /// Output failed schema validation and was discarded whole.
    #[error("plugin output rejected: {0}")]
    OutputRejected(String),
    /// The call was cancelled cooperatively.
    #[error("plugin call cancelled: {0}")]
    Cancelled(String),
    /// The call exceeded its deadline; retried once, then failed.
    #[error("plugin execution timeout: {0}")]
    ExecutionTimeout(String),
    /// The hosted worker crashed.
    #[error("plugin worker crashed: {0}")]
    WorkerCrashed(String),
    /// Plugin-internal failure.
    #[error("plugin execution error: {0}")]
    Execution(String),
}

impl PluginError {
    /// Returns the stable audit label for the error.
    #[must_use]
    pub const fn audit_label(&self) -> &'static str {
        match self {
            Self::LoadFailure(_) => "plugin_load_failure",
            Self::MissingInput(_) => "plugin_missing_input",
            Self::ConfigRejected(_) => "plugin_config_rejected",
            Self::OutputRejected(_) => "plugin_output_rejected",
            Self::Cancelled(_) => "plugin_cancelled",
            Self::ExecutionTimeout(_) => "plugin_execution_timeout",
            Self::WorkerCrashed(_) => "plugin_worker_crashed",
            Self::Execution(_) => "plugin_execution_error",
        }
    }
}

// ============================================================================
// SECTION: Plugin Trait
// ============================================================================

/// The abstract plugin contract implemented by builtins and subprocess
/// proxies.
pub trait TapePlugin: Send + Sync {
    /// Returns the static descriptor.
    fn descriptor(&self) -> &PluginDescriptor;

    /// Executes one call.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] on execution failures; outputs that fail
    /// schema validation are rejected by the registry, not the plugin.
    fn invoke(&self, ctx: &PluginContext, inputs: &PluginInputs)
    -> Result<PluginOutput, PluginError>;
}
