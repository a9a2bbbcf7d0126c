// state-tape-extract/src/backends.rs
// ============================================================================
// Module: Deterministic Model Backends
// Description: Scripted OCR/VLM backends honoring the invocation contract.
// Purpose: Provide replayable backends for tests and idle-gate verification.
// Dependencies: state-tape-core, serde_json
// ============================================================================

//! ## Overview
//! Real deployments point the pipeline at local model endpoints; this module
//! provides the deterministic stand-ins used by tests and safety checks.
//! Scripted backends answer from a fixed table keyed by patch geometry and
//! count every invocation, which is how the idle-gate and read-only-query
//! properties are observed. All outputs are pre-sorted per the deterministic
//! invocation contract.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;
use serde_json::json;
use state_tape_core::BackendError;
use state_tape_core::ImagePatch;
use state_tape_core::OcrBackend;
use state_tape_core::RawOcrToken;
use state_tape_core::VlmBackend;

// ============================================================================
// SECTION: Scripted OCR
// ============================================================================

/// OCR backend answering from a scripted table keyed by patch origin.
pub struct ScriptedOcrBackend {
    /// Tokens keyed by `(origin_x, origin_y)`.
    script: Mutex<BTreeMap<(i32, i32), Vec<RawOcrToken>>>,
    /// Invocation counter.
    calls: AtomicU64,
}

impl ScriptedOcrBackend {
    /// Creates an empty scripted backend.
    #[must_use]
    pub fn new() -> Self {
        Self { script: Mutex::new(BTreeMap::new()), calls: AtomicU64::new(0) }
    }

    /// Scripts the tokens returned for a patch at the given origin.
    pub fn script_patch(&self, origin_x: i32, origin_y: i32, tokens: Vec<RawOcrToken>) {
        if let Ok(mut script) = self.script.lock() {
            script.insert((origin_x, origin_y), tokens);
        }
    }

    /// Returns the number of recognize calls made so far.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedOcrBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for ScriptedOcrBackend {
    fn model_id(&self) -> &str {
        "scripted-ocr"
    }

    fn model_version(&self) -> &str {
        "1.0.0"
    }

    fn recognize(&self, patch: &ImagePatch) -> Result<Vec<RawOcrToken>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .script
            .lock()
            .map_err(|_| BackendError::Backend("script mutex poisoned".to_string()))?;
        let mut tokens = script
            .get(&(patch.origin_x, patch.origin_y))
            .cloned()
            .unwrap_or_default();
        tokens.sort_by(|a, b| {
            (a.bbox.y1(), a.bbox.x1(), a.text.as_str()).cmp(&(
                b.bbox.y1(),
                b.bbox.x1(),
                b.text.as_str(),
            ))
        });
        Ok(tokens)
    }
}

// ============================================================================
// SECTION: Scripted VLM
// ============================================================================

/// VLM backend returning one scripted element payload for every frame.
pub struct ScriptedVlmBackend {
    /// Scripted JSON output.
    output: Mutex<Value>,
    /// Invocation counter.
    calls: AtomicU64,
}

impl ScriptedVlmBackend {
    /// Creates a backend that reports no elements.
    #[must_use]
    pub fn new() -> Self {
        Self { output: Mutex::new(json!({ "elements": [] })), calls: AtomicU64::new(0) }
    }

    /// Scripts the JSON payload returned for every parse.
    pub fn script_output(&self, output: Value) {
        if let Ok(mut slot) = self.output.lock() {
            *slot = output;
        }
    }

    /// Returns the number of parse calls made so far.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedVlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VlmBackend for ScriptedVlmBackend {
    fn model_id(&self) -> &str {
        "scripted-vlm"
    }

    fn model_version(&self) -> &str {
        "1.0.0"
    }

    fn parse_elements(&self, _image: &ImagePatch) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output
            .lock()
            .map(|output| output.clone())
            .map_err(|_| BackendError::Backend("script mutex poisoned".to_string()))
    }
}
