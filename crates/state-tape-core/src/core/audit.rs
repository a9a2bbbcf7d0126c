// state-tape-core/src/core/audit.rs
// ============================================================================
// Module: State Tape Audit Model
// Description: Durable per-call audit rows and operational audit events.
// Purpose: Emit structured, append-only audit data without hard dependencies.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Two audit surfaces exist. Durable [`AuditRow`] records are written once
//! per plugin call into the dedicated audit store and never deleted.
//! Operational [`AuditEvent`] payloads are serialized as JSON lines into a
//! pluggable [`AuditSink`] (stderr, file, or noop) so deployments can route
//! events to their preferred logging pipeline without redesign.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::PluginId;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Audit Rows
// ============================================================================

/// Durable audit row written once per plugin call.
///
/// # Invariants
/// - Append-only; rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    /// Call timestamp (unix epoch milliseconds).
    pub timestamp: Timestamp,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Plugin identifier.
    pub plugin_id: PluginId,
    /// Capability exercised by the call.
    pub capability: String,
    /// Invoked method name.
    pub method: String,
    /// True when the call succeeded.
    pub success: bool,
    /// Normalized error label when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration in nanoseconds.
    pub duration_ns: u64,
    /// Input item count.
    pub rows_in: u64,
    /// Output item count.
    pub rows_out: u64,
    /// Resident set size in bytes at completion.
    pub rss_bytes: u64,
    /// Virtual memory size in bytes at completion.
    pub vms_bytes: u64,
    /// Canonical hash of the call inputs.
    pub input_hash: HashDigest,
    /// Canonical hash of the call outputs.
    pub output_hash: HashDigest,
    /// Canonical hash of referenced data artifacts.
    pub data_hash: HashDigest,
    /// Hash of the plugin code (from the lockfile).
    pub code_hash: HashDigest,
    /// Canonical hash of the plugin settings.
    pub settings_hash: HashDigest,
    /// Serialized payload size in bytes.
    pub payload_bytes: u64,
}

// ============================================================================
// SECTION: Operational Events
// ============================================================================

/// Operational audit event serialized as one JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Stable event identifier (dotted path, e.g.
    /// `system.ingest.handoff.completed`).
    pub event: &'static str,
    /// Event timestamp (unix epoch milliseconds).
    pub timestamp_ms: Timestamp,
    /// Owning run identifier when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Normalized error kind label when the event reports a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Structured event details.
    pub details: Value,
}

impl AuditEvent {
    /// Creates an event with empty details.
    #[must_use]
    pub fn new(event: &'static str, timestamp_ms: Timestamp) -> Self {
        Self { event, timestamp_ms, run_id: None, error_kind: None, details: Value::Null }
    }

    /// Returns a copy with the run identifier set.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Returns a copy with the error kind label set.
    #[must_use]
    pub fn with_error_kind(mut self, kind: &'static str) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Returns a copy with structured details attached.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for operational audit events.
pub trait AuditSink: Send + Sync {
    /// Emits one audit event. Sink failures are reported but must never
    /// abort the operation being audited.
    fn emit(&self, event: &AuditEvent);
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: &AuditEvent) {}
}

/// Sink that writes JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{line}");
        }
    }
}

/// Sink that appends JSON lines to a file (the `journal.ndjson` surface).
pub struct FileAuditSink {
    /// Append handle guarded for cross-thread emission.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens (or creates) the journal file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl AuditSink for FileAuditSink {
    fn emit(&self, event: &AuditEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

// ============================================================================
// SECTION: Memory Probe
// ============================================================================

/// Best-effort `(rss_bytes, vms_bytes)` reading for audit rows.
///
/// Reads `/proc/self/status` on Linux; returns zeros elsewhere so the row
/// shape stays stable without a platform-metrics dependency.
#[must_use]
pub fn memory_probe() -> (u64, u64) {
    #[cfg(target_os = "linux")]
    {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return (0, 0);
        };
        let mut rss = 0_u64;
        let mut vms = 0_u64;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                rss = parse_kib(rest);
            } else if let Some(rest) = line.strip_prefix("VmSize:") {
                vms = parse_kib(rest);
            }
        }
        (rss, vms)
    }
    #[cfg(not(target_os = "linux"))]
    {
        (0, 0)
    }
}

/// Parses a `/proc` kibibyte field into bytes.
#[cfg(target_os = "linux")]
fn parse_kib(field: &str) -> u64 {
    field
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse::<u64>()
        .map_or(0, |kib| kib.saturating_mul(1024))
}
