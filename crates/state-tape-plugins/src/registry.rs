// state-tape-plugins/src/registry.rs
// ============================================================================
// Module: Plugin Registry
// Description: Admission, invocation, auditing, and demotion of plugins.
// Purpose: Host admitted plugins and enforce the deterministic call contract.
// Dependencies: state-tape-core, crate::{manifest, plugin, schema}
// ============================================================================

//! ## Overview
//! The registry admits a plugin only when it is allowlisted, its manifest and
//! code hashes match the lockfile, and its declared capability satisfies the
//! orchestrator's needs. Every invocation validates configuration and output
//! schemas, sorts items by the documented keys, writes one durable audit row,
//! and demotes the plugin for the remainder of the run after a crash.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use state_tape_core::AuditRow;
use state_tape_core::AuditSink;
use state_tape_core::AuditStore;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::HashDigest;
use state_tape_core::PluginId;
use state_tape_core::hash_bytes;
use state_tape_core::hash_canonical_json;
use state_tape_core::memory_probe;

use crate::manifest::PluginLockfile;
use crate::manifest::PluginManifest;
use crate::plugin::PluginContext;
use crate::plugin::PluginError;
use crate::plugin::PluginInputs;
use crate::plugin::PluginOutput;
use crate::plugin::TapePlugin;
use crate::schema::compile_schema;
use crate::schema::sort_items;
use crate::schema::validate_config;
use crate::schema::validate_output_items;

// ============================================================================
// SECTION: Admission Policy
// ============================================================================

/// Admission policy for plugin loading.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    /// Allowlisted plugin identifiers; a plugin outside the list is refused.
    pub allowlist: BTreeSet<String>,
    /// Lockfile pinning manifest and code hashes.
    pub lockfile: PluginLockfile,
}

impl AdmissionPolicy {
    /// Verifies a manifest against the allowlist and lockfile.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoadFailure`] naming the admission failure.
    pub fn admit(&self, manifest: &PluginManifest) -> Result<(), PluginError> {
        if !self.allowlist.contains(manifest.id.as_str()) {
            return Err(PluginError::LoadFailure(format!(
                "plugin not allowlisted: {}",
                manifest.id
            )));
        }
        self.lockfile
            .verify(manifest)
            .map_err(|err| PluginError::LoadFailure(err.to_string()))
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// One admitted plugin with its compiled validators.
struct HostedPlugin {
    /// Verified manifest.
    manifest: PluginManifest,
    /// Plugin implementation (builtin or subprocess proxy).
    plugin: Box<dyn TapePlugin>,
    /// Compiled config validator.
    config_validator: jsonschema::Validator,
    /// Compiled output validator.
    output_validator: jsonschema::Validator,
}

/// Plugin registry with admission enforcement and per-run demotion.
pub struct PluginRegistry {
    /// Hosted plugins keyed by identifier.
    plugins: BTreeMap<String, HostedPlugin>,
    /// Durable audit store receiving one row per call.
    audit: Arc<dyn AuditStore>,
    /// Plugins demoted for the current run after a crash.
    demoted: Mutex<BTreeSet<String>>,
    /// Operational sink receiving template-mapping diff events.
    sink: Option<Arc<dyn AuditSink>>,
    /// Last observed canonical config snapshot per plugin.
    config_snapshots: Mutex<BTreeMap<String, String>>,
}

impl PluginRegistry {
    /// Creates an empty registry writing audit rows to the given store.
    #[must_use]
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self {
            plugins: BTreeMap::new(),
            audit,
            demoted: Mutex::new(BTreeSet::new()),
            sink: None,
            config_snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Attaches an operational sink for template-mapping diff events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Admits and registers one plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoadFailure`] when admission or schema
    /// compilation fails; the failure is the caller's to audit.
    pub fn register(
        &mut self,
        policy: &AdmissionPolicy,
        manifest: PluginManifest,
        plugin: Box<dyn TapePlugin>,
    ) -> Result<(), PluginError> {
        policy.admit(&manifest)?;
        let descriptor = plugin.descriptor();
        if descriptor.id != manifest.id {
            return Err(PluginError::LoadFailure(format!(
                "descriptor id {} does not match manifest id {}",
                descriptor.id, manifest.id
            )));
        }
        let config_validator = compile_schema(&descriptor.config_schema)?;
        let output_validator = compile_schema(&descriptor.output_schema)?;
        self.plugins.insert(
            manifest.id.as_str().to_string(),
            HostedPlugin { manifest, plugin, config_validator, output_validator },
        );
        Ok(())
    }

    /// Returns true when the plugin is registered and not demoted.
    #[must_use]
    pub fn is_available(&self, plugin_id: &PluginId) -> bool {
        self.plugins.contains_key(plugin_id.as_str()) && !self.is_demoted(plugin_id)
    }

    /// Returns true when the plugin was demoted for the current run.
    #[must_use]
    pub fn is_demoted(&self, plugin_id: &PluginId) -> bool {
        self.demoted
            .lock()
            .map(|set| set.contains(plugin_id.as_str()))
            .unwrap_or(true)
    }

    /// Clears demotions at the start of a new run.
    pub fn reset_demotions(&self) {
        if let Ok(mut set) = self.demoted.lock() {
            set.clear();
        }
    }

    /// Returns the registered plugin identifiers in order.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<PluginId> {
        self.plugins.keys().map(|key| PluginId::new(key.clone())).collect()
    }

    /// Returns the descriptor for a registered plugin.
    #[must_use]
    pub fn descriptor_for(&self, plugin_id: &PluginId) -> Option<&crate::plugin::PluginDescriptor> {
        self.plugins.get(plugin_id.as_str()).map(|hosted| hosted.plugin.descriptor())
    }

    /// Invokes one plugin with full contract enforcement and audit.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] on demotion, config rejection, execution
    /// failure, or output rejection. Every outcome writes one audit row.
    pub fn invoke(
        &self,
        plugin_id: &PluginId,
        ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let Some(hosted) = self.plugins.get(plugin_id.as_str()) else {
            return Err(PluginError::LoadFailure(format!("plugin not registered: {plugin_id}")));
        };
        if self.is_demoted(plugin_id) {
            return Err(PluginError::LoadFailure(format!(
                "plugin demoted for this run: {plugin_id}"
            )));
        }
        if ctx.cancel.is_cancelled() {
            return Err(PluginError::Cancelled(plugin_id.as_str().to_string()));
        }
        self.record_mapping_diff(plugin_id, &ctx.config, ctx.ts_ms);
        let started = Instant::now();
        let result = validate_config(&hosted.config_validator, &ctx.config)
            .and_then(|()| hosted.plugin.invoke(ctx, inputs));
        let duration_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let result = result.and_then(|mut output| {
            validate_output_items(&hosted.output_validator, &output.items)?;
            sort_items(&mut output.items, &hosted.plugin.descriptor().sort_key_pointers);
            Ok(output)
        });
        if matches!(result, Err(PluginError::WorkerCrashed(_))) {
            if let Ok(mut set) = self.demoted.lock() {
                set.insert(plugin_id.as_str().to_string());
            }
        }
        self.write_audit_row(hosted, ctx, inputs, &result, duration_ns);
        result
    }

    /// Records a unified diff when a plugin's mapping/config snapshot moved
    /// since the last observed call. Snapshots are canonical JSON so the
    /// diff source is stable across runs.
    fn record_mapping_diff(
        &self,
        plugin_id: &PluginId,
        config: &serde_json::Value,
        ts_ms: state_tape_core::Timestamp,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        let Ok(snapshot_bytes) = state_tape_core::canonical_json_bytes(config) else {
            return;
        };
        let snapshot = String::from_utf8_lossy(&snapshot_bytes).to_string();
        let previous = {
            let Ok(mut snapshots) = self.config_snapshots.lock() else {
                return;
            };
            snapshots.insert(plugin_id.as_str().to_string(), snapshot.clone())
        };
        let Some(previous) = previous else {
            return;
        };
        if previous == snapshot {
            return;
        }
        let diff = similar::TextDiff::from_lines(&previous, &snapshot)
            .unified_diff()
            .header("previous", "current")
            .to_string();
        sink.emit(
            &state_tape_core::AuditEvent::new("system.plugin.mapping_changed", ts_ms)
                .with_details(serde_json::json!({
                    "plugin_id": plugin_id.as_str(),
                    "unified_diff": diff,
                })),
        );
    }

    /// Writes the per-call audit row; sink failures never abort the call.
    fn write_audit_row(
        &self,
        hosted: &HostedPlugin,
        ctx: &PluginContext,
        inputs: &PluginInputs,
        result: &Result<PluginOutput, PluginError>,
        duration_ns: u64,
    ) {
        let (rss_bytes, vms_bytes) = memory_probe();
        let input_hash = hash_json(&inputs.values);
        let settings_hash = hash_json(&ctx.config);
        let (success, error, rows_in, rows_out, output_hash, payload_bytes) = match result {
            Ok(output) => {
                let payload_bytes = output
                    .items
                    .iter()
                    .map(|item| item.to_string().len() as u64)
                    .sum::<u64>();
                (
                    true,
                    None,
                    output.metrics.rows_in,
                    output.metrics.rows_out,
                    hash_json(&output.items),
                    payload_bytes,
                )
            }
            Err(err) => (
                false,
                Some(err.audit_label().to_string()),
                0,
                0,
                hash_bytes(DEFAULT_HASH_ALGORITHM, b""),
                0,
            ),
        };
        let capability = hosted
            .manifest
            .capabilities
            .iter()
            .next()
            .map_or("unknown", |capability| capability.label());
        let row = AuditRow {
            timestamp: ctx.ts_ms,
            run_id: ctx.run_id.clone(),
            plugin_id: hosted.manifest.id.clone(),
            capability: capability.to_string(),
            method: "invoke".to_string(),
            success,
            error,
            duration_ns,
            rows_in,
            rows_out,
            rss_bytes,
            vms_bytes,
            input_hash: input_hash.clone(),
            output_hash,
            data_hash: input_hash,
            code_hash: hosted.manifest.code_sha256.clone(),
            settings_hash,
            payload_bytes,
        };
        let _ = self.audit.append_row(&row);
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Hashes any serializable value, falling back to the empty hash on failure.
fn hash_json<T: serde::Serialize>(value: &T) -> HashDigest {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)
        .unwrap_or_else(|_| hash_bytes(DEFAULT_HASH_ALGORITHM, b""))
}
