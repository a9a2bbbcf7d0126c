// state-tape-plugins/src/lib.rs
// ============================================================================
// Module: State Tape Plugins Library
// Description: Public API surface for the plugin runtime.
// Purpose: Expose manifests, the plugin contract, registry, and hosts.
// Dependencies: crate::{manifest, plugin, registry, schema, subprocess}
// ============================================================================

//! ## Overview
//! The plugin runtime: manifest + lockfile admission, the deterministic
//! plugin call contract, schema validation, canonical output sorting, the
//! audited registry, and the sandboxed subprocess host.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod schema;
pub mod subprocess;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use manifest::Capability;
pub use manifest::Entrypoint;
pub use manifest::LockEntry;
pub use manifest::ManifestError;
pub use manifest::Permission;
pub use manifest::PluginLockfile;
pub use manifest::PluginManifest;
pub use plugin::CancelToken;
pub use plugin::Diagnostic;
pub use plugin::PluginContext;
pub use plugin::PluginDescriptor;
pub use plugin::PluginError;
pub use plugin::PluginInputs;
pub use plugin::PluginMetrics;
pub use plugin::PluginOutput;
pub use plugin::TapePlugin;
pub use registry::AdmissionPolicy;
pub use registry::PluginRegistry;
pub use schema::compile_schema;
pub use schema::sort_items;
pub use subprocess::SubprocessPlugin;
pub use subprocess::WorkerPool;
