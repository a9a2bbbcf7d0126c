// state-tape-config/src/lib.rs
// ============================================================================
// Module: State Tape Config Library
// Description: Public API surface for State Tape configuration.
// Purpose: Expose the closed configuration record and loader.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Strict, fail-closed configuration for the State Tape pipeline. All
//! records are closed enumerations; unknown options are rejected at load
//! time.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CONFIG_DIR_ENV_VAR;
pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DATA_DIR_ENV_VAR;
pub use config::DEFAULT_MAX_CITATIONS;
pub use config::DEFAULT_MEDIA_TTL_DAYS;
pub use config::DEFAULT_SPAN_WINDOW_MS;
pub use config::ExtractionConfig;
pub use config::IndexConfig;
pub use config::MAX_MAX_CITATIONS;
pub use config::PluginAdmissionConfig;
pub use config::PolicyConfig;
pub use config::SchedulerConfig;
pub use config::ServerConfig;
pub use config::StateTapeConfig;
pub use config::StorageConfig;
pub use config::WindowBoundaryPreference;
