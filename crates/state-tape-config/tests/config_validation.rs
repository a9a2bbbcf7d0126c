// state-tape-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Tests for fail-closed configuration loading.
// ============================================================================
//! ## Overview
//! Validates defaults, limit enforcement, loopback binding, and rejection of
//! unknown options.

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

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use state_tape_config::ConfigError;
use state_tape_config::StateTapeConfig;
use state_tape_config::WindowBoundaryPreference;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Tests default construction passes validation.
#[test]
fn test_defaults_are_valid() {
    let config = StateTapeConfig::with_data_dir(PathBuf::from("/tmp/state-tape"));
    assert!(config.validate().is_ok());
    assert_eq!(config.extraction.span_window_ms, 5_000);
    assert_eq!(config.storage.media_ttl_days, 60);
    assert_eq!(
        config.extraction.window_boundary_preference,
        WindowBoundaryPreference::AppChange
    );
    assert_eq!(config.scheduler.foreground_ceiling, 0);
    assert!(!config.policy.can_show_raw_media);
    assert!(!config.policy.can_export_text);
}

/// Tests the burn-down exit threshold applies the 10% hysteresis.
#[test]
fn test_burn_down_exit_hysteresis() {
    let config = StateTapeConfig::with_data_dir(PathBuf::from("/tmp/state-tape"));
    let exit = config.burn_down_exit_hours();
    assert!((exit - 129.6).abs() < 1e-9);
}

// ============================================================================
// SECTION: Limit Enforcement
// ============================================================================

/// Tests span windows outside 3–10 s are rejected.
#[test]
fn test_span_window_bounds() {
    let mut config = StateTapeConfig::with_data_dir(PathBuf::from("/tmp/state-tape"));
    config.extraction.span_window_ms = 2_000;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    config.extraction.span_window_ms = 11_000;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    config.extraction.span_window_ms = 10_000;
    assert!(config.validate().is_ok());
}

/// Tests non-loopback binds are refused.
#[test]
fn test_non_loopback_bind_refused() {
    let mut config = StateTapeConfig::with_data_dir(PathBuf::from("/tmp/state-tape"));
    config.server.bind_addr = "0.0.0.0:8743".parse::<SocketAddr>().unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

/// Tests the pHash hysteresis ordering is enforced.
#[test]
fn test_phash_distance_ordering() {
    let mut config = StateTapeConfig::with_data_dir(PathBuf::from("/tmp/state-tape"));
    config.extraction.phash_stable_distance = 12;
    config.extraction.phash_boundary_distance = 12;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

// ============================================================================
// SECTION: File Loading
// ============================================================================

/// Tests a minimal TOML file loads with defaults applied.
#[test]
fn test_load_minimal_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state-tape.toml");
    fs::write(&path, "[storage]\ndata_dir = \"/tmp/state-tape\"\n").unwrap();
    let config = StateTapeConfig::load(Some(&path)).unwrap();
    assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/state-tape"));
    assert_eq!(config.server.max_citations, 8);
}

/// Tests unknown options are rejected at load time.
#[test]
fn test_unknown_option_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state-tape.toml");
    fs::write(
        &path,
        "[storage]\ndata_dir = \"/tmp/state-tape\"\nshadow_mode = true\n",
    )
    .unwrap();
    assert!(matches!(StateTapeConfig::load(Some(&path)), Err(ConfigError::Parse(_))));
}
