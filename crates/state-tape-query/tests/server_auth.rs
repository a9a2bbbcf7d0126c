// state-tape-query/tests/server_auth.rs
// ============================================================================
// Module: Server Auth Tests
// Description: Bearer verification and loopback-bind enforcement.
// ============================================================================
//! ## Overview
//! Validates constant-time bearer verification and that the server refuses
//! non-loopback bind addresses outright.

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

use std::sync::Arc;

use state_tape_config::PolicyConfig;
use state_tape_core::RecordStore;
use state_tape_index::IndexSet;
use state_tape_query::ApiContext;
use state_tape_query::PolicyGate;
use state_tape_query::QueryEngine;
use state_tape_query::ServeError;
use state_tape_query::TokenIssuer;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Bearer Verification
// ============================================================================

/// Tests the issuer accepts only its own token with the Bearer scheme.
#[test]
fn test_bearer_verification() {
    let issuer = TokenIssuer::with_token("stt-fixed-token");
    assert!(issuer.verify_bearer(Some("Bearer stt-fixed-token")));
    assert!(!issuer.verify_bearer(Some("Bearer wrong")));
    assert!(!issuer.verify_bearer(Some("stt-fixed-token")));
    assert!(!issuer.verify_bearer(None));
}

/// Tests two issuers mint distinct process tokens.
#[test]
fn test_tokens_are_process_scoped() {
    let a = TokenIssuer::new();
    let b = TokenIssuer::new();
    assert!(a.token().starts_with("stt-"));
    // Distinct instants produce distinct tokens.
    assert_ne!(a.token(), b.token());
}

// ============================================================================
// SECTION: Bind Enforcement
// ============================================================================

/// Tests non-loopback binds are refused before any socket opens.
#[tokio::test]
async fn test_non_loopback_bind_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    let arc: Arc<dyn RecordStore> = Arc::new(store);
    let index = IndexSet::rebuild(arc.as_ref(), false).unwrap();
    let engine = QueryEngine::new(index, arc, PolicyGate::new(PolicyConfig::default()));
    let context = Arc::new(ApiContext {
        engine: Arc::new(engine),
        issuer: TokenIssuer::new(),
        max_citations: 8,
        popup_timeout_ms: 1_000,
    });
    let result =
        state_tape_query::serve("0.0.0.0:8743".parse().unwrap(), context).await;
    assert!(matches!(result, Err(ServeError::NonLoopbackBind(_))));
}
