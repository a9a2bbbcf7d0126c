// state-tape-store-sqlite/tests/migration_fixture.rs
// ============================================================================
// Module: Migration Fixture Tests
// Description: Golden fixture test for forward-only schema migrations.
// ============================================================================
//! ## Overview
//! Builds a v1 database from the embedded fixture SQL, opens it through the
//! store (triggering the migration), and asserts the migrated store matches
//! the logical dump of a freshly created current-version store holding the
//! same records (timestamps excluded, as documented).

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

use rusqlite::Connection;
use rusqlite::params;
use state_tape_store_sqlite::SCHEMA_VERSION;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixture SQL
// ============================================================================

/// Schema of the v1 release (projection without `session_id`).
const PRE_FIXTURE_SQL: &str = "
CREATE TABLE store_meta (version INTEGER NOT NULL);
INSERT INTO store_meta (version) VALUES (1);
CREATE TABLE records (
    artifact_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    created_ts_ms INTEGER NOT NULL,
    envelope_json BLOB NOT NULL,
    envelope_hash TEXT NOT NULL
);
CREATE TABLE metadata_projection (
    artifact_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    search_text TEXT
);
CREATE INDEX idx_projection_kind_ts ON metadata_projection (kind, ts_ms);
CREATE INDEX idx_projection_ts ON metadata_projection (ts_ms);
CREATE TABLE blobs (
    media_id TEXT PRIMARY KEY,
    byte_len INTEGER NOT NULL,
    ttl_expires_at_ms INTEGER NOT NULL,
    created_ts_ms INTEGER NOT NULL
);
CREATE TABLE quarantine (
    artifact_id TEXT PRIMARY KEY,
    reason TEXT NOT NULL,
    envelope_json BLOB NOT NULL,
    quarantined_ts_ms INTEGER NOT NULL
);
";

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the logical projection dump `(artifact_id, kind, ts_ms,
/// session_id)` ordered by artifact.
fn projection_dump(path: &std::path::Path) -> Vec<(String, String, i64, Option<String>)> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT artifact_id, kind, ts_ms, session_id FROM metadata_projection ORDER BY \
             artifact_id",
        )
        .unwrap();
    let rows = stmt
        .query_map(params![], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap();
    rows.map(Result::unwrap).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Tests a v1 database migrates forward and reports the current version.
#[test]
fn test_v1_database_migrates_forward() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metadata.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(PRE_FIXTURE_SQL).unwrap();
        conn.execute(
            "INSERT INTO metadata_projection (artifact_id, kind, ts_ms, search_text) VALUES \
             ('st1-aaaa', 'frame', 1000, NULL)",
            params![],
        )
        .unwrap();
    }
    let config = SqliteStoreConfig { path: path.clone(), busy_timeout_ms: 1_000 };
    let _store = SqliteRecordStore::open(&config).unwrap();
    let conn = Connection::open(&path).unwrap();
    let version: i64 =
        conn.query_row("SELECT version FROM store_meta", params![], |row| row.get(0)).unwrap();
    assert_eq!(version, SCHEMA_VERSION);
    let dump = projection_dump(&path);
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0].0, "st1-aaaa");
    assert_eq!(dump[0].3, None);
}

/// Tests the migrated projection equals a freshly created store's projection
/// once reconciled from the same records.
#[test]
fn test_migrated_store_matches_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let migrated_path = dir.path().join("migrated").join("metadata.db");
    std::fs::create_dir_all(migrated_path.parent().unwrap()).unwrap();
    {
        let conn = Connection::open(&migrated_path).unwrap();
        conn.execute_batch(PRE_FIXTURE_SQL).unwrap();
    }
    let migrated = SqliteRecordStore::open(&SqliteStoreConfig {
        path: migrated_path.clone(),
        busy_timeout_ms: 1_000,
    })
    .unwrap();
    migrated.reconcile_projection().unwrap();

    let fresh_path = dir.path().join("fresh").join("metadata.db");
    let _fresh = SqliteRecordStore::open(&SqliteStoreConfig {
        path: fresh_path.clone(),
        busy_timeout_ms: 1_000,
    })
    .unwrap();

    assert_eq!(projection_dump(&migrated_path), projection_dump(&fresh_path));
}

/// Tests an unknown future schema version is refused.
#[test]
fn test_future_schema_version_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metadata.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE store_meta (version INTEGER NOT NULL); INSERT INTO store_meta \
             (version) VALUES (99);",
        )
        .unwrap();
    }
    let config = SqliteStoreConfig { path, busy_timeout_ms: 1_000 };
    assert!(SqliteRecordStore::open(&config).is_err());
}
