// state-tape-store-sqlite/tests/blob_store.rs
// ============================================================================
// Module: Blob Store Tests
// Description: Tests for content-addressed blobs and TTL enforcement.
// ============================================================================
//! ## Overview
//! Validates blob sharding, content verification, TTL refusal, and the sweep
//! pass.

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

use state_tape_core::BlobStore;
use state_tape_core::StoreError;
use state_tape_core::Timestamp;
use state_tape_store_sqlite::FileBlobStore;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Opens a blob store in a fresh temporary data root.
fn open_blobs() -> (tempfile::TempDir, FileBlobStore) {
    let dir = tempfile::tempdir().unwrap();
    let meta = SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(dir.path())).unwrap();
    let blobs = FileBlobStore::open(dir.path(), meta).unwrap();
    (dir, blobs)
}

/// Returns a TTL far in the future.
fn far_future() -> Timestamp {
    Timestamp::from_millis(i64::MAX / 2)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Tests blobs round-trip and land in the sharded layout.
#[test]
fn test_blob_roundtrip_and_sharding() {
    let (dir, blobs) = open_blobs();
    let media_id = blobs.put_blob(b"pixels", far_future()).unwrap();
    let bytes = blobs.get_blob(&media_id).unwrap();
    assert_eq!(bytes, b"pixels");
    let expected = dir
        .path()
        .join("media")
        .join(&media_id.as_str()[..2])
        .join(format!("{}.blob", media_id.as_str()));
    assert!(expected.exists());
}

/// Tests an expired TTL refuses reads.
#[test]
fn test_expired_blob_refused() {
    let (_dir, blobs) = open_blobs();
    let media_id = blobs.put_blob(b"old pixels", Timestamp::from_millis(1)).unwrap();
    let result = blobs.get_blob(&media_id);
    assert!(matches!(result, Err(StoreError::TtlExpired(_))));
}

/// Tests the sweep deletes only expired blobs.
#[test]
fn test_sweep_deletes_only_expired() {
    let (_dir, blobs) = open_blobs();
    let expired = blobs.put_blob(b"expired", Timestamp::from_millis(1)).unwrap();
    let live = blobs.put_blob(b"live", far_future()).unwrap();
    let swept = blobs.sweep_expired(Timestamp::from_millis(1_000)).unwrap();
    assert_eq!(swept, 1);
    assert!(!blobs.blob_path(&expired).exists());
    assert!(blobs.blob_path(&live).exists());
    assert_eq!(blobs.get_blob(&live).unwrap(), b"live");
}
