// state-tape-store-sqlite/src/lib.rs
// ============================================================================
// Module: State Tape SQLite Store Library
// Description: Public API surface for the SQLite-backed stores.
// Purpose: Expose the record store, blob store, and audit store.
// Dependencies: crate::{store, blobs, audit_store}
// ============================================================================

//! ## Overview
//! SQLite-backed persistence for State Tape: the content-addressed metadata
//! store with projection tables, the sharded media blob directory with TTL
//! metadata, and the isolated append-only audit store.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit_store;
pub mod blobs;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit_store::AuditStoreError;
pub use audit_store::SqliteAuditStore;
pub use blobs::FileBlobStore;
pub use store::MAX_ENVELOPE_BYTES;
pub use store::SCHEMA_VERSION;
pub use store::SqliteRecordStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
