// state-tape-store-sqlite/src/audit_store.rs
// ============================================================================
// Module: SQLite Audit Store
// Description: Append-only per-call audit rows in a dedicated database.
// Purpose: Isolate heavy append traffic from the metadata store.
// Dependencies: state-tape-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! The audit store lives in its own `audit.db` so the per-call append stream
//! never contends with metadata transactions. Rows are append-only and never
//! deleted; each row is written in its own transaction so a crash between
//! calls cannot leave a partial row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params;
use state_tape_core::AuditRow;
use state_tape_core::AuditStore;
use state_tape_core::RunId;
use state_tape_core::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the audit store.
const AUDIT_SCHEMA_VERSION: i64 = 1;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Audit store errors.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    /// Engine error.
    #[error("audit store db error: {0}")]
    Db(String),
    /// Invalid stored data.
    #[error("audit store invalid data: {0}")]
    Invalid(String),
    /// Schema version mismatch.
    #[error("audit store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<AuditStoreError> for StoreError {
    fn from(error: AuditStoreError) -> Self {
        match error {
            AuditStoreError::Db(message) => Self::Db(message),
            AuditStoreError::Invalid(message) | AuditStoreError::VersionMismatch(message) => {
                Self::Invalid(message)
            }
        }
    }
}

// ============================================================================
// SECTION: Audit Store
// ============================================================================

/// `SQLite`-backed append-only audit store.
#[derive(Clone)]
pub struct SqliteAuditStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Opens (or creates) the audit store at the conventional location
    /// `<data_root>/audit.db`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditStoreError`] when the database cannot be opened.
    pub fn open_at_root(data_root: &Path) -> Result<Self, AuditStoreError> {
        Self::open(&data_root.join("audit.db"))
    }

    /// Opens (or creates) the audit store at an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`AuditStoreError`] when the database cannot be opened.
    pub fn open(path: &PathBuf) -> Result<Self, AuditStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| AuditStoreError::Db(err.to_string()))?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection = Connection::open_with_flags(path, flags)
            .map_err(|err| AuditStoreError::Db(err.to_string()))?;
        connection
            .execute_batch("PRAGMA journal_mode = wal; PRAGMA synchronous = normal;")
            .map_err(|err| AuditStoreError::Db(err.to_string()))?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AuditStoreError> {
        self.connection.lock().map_err(|_| AuditStoreError::Db("mutex poisoned".to_string()))
    }

    /// Counts rows whose event method matches the given label.
    ///
    /// # Errors
    ///
    /// Returns [`AuditStoreError`] on engine failures.
    pub fn count_by_method(&self, method: &str) -> Result<u64, AuditStoreError> {
        let guard = self.lock()?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM audit_rows WHERE method = ?1",
                params![method],
                |row| row.get(0),
            )
            .map_err(|err| AuditStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl AuditStore for SqliteAuditStore {
    fn append_row(&self, row: &AuditRow) -> Result<(), StoreError> {
        let json = serde_json::to_vec(row).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO audit_rows (ts_ms, run_id, plugin_id, capability, method, success, \
                 error, duration_ns, rows_in, rows_out, payload_bytes, row_json) VALUES (?1, ?2, \
                 ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.timestamp.millis(),
                    row.run_id.as_str(),
                    row.plugin_id.as_str(),
                    row.capability,
                    row.method,
                    i64::from(row.success),
                    row.error.as_deref(),
                    i64::try_from(row.duration_ns).unwrap_or(i64::MAX),
                    i64::try_from(row.rows_in).unwrap_or(i64::MAX),
                    i64::try_from(row.rows_out).unwrap_or(i64::MAX),
                    i64::try_from(row.payload_bytes).unwrap_or(i64::MAX),
                    json
                ],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    fn rows_for_run(&self, run_id: &RunId) -> Result<Vec<AuditRow>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut stmt = guard
            .prepare("SELECT row_json FROM audit_rows WHERE run_id = ?1 ORDER BY ts_ms, id")
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let json = row.map_err(|err| StoreError::Db(err.to_string()))?;
            let parsed: AuditRow = serde_json::from_slice(&json)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            out.push(parsed);
        }
        drop(stmt);
        drop(guard);
        Ok(out)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Initializes the audit schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), AuditStoreError> {
    let tx = connection.transaction().map_err(|err| AuditStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS audit_meta (version INTEGER NOT NULL);")
        .map_err(|err| AuditStoreError::Db(err.to_string()))?;
    let version: Option<i64> = {
        use rusqlite::OptionalExtension;
        tx.query_row("SELECT version FROM audit_meta LIMIT 1", params![], |row| row.get(0))
            .optional()
            .map_err(|err| AuditStoreError::Db(err.to_string()))?
    };
    match version {
        None => {
            tx.execute(
                "INSERT INTO audit_meta (version) VALUES (?1)",
                params![AUDIT_SCHEMA_VERSION],
            )
            .map_err(|err| AuditStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS audit_rows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ts_ms INTEGER NOT NULL,
                    run_id TEXT NOT NULL,
                    plugin_id TEXT NOT NULL,
                    capability TEXT NOT NULL,
                    method TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    error TEXT,
                    duration_ns INTEGER NOT NULL,
                    rows_in INTEGER NOT NULL,
                    rows_out INTEGER NOT NULL,
                    payload_bytes INTEGER NOT NULL,
                    row_json BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_rows (run_id, ts_ms);
                CREATE INDEX IF NOT EXISTS idx_audit_method ON audit_rows (method);",
            )
            .map_err(|err| AuditStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == AUDIT_SCHEMA_VERSION => {}
        Some(value) => {
            return Err(AuditStoreError::VersionMismatch(format!(
                "unsupported audit schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| AuditStoreError::Db(err.to_string()))?;
    Ok(())
}
