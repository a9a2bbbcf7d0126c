// state-tape-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Record Store
// Description: Content-addressed artifact store backed by SQLite WAL.
// Purpose: Persist envelopes with projection rows in one transaction.
// Dependencies: state-tape-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the content-addressed [`RecordStore`] on
//! `metadata.db`. Every write is transactional: envelope validation, record
//! insert (idempotent via `INSERT OR IGNORE` on the content-addressed key),
//! and projection upsert happen together or not at all. Scans read from the
//! projection only; [`SqliteRecordStore::reconcile_projection`] recomputes
//! projection rows from the authoritative records and is idempotent.
//! Loads verify integrity via stored hashes and fail closed on corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde_json::Value;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactId;
use state_tape_core::ArtifactKind;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::RecordStore;
use state_tape_core::StoreError;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_core::canonical_json_bytes;
use state_tape_core::hash_bytes;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the metadata store.
pub const SCHEMA_VERSION: i64 = 2;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum envelope size accepted by the store.
pub const MAX_ENVELOPE_BYTES: usize = 8 * 1024 * 1024;
/// Characters of denormalized search text kept in the projection.
const MAX_SEARCH_TEXT_CHARS: usize = 2_048;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` metadata store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to `metadata.db`.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Builds a config for the conventional `metadata.db` location under a
    /// data root.
    #[must_use]
    pub fn for_data_root(data_root: &Path) -> Self {
        Self { path: data_root.join("metadata.db"), busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` record store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Transient lock contention.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Envelope refused at the persistence boundary.
    #[error("sqlite store refused artifact: {0}")]
    Refused(String),
    /// Store payload exceeded configured size limits.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::Busy(message) => Self::Transient(message),
            SqliteStoreError::Corrupt(message) => Self::Corruption(message),
            SqliteStoreError::VersionMismatch(message) | SqliteStoreError::Invalid(message) => {
                Self::Invalid(message)
            }
            SqliteStoreError::Refused(message) => Self::Refused(message),
            SqliteStoreError::TooLarge { max_bytes, actual_bytes } => Self::Invalid(format!(
                "envelope exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps a `rusqlite` error to the store error taxonomy.
fn map_db_error(err: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = err {
        if inner.code == ErrorCode::DatabaseBusy || inner.code == ErrorCode::DatabaseLocked {
            return SqliteStoreError::Busy(err.to_string());
        }
        if inner.code == ErrorCode::DatabaseCorrupt {
            return SqliteStoreError::Corrupt(err.to_string());
        }
    }
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed content-addressed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    /// Shared `SQLite` connection guarded by a mutex (single writer).
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Opens the metadata store, creating or migrating the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// migrated.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Persists a batch of envelopes inside one transaction.
    ///
    /// Re-inserting an existing artifact identifier is a no-op, which makes
    /// retried commits idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Refused`] when any envelope violates a
    /// persistence invariant; nothing from the batch is committed.
    pub fn put_batch(&self, envelopes: &[ArtifactEnvelope]) -> Result<(), SqliteStoreError> {
        for envelope in envelopes {
            envelope.validate().map_err(|err| SqliteStoreError::Refused(err.to_string()))?;
        }
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| map_db_error(&err))?;
        for envelope in envelopes {
            insert_envelope(&tx, envelope)?;
        }
        tx.commit().map_err(|err| map_db_error(&err))?;
        drop(guard);
        Ok(())
    }

    /// Recomputes projection rows from the authoritative records.
    ///
    /// The pass is idempotent: running it on a consistent store rewrites
    /// identical rows. Returns the number of repaired rows.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn reconcile_projection(&self) -> Result<u64, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| map_db_error(&err))?;
        let mut repaired = 0_u64;
        let envelopes = {
            let mut stmt = tx
                .prepare("SELECT envelope_json, envelope_hash FROM records ORDER BY artifact_id")
                .map_err(|err| map_db_error(&err))?;
            let rows = stmt
                .query_map(params![], |row| {
                    let json: Vec<u8> = row.get(0)?;
                    let hash: String = row.get(1)?;
                    Ok((json, hash))
                })
                .map_err(|err| map_db_error(&err))?;
            let mut envelopes = Vec::new();
            for row in rows {
                let (json, hash) = row.map_err(|err| map_db_error(&err))?;
                let expected = hash_bytes(DEFAULT_HASH_ALGORITHM, &json);
                if expected.value != hash {
                    return Err(SqliteStoreError::Corrupt(
                        "record hash mismatch during reconcile".to_string(),
                    ));
                }
                let envelope: ArtifactEnvelope = serde_json::from_slice(&json)
                    .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                envelopes.push(envelope);
            }
            envelopes
        };
        for envelope in &envelopes {
            let expected = ProjectionRow::derive(envelope);
            let existing = load_projection_row(&tx, &envelope.artifact_id)?;
            if existing.as_ref() != Some(&expected) {
                upsert_projection(&tx, &expected)?;
                repaired += 1;
            }
        }
        tx.commit().map_err(|err| map_db_error(&err))?;
        drop(guard);
        Ok(repaired)
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Loads one envelope by identifier, verifying its stored hash.
    fn load_record(
        &self,
        id: &ArtifactId,
    ) -> Result<Option<ArtifactEnvelope>, SqliteStoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT envelope_json, envelope_hash FROM records WHERE artifact_id = ?1",
                params![id.as_str()],
                |row| {
                    let json: Vec<u8> = row.get(0)?;
                    let hash: String = row.get(1)?;
                    Ok((json, hash))
                },
            )
            .optional()
            .map_err(|err| map_db_error(&err))?;
        drop(guard);
        let Some((json, hash)) = row else {
            return Ok(None);
        };
        let expected = hash_bytes(DEFAULT_HASH_ALGORITHM, &json);
        if expected.value != hash {
            return Err(SqliteStoreError::Corrupt(format!("record hash mismatch for {id}")));
        }
        let envelope: ArtifactEnvelope =
            serde_json::from_slice(&json).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        Ok(Some(envelope))
    }

    /// Scans envelopes through the projection with an optional kind filter.
    fn scan(
        &self,
        kind: Option<ArtifactKind>,
        range: TimeRange,
    ) -> Result<Vec<ArtifactEnvelope>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut out = Vec::new();
        let mut push_row = |json: Vec<u8>, hash: String| -> Result<(), SqliteStoreError> {
            let expected = hash_bytes(DEFAULT_HASH_ALGORITHM, &json);
            if expected.value != hash {
                return Err(SqliteStoreError::Corrupt("record hash mismatch in scan".to_string()));
            }
            let envelope: ArtifactEnvelope = serde_json::from_slice(&json)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            out.push(envelope);
            Ok(())
        };
        if let Some(kind) = kind {
            let mut stmt = guard
                .prepare(
                    "SELECT r.envelope_json, r.envelope_hash FROM metadata_projection p JOIN \
                     records r ON r.artifact_id = p.artifact_id WHERE p.kind = ?1 AND p.ts_ms >= \
                     ?2 AND p.ts_ms < ?3 ORDER BY p.ts_ms, p.artifact_id",
                )
                .map_err(|err| map_db_error(&err))?;
            let rows = stmt
                .query_map(
                    params![kind.label(), range.start.millis(), range.end.millis()],
                    |row| {
                        let json: Vec<u8> = row.get(0)?;
                        let hash: String = row.get(1)?;
                        Ok((json, hash))
                    },
                )
                .map_err(|err| map_db_error(&err))?;
            for row in rows {
                let (json, hash) = row.map_err(|err| map_db_error(&err))?;
                push_row(json, hash)?;
            }
        } else {
            let mut stmt = guard
                .prepare(
                    "SELECT r.envelope_json, r.envelope_hash FROM metadata_projection p JOIN \
                     records r ON r.artifact_id = p.artifact_id WHERE p.ts_ms >= ?1 AND p.ts_ms < \
                     ?2 ORDER BY p.ts_ms, p.artifact_id",
                )
                .map_err(|err| map_db_error(&err))?;
            let rows = stmt
                .query_map(params![range.start.millis(), range.end.millis()], |row| {
                    let json: Vec<u8> = row.get(0)?;
                    let hash: String = row.get(1)?;
                    Ok((json, hash))
                })
                .map_err(|err| map_db_error(&err))?;
            for row in rows {
                let (json, hash) = row.map_err(|err| map_db_error(&err))?;
                push_row(json, hash)?;
            }
        }
        drop(guard);
        Ok(out)
    }
}

impl RecordStore for SqliteRecordStore {
    fn put_record(&self, envelope: &ArtifactEnvelope) -> Result<ArtifactId, StoreError> {
        self.put_batch(std::slice::from_ref(envelope)).map_err(StoreError::from)?;
        Ok(envelope.artifact_id.clone())
    }

    fn get_record(&self, id: &ArtifactId) -> Result<Option<ArtifactEnvelope>, StoreError> {
        self.load_record(id).map_err(StoreError::from)
    }

    fn scan_by_kind(
        &self,
        kind: ArtifactKind,
        range: TimeRange,
    ) -> Result<Vec<ArtifactEnvelope>, StoreError> {
        self.scan(Some(kind), range).map_err(StoreError::from)
    }

    fn scan_by_time(&self, range: TimeRange) -> Result<Vec<ArtifactEnvelope>, StoreError> {
        self.scan(None, range).map_err(StoreError::from)
    }

    fn count_by_kind(&self, kind: ArtifactKind, range: TimeRange) -> Result<u64, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM metadata_projection WHERE kind = ?1 AND ts_ms >= ?2 AND \
                 ts_ms < ?3",
                params![kind.label(), range.start.millis(), range.end.millis()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(map_db_error(&err)))?;
        drop(guard);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ============================================================================
// SECTION: Projection
// ============================================================================

/// One denormalized projection row, recomputable from its record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProjectionRow {
    /// Artifact identifier.
    artifact_id: String,
    /// Stable kind label.
    kind: String,
    /// Query timestamp (payload time when present, envelope time otherwise).
    ts_ms: i64,
    /// Owning session when derivable from the payload.
    session_id: Option<String>,
    /// Denormalized search text for cheap filtering.
    search_text: Option<String>,
}

impl ProjectionRow {
    /// Derives the projection row for an envelope. The derivation is a pure
    /// function of the record so the reconcile pass can replay it.
    fn derive(envelope: &ArtifactEnvelope) -> Self {
        Self {
            artifact_id: envelope.artifact_id.as_str().to_string(),
            kind: envelope.kind.label().to_string(),
            ts_ms: projection_ts(envelope).millis(),
            session_id: projection_session(&envelope.payload),
            search_text: projection_search_text(envelope.kind, &envelope.payload),
        }
    }
}

/// Extracts the query timestamp for a record: the payload capture/span time
/// when present, the envelope creation time otherwise.
fn projection_ts(envelope: &ArtifactEnvelope) -> Timestamp {
    for key in ["ts_ms", "ts_start_ms"] {
        if let Some(value) = envelope.payload.get(key).and_then(Value::as_i64) {
            return Timestamp::from_millis(value);
        }
    }
    envelope.created_ts_ms
}

/// Extracts the owning session from payload shapes that carry one.
fn projection_session(payload: &Value) -> Option<String> {
    if let Some(session) = payload.get("session_id").and_then(Value::as_str) {
        return Some(session.to_string());
    }
    payload
        .get("source")
        .and_then(|source| source.get("session"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Extracts denormalized search text per kind, capped for projection size.
fn projection_search_text(kind: ArtifactKind, payload: &Value) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    match kind {
        ArtifactKind::TextTokens => {
            if let Some(tokens) = payload.get("tokens").and_then(Value::as_array) {
                for token in tokens {
                    if let Some(text) = token.get("norm_text").and_then(Value::as_str) {
                        parts.push(text);
                    }
                }
            }
        }
        ArtifactKind::ScreenState => {
            if let Some(apps) = payload.get("visible_apps").and_then(Value::as_array) {
                for app in apps {
                    if let Some(name) = app.as_str() {
                        parts.push(name);
                    }
                }
            }
        }
        ArtifactKind::StateSpan => {
            if let Some(features) = payload.get("summary_features") {
                if let Some(app) = features.get("app").and_then(Value::as_str) {
                    parts.push(app);
                }
                if let Some(entities) = features.get("top_entities").and_then(Value::as_array) {
                    for entity in entities {
                        if let Some(text) = entity.as_str() {
                            parts.push(text);
                        }
                    }
                }
            }
        }
        _ => {}
    }
    if parts.is_empty() {
        return None;
    }
    let mut joined = parts.join(" ");
    if joined.chars().count() > MAX_SEARCH_TEXT_CHARS {
        joined = joined.chars().take(MAX_SEARCH_TEXT_CHARS).collect();
    }
    Some(joined)
}

/// Inserts one envelope and its projection row inside the open transaction.
fn insert_envelope(
    tx: &rusqlite::Transaction<'_>,
    envelope: &ArtifactEnvelope,
) -> Result<(), SqliteStoreError> {
    let json = canonical_json_bytes(envelope)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if json.len() > MAX_ENVELOPE_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_ENVELOPE_BYTES,
            actual_bytes: json.len(),
        });
    }
    let hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &json);
    tx.execute(
        "INSERT OR IGNORE INTO records (artifact_id, kind, created_ts_ms, envelope_json, \
         envelope_hash) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            envelope.artifact_id.as_str(),
            envelope.kind.label(),
            envelope.created_ts_ms.millis(),
            json,
            hash.value
        ],
    )
    .map_err(|err| map_db_error(&err))?;
    let row = ProjectionRow::derive(envelope);
    upsert_projection(tx, &row)
}

/// Upserts one projection row.
fn upsert_projection(
    tx: &rusqlite::Transaction<'_>,
    row: &ProjectionRow,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO metadata_projection (artifact_id, kind, ts_ms, session_id, search_text) \
         VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(artifact_id) DO UPDATE SET kind = \
         excluded.kind, ts_ms = excluded.ts_ms, session_id = excluded.session_id, search_text = \
         excluded.search_text",
        params![row.artifact_id, row.kind, row.ts_ms, row.session_id, row.search_text],
    )
    .map_err(|err| map_db_error(&err))?;
    Ok(())
}

/// Loads the projection row for one artifact.
fn load_projection_row(
    tx: &rusqlite::Transaction<'_>,
    id: &ArtifactId,
) -> Result<Option<ProjectionRow>, SqliteStoreError> {
    tx.query_row(
        "SELECT artifact_id, kind, ts_ms, session_id, search_text FROM metadata_projection WHERE \
         artifact_id = ?1",
        params![id.as_str()],
        |row| {
            Ok(ProjectionRow {
                artifact_id: row.get(0)?,
                kind: row.get(1)?,
                ts_ms: row.get(2)?,
                session_id: row.get(3)?,
                search_text: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|err| map_db_error(&err))
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| map_db_error(&err))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = wal; PRAGMA synchronous = full;")
        .map_err(|err| map_db_error(&err))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| map_db_error(&err))?;
    Ok(connection)
}

/// Initializes the schema or applies forward-only migrations.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| map_db_error(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| map_db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| map_db_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| map_db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    artifact_id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    created_ts_ms INTEGER NOT NULL,
                    envelope_json BLOB NOT NULL,
                    envelope_hash TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS metadata_projection (
                    artifact_id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    ts_ms INTEGER NOT NULL,
                    session_id TEXT,
                    search_text TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_projection_kind_ts
                    ON metadata_projection (kind, ts_ms);
                CREATE INDEX IF NOT EXISTS idx_projection_ts
                    ON metadata_projection (ts_ms);
                CREATE TABLE IF NOT EXISTS blobs (
                    media_id TEXT PRIMARY KEY,
                    byte_len INTEGER NOT NULL,
                    ttl_expires_at_ms INTEGER NOT NULL,
                    created_ts_ms INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS quarantine (
                    artifact_id TEXT PRIMARY KEY,
                    reason TEXT NOT NULL,
                    envelope_json BLOB NOT NULL,
                    quarantined_ts_ms INTEGER NOT NULL
                );",
            )
            .map_err(|err| map_db_error(&err))?;
        }
        Some(1) => {
            // v1 carried no session_id column in the projection.
            tx.execute_batch(
                "ALTER TABLE metadata_projection ADD COLUMN session_id TEXT;",
            )
            .map_err(|err| map_db_error(&err))?;
            tx.execute("UPDATE store_meta SET version = ?1", params![SCHEMA_VERSION])
                .map_err(|err| map_db_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| map_db_error(&err))?;
    Ok(())
}

// ============================================================================
// SECTION: Quarantine
// ============================================================================

impl SqliteRecordStore {
    /// Quarantines an artifact that failed a policy pass (for audit review).
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn quarantine(
        &self,
        envelope: &ArtifactEnvelope,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), SqliteStoreError> {
        let json = canonical_json_bytes(envelope)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT OR IGNORE INTO quarantine (artifact_id, reason, envelope_json, \
                 quarantined_ts_ms) VALUES (?1, ?2, ?3, ?4)",
                params![envelope.artifact_id.as_str(), reason, json, now.millis()],
            )
            .map_err(|err| map_db_error(&err))?;
        drop(guard);
        Ok(())
    }

    /// Returns the reasons currently held in quarantine, ordered by artifact.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn quarantine_reasons(&self) -> Result<Vec<(String, String)>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT artifact_id, reason FROM quarantine ORDER BY artifact_id")
            .map_err(|err| map_db_error(&err))?;
        let rows = stmt
            .query_map(params![], |row| {
                let id: String = row.get(0)?;
                let reason: String = row.get(1)?;
                Ok((id, reason))
            })
            .map_err(|err| map_db_error(&err))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| map_db_error(&err))?);
        }
        drop(stmt);
        drop(guard);
        Ok(out)
    }

    /// Registers blob TTL metadata inside the metadata store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn register_blob(
        &self,
        media_id: &str,
        byte_len: u64,
        ttl_expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT OR IGNORE INTO blobs (media_id, byte_len, ttl_expires_at_ms, \
                 created_ts_ms) VALUES (?1, ?2, ?3, ?4)",
                params![
                    media_id,
                    i64::try_from(byte_len).unwrap_or(i64::MAX),
                    ttl_expires_at.millis(),
                    now.millis()
                ],
            )
            .map_err(|err| map_db_error(&err))?;
        drop(guard);
        Ok(())
    }

    /// Returns blob TTL metadata when registered.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn blob_ttl(&self, media_id: &str) -> Result<Option<Timestamp>, SqliteStoreError> {
        let guard = self.lock()?;
        let ttl: Option<i64> = guard
            .query_row(
                "SELECT ttl_expires_at_ms FROM blobs WHERE media_id = ?1",
                params![media_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_db_error(&err))?;
        drop(guard);
        Ok(ttl.map(Timestamp::from_millis))
    }

    /// Returns identifiers of blobs whose TTL has passed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn expired_blobs(&self, now: Timestamp) -> Result<Vec<String>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT media_id FROM blobs WHERE ttl_expires_at_ms <= ?1 ORDER BY media_id")
            .map_err(|err| map_db_error(&err))?;
        let rows = stmt
            .query_map(params![now.millis()], |row| row.get::<_, String>(0))
            .map_err(|err| map_db_error(&err))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| map_db_error(&err))?);
        }
        drop(stmt);
        drop(guard);
        Ok(out)
    }

    /// Forgets TTL metadata for swept blobs.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on engine failures.
    pub fn forget_blobs(&self, media_ids: &[String]) -> Result<(), SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| map_db_error(&err))?;
        for media_id in media_ids {
            tx.execute("DELETE FROM blobs WHERE media_id = ?1", params![media_id])
                .map_err(|err| map_db_error(&err))?;
        }
        tx.commit().map_err(|err| map_db_error(&err))?;
        drop(guard);
        Ok(())
    }
}
