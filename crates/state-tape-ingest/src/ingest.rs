// state-tape-ingest/src/ingest.rs
// ============================================================================
// Module: Stage-1 Handoff Ingestor
// Description: Fast, idempotent import of upstream handoff directories.
// Purpose: Land metadata rows and media blobs without touching any model.
// Dependencies: state-tape-core, state-tape-store-sqlite, fs2, rusqlite,
//               time
// ============================================================================

//! ## Overview
//! Stage-1 holds an exclusive lock on the destination data root, validates
//! the handoff's terminal marker, copies metadata rows via `INSERT OR
//! IGNORE` keyed on the content-addressed identifier, transfers blobs
//! (hardlink first, streamed copy on failure, size verified always and
//! SHA-256 verified on copy), writes the completion audit row, and finally
//! writes the reap marker atomically. A missing blob aborts before the
//! marker is written and leaves the destination consistent. No OCR, VLM, or
//! embedding model is ever invoked here; runtime scales with bytes moved.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use fs2::FileExt;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params;
use serde_json::json;
use state_tape_core::AuditRow;
use state_tape_core::AuditSink;
use state_tape_core::AuditStore;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::HashDigest;
use state_tape_core::PluginId;
use state_tape_core::RunId;
use state_tape_core::Timestamp;
use state_tape_core::hash_bytes;
use state_tape_core::memory_probe;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::marker::COMPLETE_MARKER_FILENAME;
use crate::marker::REAP_MARKER_SCHEMA;
use crate::marker::ReapCounts;
use crate::marker::ReapIntegrity;
use crate::marker::ReapMarker;
use crate::marker::write_marker;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lockfile guarding the destination data root.
const INGEST_LOCK_FILENAME: &str = ".ingest.lock";
/// Audit method label for completed ingests.
pub const INGEST_COMPLETED_METHOD: &str = "system.ingest.handoff.completed";
/// Ledger file receiving one line per ingested handoff.
const LEDGER_FILENAME: &str = "ledger.ndjson";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Stage-1 ingest errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Destination lock could not be acquired.
    #[error("ingest lock unavailable: {0}")]
    LockUnavailable(String),
    /// Source database is corrupt or unreadable.
    #[error("handoff source corrupt: {0}")]
    CorruptSource(String),
    /// A referenced blob is missing from the handoff.
    #[error("handoff incomplete, missing blob: {0}")]
    MissingBlob(String),
    /// Blob checksum mismatched twice.
    #[error("handoff blob checksum mismatch: {0}")]
    ChecksumMismatch(String),
    /// Filesystem failure.
    #[error("ingest io error: {0}")]
    Io(String),
    /// Destination store failure.
    #[error("ingest store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Transfer Mode
// ============================================================================

/// Blob transfer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Hardlink first, streamed copy on failure (cross-device safe).
    #[default]
    Hardlink,
    /// Always copy byte-by-byte.
    Copy,
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of one Stage-1 invocation.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// True when the handoff had no terminal marker and was skipped.
    pub skipped: bool,
    /// Ingest run identifier.
    pub run_id: Option<RunId>,
    /// Counts mirrored into the reap marker.
    pub counts: ReapCounts,
}

// ============================================================================
// SECTION: Ingestor
// ============================================================================

/// Stage-1 handoff ingestor bound to one destination data root.
pub struct HandoffIngestor<'a> {
    /// Destination data root.
    dest_root: PathBuf,
    /// Blob transfer mode.
    mode: TransferMode,
    /// Durable audit store (one row per completed ingest).
    audit: &'a dyn AuditStore,
    /// Operational audit sink.
    sink: &'a dyn AuditSink,
}

impl<'a> HandoffIngestor<'a> {
    /// Creates an ingestor for the destination root.
    #[must_use]
    pub fn new(
        dest_root: PathBuf,
        mode: TransferMode,
        audit: &'a dyn AuditStore,
        sink: &'a dyn AuditSink,
    ) -> Self {
        Self { dest_root, mode, audit, sink }
    }

    /// Ingests one handoff directory.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on lock, source, blob, or store failures. No
    /// reap marker is written on error; committed destination rows remain
    /// (the operation is restartable).
    pub fn ingest(&self, handoff_root: &Path) -> Result<IngestReport, IngestError> {
        let _lock = self.acquire_lock()?;
        if !handoff_root.join(COMPLETE_MARKER_FILENAME).exists() {
            return Ok(IngestReport { skipped: true, run_id: None, counts: ReapCounts::default() });
        }
        let started = SystemTime::now();
        let run_id = derive_run_id(handoff_root);
        let source_db_path = handoff_root.join("metadata.db");
        let source = open_source(&source_db_path)?;
        let dest = self.open_dest()?;
        let metadata_rows_copied = copy_metadata_rows(&source, &dest)?;
        let blob_rows = read_blob_rows(&source)?;
        let mut counts = ReapCounts { metadata_rows_copied, ..ReapCounts::default() };
        for (media_id, byte_len) in &blob_rows {
            let outcome = self.transfer_blob(handoff_root, media_id, *byte_len)?;
            match outcome {
                BlobOutcome::Linked => counts.media_files_linked += 1,
                BlobOutcome::Copied => counts.media_files_copied += 1,
                BlobOutcome::AlreadyPresent => {}
            }
            if outcome != BlobOutcome::AlreadyPresent {
                counts.bytes_ingested += byte_len;
            }
        }
        let now = unix_millis();
        self.write_completion_audit(&run_id, &counts, started, now)?;
        self.append_ledger_line(&run_id, handoff_root, &counts, now)?;
        let marker = ReapMarker {
            schema: REAP_MARKER_SCHEMA.to_string(),
            handoff_root: handoff_root.display().to_string(),
            dest_data_root: self.dest_root.display().to_string(),
            ingested_at_utc: rfc3339_utc(now),
            ingest_run_id: run_id.as_str().to_string(),
            counts,
            integrity: ReapIntegrity::default(),
        };
        write_marker(handoff_root, &marker).map_err(|err| IngestError::Io(err.to_string()))?;
        Ok(IngestReport { skipped: false, run_id: Some(run_id), counts: marker.counts })
    }

    /// Drains every handoff directory under a spool root, oldest name first.
    ///
    /// # Errors
    ///
    /// Returns the first [`IngestError`] encountered; earlier handoffs stay
    /// committed.
    pub fn drain(&self, spool_root: &Path) -> Result<Vec<IngestReport>, IngestError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(spool_root)
            .map_err(|err| IngestError::Io(err.to_string()))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();
        let mut reports = Vec::new();
        for entry in entries {
            reports.push(self.ingest(&entry)?);
        }
        Ok(reports)
    }

    /// Acquires the exclusive destination lock.
    fn acquire_lock(&self) -> Result<File, IngestError> {
        fs::create_dir_all(&self.dest_root).map_err(|err| IngestError::Io(err.to_string()))?;
        let lock_path = self.dest_root.join(INGEST_LOCK_FILENAME);
        let lock = File::create(&lock_path).map_err(|err| IngestError::Io(err.to_string()))?;
        lock.lock_exclusive().map_err(|err| IngestError::LockUnavailable(err.to_string()))?;
        Ok(lock)
    }

    /// Opens (and schema-initializes) the destination metadata database.
    fn open_dest(&self) -> Result<Connection, IngestError> {
        let config =
            state_tape_store_sqlite::SqliteStoreConfig::for_data_root(&self.dest_root);
        // Opening the store initializes or migrates the schema.
        state_tape_store_sqlite::SqliteRecordStore::open(&config)
            .map_err(|err| IngestError::Store(err.to_string()))?;
        Connection::open(&config.path).map_err(|err| IngestError::Store(err.to_string()))
    }

    /// Transfers one blob into the destination layout.
    fn transfer_blob(
        &self,
        handoff_root: &Path,
        media_id: &str,
        expected_len: u64,
    ) -> Result<BlobOutcome, IngestError> {
        let shard = &media_id[..2.min(media_id.len())];
        let source = handoff_root.join("media").join(shard).join(format!("{media_id}.blob"));
        if !source.exists() {
            return Err(IngestError::MissingBlob(media_id.to_string()));
        }
        let source_len = fs::metadata(&source)
            .map_err(|err| IngestError::Io(err.to_string()))?
            .len();
        if source_len != expected_len {
            return Err(IngestError::ChecksumMismatch(format!(
                "blob {media_id} size {source_len} != expected {expected_len}"
            )));
        }
        let dest_dir = self.dest_root.join("media").join(shard);
        fs::create_dir_all(&dest_dir).map_err(|err| IngestError::Io(err.to_string()))?;
        let dest = dest_dir.join(format!("{media_id}.blob"));
        if dest.exists() {
            let dest_len =
                fs::metadata(&dest).map_err(|err| IngestError::Io(err.to_string()))?.len();
            if dest_len == expected_len {
                return Ok(BlobOutcome::AlreadyPresent);
            }
            fs::remove_file(&dest).map_err(|err| IngestError::Io(err.to_string()))?;
        }
        if self.mode == TransferMode::Hardlink && fs::hard_link(&source, &dest).is_ok() {
            // Size is verified above; linked bytes are the source bytes.
            return Ok(BlobOutcome::Linked);
        }
        // Streamed copy with SHA-256 verification, one retry on mismatch.
        for attempt in 0..2 {
            fs::copy(&source, &dest).map_err(|err| IngestError::Io(err.to_string()))?;
            let digest = hash_file(&dest)?;
            if digest.value == media_id {
                return Ok(BlobOutcome::Copied);
            }
            if attempt == 1 {
                let _ = fs::remove_file(&dest);
                return Err(IngestError::ChecksumMismatch(media_id.to_string()));
            }
        }
        Err(IngestError::ChecksumMismatch(media_id.to_string()))
    }

    /// Writes the completion audit row and operational event.
    fn write_completion_audit(
        &self,
        run_id: &RunId,
        counts: &ReapCounts,
        started: SystemTime,
        now: Timestamp,
    ) -> Result<(), IngestError> {
        let duration_ns = started
            .elapsed()
            .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let (rss_bytes, vms_bytes) = memory_probe();
        let counts_hash = hash_bytes(
            DEFAULT_HASH_ALGORITHM,
            format!(
                "{}|{}|{}|{}",
                counts.metadata_rows_copied,
                counts.media_files_linked,
                counts.media_files_copied,
                counts.bytes_ingested
            )
            .as_bytes(),
        );
        let row = AuditRow {
            timestamp: now,
            run_id: run_id.clone(),
            plugin_id: PluginId::new("system.ingest"),
            capability: "preprocess".to_string(),
            method: INGEST_COMPLETED_METHOD.to_string(),
            success: true,
            error: None,
            duration_ns,
            rows_in: counts.metadata_rows_copied,
            rows_out: counts.metadata_rows_copied,
            rss_bytes,
            vms_bytes,
            input_hash: counts_hash.clone(),
            output_hash: counts_hash.clone(),
            data_hash: counts_hash.clone(),
            code_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, b"system.ingest"),
            settings_hash: counts_hash,
            payload_bytes: counts.bytes_ingested,
        };
        self.audit.append_row(&row).map_err(|err| IngestError::Store(err.to_string()))?;
        self.sink.emit(
            &state_tape_core::AuditEvent::new(INGEST_COMPLETED_METHOD, now)
                .with_run_id(run_id.clone())
                .with_details(json!({
                    "metadata_rows_copied": counts.metadata_rows_copied,
                    "media_files_linked": counts.media_files_linked,
                    "media_files_copied": counts.media_files_copied,
                    "bytes_ingested": counts.bytes_ingested,
                })),
        );
        Ok(())
    }

    /// Appends one ledger line for the completed handoff.
    fn append_ledger_line(
        &self,
        run_id: &RunId,
        handoff_root: &Path,
        counts: &ReapCounts,
        now: Timestamp,
    ) -> Result<(), IngestError> {
        use std::io::Write;
        let line = json!({
            "ts_ms": now,
            "run_id": run_id,
            "handoff_root": handoff_root.display().to_string(),
            "metadata_rows_copied": counts.metadata_rows_copied,
            "media_files_linked": counts.media_files_linked,
            "media_files_copied": counts.media_files_copied,
            "bytes_ingested": counts.bytes_ingested,
        });
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dest_root.join(LEDGER_FILENAME))
            .map_err(|err| IngestError::Io(err.to_string()))?;
        writeln!(file, "{line}").map_err(|err| IngestError::Io(err.to_string()))
    }
}

/// Blob transfer outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlobOutcome {
    /// Hardlinked into place.
    Linked,
    /// Copied and checksum-verified.
    Copied,
    /// Already present with the right size (idempotent re-ingest).
    AlreadyPresent,
}

// ============================================================================
// SECTION: Source Access
// ============================================================================

/// Opens the handoff metadata database read-only.
fn open_source(path: &Path) -> Result<Connection, IngestError> {
    if !path.exists() {
        return Err(IngestError::CorruptSource("metadata.db missing".to_string()));
    }
    let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    // A cheap integrity probe: the records table must be queryable.
    connection
        .query_row("SELECT COUNT(*) FROM records", params![], |row| row.get::<_, i64>(0))
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    Ok(connection)
}

/// Copies record, projection, and blob-metadata rows with `INSERT OR
/// IGNORE`.
fn copy_metadata_rows(source: &Connection, dest: &Connection) -> Result<u64, IngestError> {
    let mut copied = 0_u64;
    {
        let mut stmt = source
            .prepare(
                "SELECT artifact_id, kind, created_ts_ms, envelope_json, envelope_hash FROM \
                 records ORDER BY artifact_id",
            )
            .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
        let rows = stmt
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
        for row in rows {
            let (artifact_id, kind, created_ts_ms, envelope_json, envelope_hash) =
                row.map_err(|err| IngestError::CorruptSource(err.to_string()))?;
            let inserted = dest
                .execute(
                    "INSERT OR IGNORE INTO records (artifact_id, kind, created_ts_ms, \
                     envelope_json, envelope_hash) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![artifact_id, kind, created_ts_ms, envelope_json, envelope_hash],
                )
                .map_err(|err| IngestError::Store(err.to_string()))?;
            copied += inserted as u64;
        }
    }
    copy_simple_table(
        source,
        dest,
        "SELECT artifact_id, kind, ts_ms, session_id, search_text FROM metadata_projection",
        "INSERT OR IGNORE INTO metadata_projection (artifact_id, kind, ts_ms, session_id, \
         search_text) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    copy_blob_table(source, dest)?;
    Ok(copied)
}

/// Copies the projection table row-by-row.
fn copy_simple_table(
    source: &Connection,
    dest: &Connection,
    select_sql: &str,
    insert_sql: &str,
) -> Result<(), IngestError> {
    let mut stmt =
        source.prepare(select_sql).map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    let rows = stmt
        .query_map(params![], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    for row in rows {
        let (artifact_id, kind, ts_ms, session_id, search_text) =
            row.map_err(|err| IngestError::CorruptSource(err.to_string()))?;
        dest.execute(insert_sql, params![artifact_id, kind, ts_ms, session_id, search_text])
            .map_err(|err| IngestError::Store(err.to_string()))?;
    }
    Ok(())
}

/// Copies the blob-metadata table row-by-row.
fn copy_blob_table(source: &Connection, dest: &Connection) -> Result<(), IngestError> {
    let mut stmt = source
        .prepare("SELECT media_id, byte_len, ttl_expires_at_ms, created_ts_ms FROM blobs")
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    let rows = stmt
        .query_map(params![], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    for row in rows {
        let (media_id, byte_len, ttl, created) =
            row.map_err(|err| IngestError::CorruptSource(err.to_string()))?;
        dest.execute(
            "INSERT OR IGNORE INTO blobs (media_id, byte_len, ttl_expires_at_ms, created_ts_ms) \
             VALUES (?1, ?2, ?3, ?4)",
            params![media_id, byte_len, ttl, created],
        )
        .map_err(|err| IngestError::Store(err.to_string()))?;
    }
    Ok(())
}

/// Reads blob identifiers and sizes from the handoff database.
fn read_blob_rows(source: &Connection) -> Result<Vec<(String, u64)>, IngestError> {
    let mut stmt = source
        .prepare("SELECT media_id, byte_len FROM blobs ORDER BY media_id")
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    let rows = stmt
        .query_map(params![], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|err| IngestError::CorruptSource(err.to_string()))?;
    let mut out = Vec::new();
    for row in rows {
        let (media_id, byte_len) =
            row.map_err(|err| IngestError::CorruptSource(err.to_string()))?;
        out.push((media_id, u64::try_from(byte_len).unwrap_or(0)));
    }
    Ok(out)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Hashes a file's bytes.
fn hash_file(path: &Path) -> Result<HashDigest, IngestError> {
    let bytes = fs::read(path).map_err(|err| IngestError::Io(err.to_string()))?;
    Ok(hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes))
}

/// Derives a deterministic run identifier from the handoff root.
fn derive_run_id(handoff_root: &Path) -> RunId {
    let digest = hash_bytes(
        DEFAULT_HASH_ALGORITHM,
        handoff_root.display().to_string().as_bytes(),
    );
    RunId::new(format!("ingest-{}", digest.prefix(16)))
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> Timestamp {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Timestamp::from_millis(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
}

/// Formats a millisecond timestamp as RFC 3339 UTC.
///
/// Unrepresentable instants fall back to the raw millisecond form so the
/// marker is never left without a timestamp.
#[must_use]
pub fn rfc3339_utc(ts: Timestamp) -> String {
    let nanos = i128::from(ts.millis()).saturating_mul(1_000_000);
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|instant| instant.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}
