// state-tape-ingest/src/marker.rs
// ============================================================================
// Module: Reap Marker
// Description: The atomic terminal file signaling a handoff may be deleted.
// Purpose: Serialize the v1 reap-eligibility contract with the upstream host.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Stage-1 writes `reap_eligible.json` into the handoff directory only after
//! every row and blob landed in the destination. The upstream reaper deletes
//! the handoff only on a valid v1 parse, so the marker is written with
//! `tmp + rename` and never partially visible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema identifier for the v1 reap marker.
pub const REAP_MARKER_SCHEMA: &str = "autocapture.handoff.reap_eligible.v1";
/// Marker filename inside the handoff directory.
pub const REAP_MARKER_FILENAME: &str = "reap_eligible.json";
/// Terminal marker the upstream host writes last.
pub const COMPLETE_MARKER_FILENAME: &str = "COMPLETE.json";

// ============================================================================
// SECTION: Marker Payload
// ============================================================================

/// Ingest counts recorded in the marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapCounts {
    /// Metadata rows copied into the destination.
    pub metadata_rows_copied: u64,
    /// Media files hardlinked.
    pub media_files_linked: u64,
    /// Media files copied byte-by-byte.
    pub media_files_copied: u64,
    /// Total bytes ingested.
    pub bytes_ingested: u64,
}

/// Integrity notes recorded in the marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapIntegrity {
    /// SHA-256 of the destination metadata database, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_metadata_db_sha256: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The v1 reap marker payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapMarker {
    /// Schema identifier (always [`REAP_MARKER_SCHEMA`]).
    pub schema: String,
    /// Handoff directory that was ingested.
    pub handoff_root: String,
    /// Destination data root.
    pub dest_data_root: String,
    /// UTC timestamp of the ingest, RFC 3339.
    pub ingested_at_utc: String,
    /// Ingest run identifier.
    pub ingest_run_id: String,
    /// Ingest counts.
    pub counts: ReapCounts,
    /// Integrity notes.
    #[serde(default)]
    pub integrity: ReapIntegrity,
}

impl ReapMarker {
    /// Returns true when the marker parses as a valid v1 payload.
    #[must_use]
    pub fn is_valid_v1(&self) -> bool {
        self.schema == REAP_MARKER_SCHEMA && !self.ingest_run_id.is_empty()
    }
}

// ============================================================================
// SECTION: Atomic Write
// ============================================================================

/// Writes the marker atomically (`tmp + rename`) into the handoff root.
///
/// # Errors
///
/// Returns an [`std::io::Error`] when serialization or the rename fails.
pub fn write_marker(handoff_root: &Path, marker: &ReapMarker) -> Result<(), std::io::Error> {
    let text = serde_json::to_string_pretty(marker)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let tmp = handoff_root.join(format!("{REAP_MARKER_FILENAME}.tmp"));
    let target = handoff_root.join(REAP_MARKER_FILENAME);
    fs::write(&tmp, text)?;
    fs::rename(&tmp, &target)?;
    Ok(())
}

/// Reads and parses a marker when present.
///
/// # Errors
///
/// Returns an [`std::io::Error`] when the file exists but fails to parse.
pub fn read_marker(handoff_root: &Path) -> Result<Option<ReapMarker>, std::io::Error> {
    let path = handoff_root.join(REAP_MARKER_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    let marker: ReapMarker = serde_json::from_str(&text)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok(Some(marker))
}
