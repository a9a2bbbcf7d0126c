// state-tape-cli/src/backup.rs
// ============================================================================
// Module: Backup and Restore
// Description: Manifest-verified copies of the data root.
// Purpose: Recovery path for store corruption (restore-from-backup).
// Dependencies: state-tape-core, serde_json
// ============================================================================

//! ## Overview
//! `backup create` copies the databases, journals, consent state, and media
//! tree into a target directory and writes a manifest of SHA-256 digests.
//! `backup restore` verifies every digest before copying anything back; a
//! single mismatch aborts the restore untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::hash_bytes;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Manifest filename inside the backup directory.
const MANIFEST_FILENAME: &str = "backup_manifest.json";
/// Top-level files included in a backup when present.
const BACKUP_FILES: [&str; 5] = [
    "metadata.db",
    "audit.db",
    "journal.ndjson",
    "ledger.ndjson",
    "state/consent.capture.json",
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Backup errors.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Filesystem failure.
    #[error("backup io error: {0}")]
    Io(String),
    /// Manifest missing or unparseable.
    #[error("backup manifest invalid: {0}")]
    Manifest(String),
    /// A file digest mismatched during restore verification.
    #[error("backup digest mismatch: {0}")]
    DigestMismatch(String),
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Backup manifest: relative path → SHA-256 hex.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BackupManifest {
    /// Digests keyed by data-root-relative path.
    files: std::collections::BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Creates a manifest-verified backup of the data root.
///
/// # Errors
///
/// Returns [`BackupError::Io`] on filesystem failures.
pub fn create(data_root: &Path, backup_root: &Path) -> Result<u64, BackupError> {
    fs::create_dir_all(backup_root).map_err(|err| BackupError::Io(err.to_string()))?;
    let mut manifest = BackupManifest::default();
    let mut copied = 0_u64;
    for relative in BACKUP_FILES {
        let source = data_root.join(relative);
        if !source.exists() {
            continue;
        }
        copied += copy_into(&source, data_root, backup_root, &mut manifest)?;
    }
    for media_file in walk_files(&data_root.join("media")) {
        copied += copy_into(&media_file, data_root, backup_root, &mut manifest)?;
    }
    let manifest_text = serde_json::to_string_pretty(&manifest)
        .map_err(|err| BackupError::Manifest(err.to_string()))?;
    fs::write(backup_root.join(MANIFEST_FILENAME), manifest_text)
        .map_err(|err| BackupError::Io(err.to_string()))?;
    Ok(copied)
}

/// Verifies the manifest and restores the backup into the data root.
///
/// # Errors
///
/// Returns [`BackupError::DigestMismatch`] on any corrupted backup file;
/// nothing is copied when verification fails.
pub fn restore(backup_root: &Path, data_root: &Path) -> Result<u64, BackupError> {
    let manifest_text = fs::read_to_string(backup_root.join(MANIFEST_FILENAME))
        .map_err(|err| BackupError::Manifest(err.to_string()))?;
    let manifest: BackupManifest = serde_json::from_str(&manifest_text)
        .map_err(|err| BackupError::Manifest(err.to_string()))?;
    // Verify first; restore only when every digest matches.
    for (relative, expected) in &manifest.files {
        let path = backup_root.join(relative);
        let bytes = fs::read(&path).map_err(|err| BackupError::Io(err.to_string()))?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
        if digest.value != *expected {
            return Err(BackupError::DigestMismatch(relative.clone()));
        }
    }
    let mut restored = 0_u64;
    for relative in manifest.files.keys() {
        let source = backup_root.join(relative);
        let target = data_root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| BackupError::Io(err.to_string()))?;
        }
        fs::copy(&source, &target).map_err(|err| BackupError::Io(err.to_string()))?;
        restored += 1;
    }
    Ok(restored)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Copies one file into the backup tree and records its digest.
fn copy_into(
    source: &Path,
    data_root: &Path,
    backup_root: &Path,
    manifest: &mut BackupManifest,
) -> Result<u64, BackupError> {
    let relative = source
        .strip_prefix(data_root)
        .map_err(|err| BackupError::Io(err.to_string()))?
        .to_string_lossy()
        .to_string();
    let target = backup_root.join(&relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| BackupError::Io(err.to_string()))?;
    }
    let bytes = fs::read(source).map_err(|err| BackupError::Io(err.to_string()))?;
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
    fs::write(&target, &bytes).map_err(|err| BackupError::Io(err.to_string()))?;
    manifest.files.insert(relative, digest.value);
    Ok(1)
}

/// Recursively lists files under a directory (empty when absent).
fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}
