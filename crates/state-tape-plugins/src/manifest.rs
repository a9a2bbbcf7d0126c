// state-tape-plugins/src/manifest.rs
// ============================================================================
// Module: Plugin Manifests and Lockfile
// Description: Manifest records, capability labels, and lockfile hashes.
// Purpose: Admit plugins only when manifest and code hashes match the lock.
// Dependencies: state-tape-core, serde
// ============================================================================

//! ## Overview
//! Each plugin ships a manifest naming its identifier, semantic version,
//! capabilities, permissions, entrypoint, and code hash. The lockfile maps
//! plugin identifiers to the expected manifest and code hashes; a plugin is
//! admitted only when it is allowlisted and both hashes match. Violations
//! refuse the load and are recorded in audit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::HashDigest;
use state_tape_core::PluginId;
use state_tape_core::hash_canonical_json;
use thiserror::Error;

// ============================================================================
// SECTION: Capabilities and Permissions
// ============================================================================

/// Plugin capability labels composed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Frame normalization, hashing, and tiling.
    Preprocess,
    /// Optical character recognition.
    Ocr,
    /// UI structure parsing.
    UiParse,
    /// Screen-state and tape construction.
    StateBuild,
    /// Index maintenance.
    Index,
    /// Evidence bundle compilation.
    EvidenceCompile,
    /// Anomaly detection.
    Anomaly,
    /// Workflow mining.
    WorkflowMine,
}

impl Capability {
    /// Returns the stable capability label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Ocr => "ocr",
            Self::UiParse => "ui_parse",
            Self::StateBuild => "state_build",
            Self::Index => "index",
            Self::EvidenceCompile => "evidence_compile",
            Self::Anomaly => "anomaly",
            Self::WorkflowMine => "workflow_mine",
        }
    }
}

/// Host permissions a plugin may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read media blobs.
    ReadMedia,
    /// Read derived records.
    ReadRecords,
    /// Write derived records.
    WriteRecords,
    /// Invoke a local model endpoint.
    InvokeModel,
}

// ============================================================================
// SECTION: Entrypoint
// ============================================================================

/// How the plugin is hosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Entrypoint {
    /// Audited builtin hosted in-process.
    InProcess {
        /// Builtin registry key.
        builtin: String,
    },
    /// Untrusted plugin hosted in a sandboxed subprocess.
    Subprocess {
        /// Worker command path.
        command: PathBuf,
        /// Worker arguments.
        #[serde(default)]
        args: Vec<String>,
    },
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Plugin manifest shipped next to the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Plugin identifier.
    pub id: PluginId,
    /// Semantic version.
    pub version: String,
    /// Declared capabilities.
    pub capabilities: BTreeSet<Capability>,
    /// Requested host permissions.
    pub permissions: BTreeSet<Permission>,
    /// Hosting entrypoint.
    pub entrypoint: Entrypoint,
    /// SHA-256 of the plugin code.
    pub code_sha256: HashDigest,
}

impl PluginManifest {
    /// Returns the canonical manifest hash used by the lockfile.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Hashing`] when canonicalization fails.
    pub fn manifest_hash(&self) -> Result<HashDigest, ManifestError> {
        hash_canonical_json(DEFAULT_HASH_ALGORITHM, self)
            .map_err(|err| ManifestError::Hashing(err.to_string()))
    }
}

// ============================================================================
// SECTION: Lockfile
// ============================================================================

/// One lockfile entry pinning a plugin's hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockEntry {
    /// Expected canonical manifest hash.
    pub manifest_sha256: HashDigest,
    /// Expected plugin code hash.
    pub code_sha256: HashDigest,
}

/// Lockfile pinning every admissible plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginLockfile {
    /// Entries keyed by plugin identifier.
    #[serde(default)]
    pub entries: BTreeMap<String, LockEntry>,
}

impl PluginLockfile {
    /// Loads the lockfile from JSON on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the file is unreadable or unparseable.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|err| ManifestError::Io(err.to_string()))?;
        serde_json::from_str(&text).map_err(|err| ManifestError::Parse(err.to_string()))
    }

    /// Builds a lockfile pinning the provided manifests as-is.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Hashing`] when a manifest cannot be hashed.
    pub fn pin(manifests: &[PluginManifest]) -> Result<Self, ManifestError> {
        let mut entries = BTreeMap::new();
        for manifest in manifests {
            entries.insert(
                manifest.id.as_str().to_string(),
                LockEntry {
                    manifest_sha256: manifest.manifest_hash()?,
                    code_sha256: manifest.code_sha256.clone(),
                },
            );
        }
        Ok(Self { entries })
    }

    /// Verifies a manifest against its lock entry.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] naming the admission failure.
    pub fn verify(&self, manifest: &PluginManifest) -> Result<(), ManifestError> {
        let Some(entry) = self.entries.get(manifest.id.as_str()) else {
            return Err(ManifestError::NotLocked(manifest.id.as_str().to_string()));
        };
        let manifest_hash = manifest.manifest_hash()?;
        if manifest_hash != entry.manifest_sha256 {
            return Err(ManifestError::ManifestHashMismatch(manifest.id.as_str().to_string()));
        }
        if manifest.code_sha256 != entry.code_sha256 {
            return Err(ManifestError::CodeHashMismatch(manifest.id.as_str().to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Manifest and lockfile errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Lockfile I/O failure.
    #[error("lockfile io error: {0}")]
    Io(String),
    /// Lockfile parse failure.
    #[error("lockfile parse error: {0}")]
    Parse(String),
    /// Manifest hashing failure.
    #[error("manifest hashing error: {0}")]
    Hashing(String),
    /// Plugin has no lockfile entry.
    #[error("plugin not present in lockfile: {0}")]
    NotLocked(String),
    /// Manifest hash does not match the lockfile.
    #[error("manifest hash mismatch for plugin: {0}")]
    ManifestHashMismatch(String),
    /// Code hash does not match the lockfile.
    #[error("code hash mismatch for plugin: {0}")]
    CodeHashMismatch(String),
}
