// state-tape-scheduler/src/consent.rs
// ============================================================================
// Module: Consent Gate
// Description: Capture-consent preflight for ingest and batch processing.
// Purpose: Refuse pipeline work until consent is explicitly accepted.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Consent lives at `state/consent.capture.json` under the data root. Both
//! Stage-1 ingest and batch processing preflight it; a missing or unaccepted
//! record refuses the operation (the CLI maps this to exit code 2).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consent record location relative to the data root.
pub const CONSENT_RELPATH: &str = "state/consent.capture.json";
/// Consent record schema identifier.
pub const CONSENT_SCHEMA: &str = "autocapture.consent.capture.v1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Consent gate errors.
#[derive(Debug, Error)]
pub enum ConsentError {
    /// Consent has not been accepted.
    #[error("capture consent not accepted")]
    NotAccepted,
    /// Consent record unreadable or malformed.
    #[error("consent record invalid: {0}")]
    Invalid(String),
    /// Filesystem failure.
    #[error("consent io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Record
// ============================================================================

/// Persisted consent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Schema identifier.
    pub schema: String,
    /// True when the user accepted capture processing.
    pub accepted: bool,
    /// RFC 3339 acceptance timestamp, when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at_utc: Option<String>,
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Consent gate bound to one data root.
#[derive(Debug, Clone)]
pub struct ConsentGate {
    /// Consent record path.
    path: PathBuf,
}

impl ConsentGate {
    /// Creates the gate for a data root.
    #[must_use]
    pub fn for_data_root(data_root: &Path) -> Self {
        Self { path: data_root.join(CONSENT_RELPATH) }
    }

    /// Returns the current consent record, when present.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Invalid`] when the record exists but fails to
    /// parse.
    pub fn status(&self) -> Result<Option<ConsentRecord>, ConsentError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&self.path).map_err(|err| ConsentError::Io(err.to_string()))?;
        let record: ConsentRecord =
            serde_json::from_str(&text).map_err(|err| ConsentError::Invalid(err.to_string()))?;
        Ok(Some(record))
    }

    /// Preflight check: consent must exist and be accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotAccepted`] when consent is missing or
    /// refused.
    pub fn preflight(&self) -> Result<(), ConsentError> {
        match self.status()? {
            Some(record) if record.accepted => Ok(()),
            _ => Err(ConsentError::NotAccepted),
        }
    }

    /// Records acceptance (atomic `tmp + rename`).
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::Io`] when the record cannot be written.
    pub fn accept(&self, accepted_at_utc: String) -> Result<(), ConsentError> {
        let record = ConsentRecord {
            schema: CONSENT_SCHEMA.to_string(),
            accepted: true,
            accepted_at_utc: Some(accepted_at_utc),
        };
        let text = serde_json::to_string_pretty(&record)
            .map_err(|err| ConsentError::Invalid(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConsentError::Io(err.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|err| ConsentError::Io(err.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|err| ConsentError::Io(err.to_string()))?;
        Ok(())
    }
}
