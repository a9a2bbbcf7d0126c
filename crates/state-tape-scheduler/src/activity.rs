// state-tape-scheduler/src/activity.rs
// ============================================================================
// Module: Activity Signal Source
// Description: File-backed activity source for the idle gate.
// Purpose: Read the capture host's periodic activity signal.
// Dependencies: state-tape-core, serde_json
// ============================================================================

//! ## Overview
//! The upstream capture host writes `activity/activity_signal.json` into the
//! data root. A missing file reads as "no signal", which the idle gate
//! treats as active (fail closed).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use state_tape_core::ActivityError;
use state_tape_core::ActivitySample;
use state_tape_core::ActivitySource;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Signal location relative to the data root.
pub const ACTIVITY_SIGNAL_RELPATH: &str = "activity/activity_signal.json";

// ============================================================================
// SECTION: File Source
// ============================================================================

/// Activity source reading the signal file under the data root.
#[derive(Debug, Clone)]
pub struct FileActivitySource {
    /// Signal file path.
    path: PathBuf,
}

impl FileActivitySource {
    /// Creates a source for the conventional signal path under a data root.
    #[must_use]
    pub fn for_data_root(data_root: &Path) -> Self {
        Self { path: data_root.join(ACTIVITY_SIGNAL_RELPATH) }
    }

    /// Creates a source for an explicit path.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ActivitySource for FileActivitySource {
    fn sample(&self) -> Result<Option<ActivitySample>, ActivityError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|err| ActivityError::Unavailable(err.to_string()))?;
        let sample: ActivitySample = serde_json::from_str(&text)
            .map_err(|err| ActivityError::Unavailable(err.to_string()))?;
        Ok(Some(sample))
    }
}
