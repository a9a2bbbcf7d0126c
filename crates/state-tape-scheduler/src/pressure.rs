// state-tape-scheduler/src/pressure.rs
// ============================================================================
// Module: Storage Pressure
// Description: Green/yellow/red/black storage state machine.
// Purpose: Shed load progressively without ever deleting evidence.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Storage pressure is orthogonal to the idle gate. Yellow pauses derived
//! processing, red additionally requests reduced capture fidelity, black
//! stops accepting new captures. No level deletes evidence; reclamation is
//! the TTL sweeper's job and touches only expired media.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Levels
// ============================================================================

/// Storage pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    /// Normal operation.
    Green,
    /// Derived processing paused.
    Yellow,
    /// Capture fidelity reduction requested.
    Red,
    /// New captures refused.
    Black,
}

impl PressureLevel {
    /// True when derived (Stage-2) processing must pause.
    #[must_use]
    pub const fn pauses_derived_processing(&self) -> bool {
        matches!(self, Self::Yellow | Self::Red | Self::Black)
    }

    /// True when the capture host should reduce fidelity.
    #[must_use]
    pub const fn requests_reduced_fidelity(&self) -> bool {
        matches!(self, Self::Red | Self::Black)
    }

    /// True when new captures are refused.
    #[must_use]
    pub const fn refuses_new_captures(&self) -> bool {
        matches!(self, Self::Black)
    }
}

// ============================================================================
// SECTION: Thresholds
// ============================================================================

/// Disk-usage fractions at which each level engages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureThresholds {
    /// Yellow engages at or above this used fraction.
    pub yellow: f64,
    /// Red engages at or above this used fraction.
    pub red: f64,
    /// Black engages at or above this used fraction.
    pub black: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self { yellow: 0.80, red: 0.90, black: 0.95 }
    }
}

impl PressureThresholds {
    /// Evaluates the level for a used-space fraction.
    #[must_use]
    pub fn evaluate(&self, used_fraction: f64) -> PressureLevel {
        if used_fraction >= self.black {
            PressureLevel::Black
        } else if used_fraction >= self.red {
            PressureLevel::Red
        } else if used_fraction >= self.yellow {
            PressureLevel::Yellow
        } else {
            PressureLevel::Green
        }
    }
}
