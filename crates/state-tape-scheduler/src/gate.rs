// state-tape-scheduler/src/gate.rs
// ============================================================================
// Module: Idle Gate
// Description: Fail-closed admission of heavy processing.
// Purpose: Admit batch work only when the user is demonstrably idle.
// Dependencies: state-tape-core
// ============================================================================

//! ## Overview
//! The gate reads the most recent activity sample and admits heavy work only
//! when the sample says idle and is fresh. A missing or stale sample (older
//! than the configured window, default 5 s) is treated as active: the gate
//! fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::ActivitySample;
use state_tape_core::ActivitySource;
use state_tape_core::Timestamp;

// ============================================================================
// SECTION: Decision
// ============================================================================

/// One gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// True when the user counts as active (heavy work refused).
    pub active: bool,
    /// Stable reason label for audit and metrics.
    pub reason: &'static str,
}

impl GateDecision {
    /// Returns true when heavy work may run.
    #[must_use]
    pub const fn admits_heavy_work(&self) -> bool {
        !self.active
    }
}

// ============================================================================
// SECTION: Idle Gate
// ============================================================================

/// Fail-closed idle gate.
#[derive(Debug, Clone, Copy)]
pub struct IdleGate {
    /// Sample staleness window in milliseconds.
    stale_ms: u64,
}

impl IdleGate {
    /// Creates a gate with the given staleness window.
    #[must_use]
    pub const fn new(stale_ms: u64) -> Self {
        Self { stale_ms }
    }

    /// Evaluates the gate against a sample at the given time.
    #[must_use]
    pub fn evaluate(&self, sample: Option<&ActivitySample>, now: Timestamp) -> GateDecision {
        let Some(sample) = sample else {
            return GateDecision { active: true, reason: "signal_missing" };
        };
        let age = now.saturating_millis_since(sample.sampled_at_ms);
        if age < 0 || age as u64 > self.stale_ms {
            return GateDecision { active: true, reason: "signal_stale" };
        }
        if sample.active {
            return GateDecision { active: true, reason: "user_active" };
        }
        GateDecision { active: false, reason: "idle" }
    }

    /// Samples the source and evaluates in one step; source errors fail
    /// closed.
    #[must_use]
    pub fn evaluate_source(&self, source: &dyn ActivitySource, now: Timestamp) -> GateDecision {
        match source.sample() {
            Ok(sample) => self.evaluate(sample.as_ref(), now),
            Err(_) => GateDecision { active: true, reason: "signal_error" },
        }
    }
}
