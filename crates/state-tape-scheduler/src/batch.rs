// state-tape-scheduler/src/batch.rs
// ============================================================================
// Module: Batch Driver
// Description: Gated drain loop over an abstract batch processor.
// Purpose: Run Stage-2 processing only when every gate admits it.
// Dependencies: state-tape-core, crate::{consent, gate, pressure, scheduler}
// ============================================================================

//! ## Overview
//! The driver composes the consent gate, storage pressure, the idle gate,
//! and the backlog scheduler around an abstract [`BatchProcessor`]. One
//! `drive_once` evaluates every gate at the current instant and processes at
//! most one admission slice; callers loop it. Zero heavy work happens while
//! any gate refuses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::ActivitySource;
use state_tape_core::Timestamp;
use thiserror::Error;

use crate::consent::ConsentError;
use crate::consent::ConsentGate;
use crate::gate::IdleGate;
use crate::pressure::PressureLevel;
use crate::scheduler::BacklogObservation;
use crate::scheduler::Scheduler;
use crate::scheduler::SchedulerState;

// ============================================================================
// SECTION: Processor Contract
// ============================================================================

/// Abstract Stage-2 processor driven by the scheduler.
pub trait BatchProcessor {
    /// Observes the current backlog.
    ///
    /// # Errors
    ///
    /// Returns a message on store failures.
    fn backlog(&self) -> Result<BacklogObservation, String>;

    /// Processes up to `max_items` unprocessed items, oldest first when
    /// requested. Returns the number processed.
    ///
    /// # Errors
    ///
    /// Returns a message on processing failures.
    fn process_next(&mut self, oldest_first: bool, max_items: usize) -> Result<u64, String>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Batch driver errors.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Consent preflight refused the run.
    #[error("batch refused: {0}")]
    Consent(#[from] ConsentError),
    /// Backlog observation failed.
    #[error("batch backlog error: {0}")]
    Backlog(String),
    /// Processing failed.
    #[error("batch processing error: {0}")]
    Processing(String),
}

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Outcome of one drive iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveOutcome {
    /// Items processed this iteration.
    pub processed: u64,
    /// Snapshot after the tick.
    pub state: SchedulerState,
    /// True when a gate refused admission.
    pub gated: bool,
}

/// Gated batch driver.
pub struct BatchDriver<'a> {
    /// Backlog scheduler (single writer).
    pub scheduler: &'a mut Scheduler,
    /// Idle gate.
    pub idle_gate: IdleGate,
    /// Consent gate.
    pub consent: &'a ConsentGate,
    /// Activity source.
    pub activity: &'a dyn ActivitySource,
    /// Items admitted per iteration.
    pub slice_size: usize,
}

impl BatchDriver<'_> {
    /// Evaluates every gate once and processes at most one slice.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] on preflight or processing failures.
    pub fn drive_once(
        &mut self,
        processor: &mut dyn BatchProcessor,
        now: Timestamp,
        pressure: PressureLevel,
    ) -> Result<DriveOutcome, BatchError> {
        self.consent.preflight()?;
        let observation =
            processor.backlog().map_err(BatchError::Backlog)?;
        let state = self.scheduler.tick(now, observation, pressure);
        let decision = self.idle_gate.evaluate_source(self.activity, now);
        let admit = self.scheduler.admit(decision.admits_heavy_work());
        if !admit.admitted {
            return Ok(DriveOutcome { processed: 0, state, gated: true });
        }
        let processed = processor
            .process_next(admit.oldest_first, self.slice_size)
            .map_err(BatchError::Processing)?;
        if processed > 0 {
            self.scheduler.record_processed(processed, now);
        }
        Ok(DriveOutcome { processed, state, gated: false })
    }
}
