// state-tape-scheduler/src/lib.rs
// ============================================================================
// Module: State Tape Scheduler Library
// Description: Public API surface for gating and backlog scheduling.
// Purpose: Expose the idle gate, scheduler, pressure machine, and consent.
// Dependencies: crate::{activity, batch, consent, gate, pressure, scheduler}
// ============================================================================

//! ## Overview
//! The scheduling layer: fail-closed idle gating, steady-state vs burn-down
//! backlog admission with hysteresis, the storage-pressure state machine,
//! the consent preflight, and the gated batch driver that composes them.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod activity;
pub mod batch;
pub mod consent;
pub mod gate;
pub mod pools;
pub mod pressure;
pub mod scheduler;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use activity::ACTIVITY_SIGNAL_RELPATH;
pub use activity::FileActivitySource;
pub use batch::BatchDriver;
pub use batch::BatchError;
pub use batch::BatchProcessor;
pub use batch::DriveOutcome;
pub use consent::CONSENT_RELPATH;
pub use consent::ConsentError;
pub use consent::ConsentGate;
pub use consent::ConsentRecord;
pub use gate::GateDecision;
pub use gate::IdleGate;
pub use pools::ResourcePools;
pub use pressure::PressureLevel;
pub use pressure::PressureThresholds;
pub use scheduler::AdmitDecision;
pub use scheduler::BacklogMetrics;
pub use scheduler::BacklogObservation;
pub use scheduler::Scheduler;
pub use scheduler::SchedulerMode;
pub use scheduler::SchedulerState;
