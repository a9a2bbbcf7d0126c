// state-tape-scheduler/tests/gating.rs
// ============================================================================
// Module: Gating Tests
// Description: Idle-gate safety, burn-down hysteresis, and pressure.
// ============================================================================
//! ## Overview
//! Validates that zero heavy work runs while the user is active, that
//! burn-down engages and exits with hysteresis, and the pressure ladder.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Mutex;

use state_tape_core::ActivityError;
use state_tape_core::ActivitySample;
use state_tape_core::ActivitySource;
use state_tape_core::Timestamp;
use state_tape_scheduler::BacklogObservation;
use state_tape_scheduler::BatchDriver;
use state_tape_scheduler::BatchProcessor;
use state_tape_scheduler::ConsentGate;
use state_tape_scheduler::IdleGate;
use state_tape_scheduler::PressureLevel;
use state_tape_scheduler::PressureThresholds;
use state_tape_scheduler::Scheduler;
use state_tape_scheduler::SchedulerMode;

// ============================================================================
// SECTION: Fakes
// ============================================================================

/// Activity source returning a settable sample.
struct FakeActivity {
    /// Current sample.
    sample: Mutex<Option<ActivitySample>>,
}

impl FakeActivity {
    /// Creates the source with an initial sample.
    fn new(sample: Option<ActivitySample>) -> Self {
        Self { sample: Mutex::new(sample) }
    }

    /// Replaces the sample.
    fn set(&self, sample: Option<ActivitySample>) {
        *self.sample.lock().unwrap() = sample;
    }
}

impl ActivitySource for FakeActivity {
    fn sample(&self) -> Result<Option<ActivitySample>, ActivityError> {
        Ok(self.sample.lock().unwrap().clone())
    }
}

/// Processor counting heavy invocations over a fixed backlog.
struct CountingProcessor {
    /// Remaining unprocessed items.
    backlog: u64,
    /// Heavy-call count.
    calls: u64,
    /// Oldest unprocessed timestamp.
    oldest: Timestamp,
}

impl BatchProcessor for CountingProcessor {
    fn backlog(&self) -> Result<BacklogObservation, String> {
        Ok(BacklogObservation {
            oldest_unprocessed_ts: (self.backlog > 0).then_some(self.oldest),
            backlog_size: self.backlog,
        })
    }

    fn process_next(&mut self, _oldest_first: bool, max_items: usize) -> Result<u64, String> {
        self.calls += 1;
        let processed = self.backlog.min(max_items as u64);
        self.backlog -= processed;
        Ok(processed)
    }
}

/// Builds a fresh sample at the given instant.
fn sample(active: bool, now: Timestamp) -> ActivitySample {
    ActivitySample {
        active,
        last_input_ms: now,
        foreground_app: Some("editor".to_string()),
        sampled_at_ms: now,
    }
}

// ============================================================================
// SECTION: Active-User Safety
// ============================================================================

/// Tests zero heavy calls while active; processing resumes when idle.
#[test]
fn test_active_user_blocks_heavy_work() {
    let dir = tempfile::tempdir().unwrap();
    let consent = ConsentGate::for_data_root(dir.path());
    consent.accept("2026-08-01T00:00:00Z".to_string()).unwrap();
    let now = Timestamp::from_millis(1_000_000);
    let activity = FakeActivity::new(Some(sample(true, now)));
    let mut scheduler = Scheduler::new(144.0, 129.6);
    let mut processor =
        CountingProcessor { backlog: 10, calls: 0, oldest: Timestamp::from_millis(0) };
    let mut driver = BatchDriver {
        scheduler: &mut scheduler,
        idle_gate: IdleGate::new(5_000),
        consent: &consent,
        activity: &activity,
        slice_size: 4,
    };
    for _ in 0..5 {
        let outcome = driver.drive_once(&mut processor, now, PressureLevel::Green).unwrap();
        assert!(outcome.gated);
    }
    assert_eq!(processor.calls, 0);

    activity.set(Some(sample(false, now)));
    let mut total = 0;
    for _ in 0..5 {
        let outcome = driver.drive_once(&mut processor, now, PressureLevel::Green).unwrap();
        total += outcome.processed;
    }
    assert!(processor.calls > 0);
    assert_eq!(total, 10);
}

/// Tests a stale sample fails closed.
#[test]
fn test_stale_signal_fails_closed() {
    let gate = IdleGate::new(5_000);
    let now = Timestamp::from_millis(100_000);
    let stale = sample(false, Timestamp::from_millis(90_000));
    let decision = gate.evaluate(Some(&stale), now);
    assert!(decision.active);
    assert_eq!(decision.reason, "signal_stale");
    assert!(gate.evaluate(None, now).active);
}

// ============================================================================
// SECTION: Burn-Down Trip
// ============================================================================

/// Tests burn-down engages above the SLA and exits below the hysteresis
/// floor.
#[test]
fn test_burn_down_hysteresis() {
    let mut scheduler = Scheduler::new(144.0, 129.6);
    let now = Timestamp::from_millis(1_000_000_000);
    scheduler.record_processed(1, now);
    // Oldest item 180 h old with a large backlog: projection far above SLA.
    let oldest = now.saturating_add_millis(-(180 * 3_600 * 1_000));
    let state = scheduler.tick(
        now,
        BacklogObservation { oldest_unprocessed_ts: Some(oldest), backlog_size: 72 },
        PressureLevel::Green,
    );
    assert!(state.metrics.projected_catchup_hours >= 144.0);
    assert_eq!(state.mode, SchedulerMode::BurnDown);
    assert!(scheduler.admit(true).oldest_first);

    // Projection between exit (129.6) and enter (144) keeps burn-down.
    let oldest = now.saturating_add_millis(-(135 * 3_600 * 1_000));
    let state = scheduler.tick(
        now,
        BacklogObservation { oldest_unprocessed_ts: Some(oldest), backlog_size: 0 },
        PressureLevel::Green,
    );
    assert_eq!(state.mode, SchedulerMode::BurnDown);

    // Projection below the exit threshold leaves burn-down.
    let oldest = now.saturating_add_millis(-(100 * 3_600 * 1_000));
    let state = scheduler.tick(
        now,
        BacklogObservation { oldest_unprocessed_ts: Some(oldest), backlog_size: 0 },
        PressureLevel::Green,
    );
    assert_eq!(state.mode, SchedulerMode::Steady);
    assert!(!scheduler.admit(true).oldest_first);
}

// ============================================================================
// SECTION: Pressure
// ============================================================================

/// Tests the pressure ladder and its effects.
#[test]
fn test_pressure_ladder() {
    let thresholds = PressureThresholds::default();
    assert_eq!(thresholds.evaluate(0.50), PressureLevel::Green);
    assert_eq!(thresholds.evaluate(0.85), PressureLevel::Yellow);
    assert_eq!(thresholds.evaluate(0.92), PressureLevel::Red);
    assert_eq!(thresholds.evaluate(0.99), PressureLevel::Black);
    assert!(!PressureLevel::Green.pauses_derived_processing());
    assert!(PressureLevel::Yellow.pauses_derived_processing());
    assert!(PressureLevel::Red.requests_reduced_fidelity());
    assert!(PressureLevel::Black.refuses_new_captures());
}

/// Tests yellow pressure pauses admission even when idle.
#[test]
fn test_pressure_pauses_scheduler() {
    let mut scheduler = Scheduler::new(144.0, 129.6);
    let now = Timestamp::from_millis(1_000_000);
    let state = scheduler.tick(
        now,
        BacklogObservation { oldest_unprocessed_ts: None, backlog_size: 5 },
        PressureLevel::Yellow,
    );
    assert_eq!(state.mode, SchedulerMode::Paused);
    assert!(!scheduler.admit(true).admitted);
}
