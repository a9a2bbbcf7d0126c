// state-tape-scheduler/src/scheduler.rs
// ============================================================================
// Module: Backlog Scheduler
// Description: Steady-state vs burn-down admission with hysteresis.
// Purpose: Keep the projected catch-up inside the backlog SLA.
// Dependencies: state-tape-core, state-tape-config, tokio, serde
// ============================================================================

//! ## Overview
//! The scheduler owns the shared mutable state (mode and backlog metrics) as
//! a single writer and publishes atomic snapshots through a watch channel.
//! Each tick recomputes `oldest_unprocessed_age_hours`,
//! `processed_items_per_hour` and `ingested_items_per_hour` over rolling
//! 15-minute windows, and `projected_catchup_hours = oldest_age +
//! backlog / max(rate, ε)`. Burn-down engages above the SLA threshold
//! (default 144 h) and exits below threshold − 10%; while engaged, admission
//! is oldest-first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::Timestamp;
use tokio::sync::watch;

use crate::pressure::PressureLevel;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Rolling rate window (15 minutes) in milliseconds.
const RATE_WINDOW_MS: i64 = 15 * 60 * 1_000;
/// Rate floor preventing division blow-ups.
const RATE_EPSILON: f64 = 1.0e-6;

// ============================================================================
// SECTION: Snapshot Types
// ============================================================================

/// Scheduler admission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// Normal idle-gated admission.
    Steady,
    /// Oldest-first admission under backlog pressure.
    BurnDown,
    /// Processing paused (storage pressure or shutdown).
    Paused,
}

/// Backlog metrics emitted each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacklogMetrics {
    /// Age of the oldest unprocessed item in hours.
    pub oldest_unprocessed_age_hours: f64,
    /// Processing rate over the rolling window (items/hour).
    pub processed_items_per_hour: f64,
    /// Ingest rate over the rolling window (items/hour).
    pub ingested_items_per_hour: f64,
    /// Projected catch-up time in hours.
    pub projected_catchup_hours: f64,
    /// Unprocessed item count.
    pub backlog_size: u64,
}

/// Published scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Current admission mode.
    pub mode: SchedulerMode,
    /// Current storage-pressure level.
    pub pressure: PressureLevel,
    /// Latest backlog metrics.
    pub metrics: BacklogMetrics,
}

/// Backlog observation supplied by the store each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogObservation {
    /// Capture timestamp of the oldest unprocessed frame.
    pub oldest_unprocessed_ts: Option<Timestamp>,
    /// Unprocessed item count.
    pub backlog_size: u64,
}

/// Admission decision for the batch driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitDecision {
    /// True when heavy work may run this tick.
    pub admitted: bool,
    /// True when admission must drain oldest items first.
    pub oldest_first: bool,
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Single-writer backlog scheduler.
pub struct Scheduler {
    /// Burn-down entry threshold in hours.
    enter_hours: f64,
    /// Burn-down exit threshold (entry − 10%).
    exit_hours: f64,
    /// Processed-item events inside the rolling window.
    processed_events: Vec<(Timestamp, u64)>,
    /// Ingested-item events inside the rolling window.
    ingested_events: Vec<(Timestamp, u64)>,
    /// Current mode.
    mode: SchedulerMode,
    /// Snapshot publisher.
    publisher: watch::Sender<SchedulerState>,
}

impl Scheduler {
    /// Creates a scheduler with the given burn-down thresholds.
    #[must_use]
    pub fn new(enter_hours: f64, exit_hours: f64) -> Self {
        let initial = SchedulerState {
            mode: SchedulerMode::Steady,
            pressure: PressureLevel::Green,
            metrics: BacklogMetrics {
                oldest_unprocessed_age_hours: 0.0,
                processed_items_per_hour: 0.0,
                ingested_items_per_hour: 0.0,
                projected_catchup_hours: 0.0,
                backlog_size: 0,
            },
        };
        let (publisher, _) = watch::channel(initial);
        Self {
            enter_hours,
            exit_hours,
            processed_events: Vec::new(),
            ingested_events: Vec::new(),
            mode: SchedulerMode::Steady,
            publisher,
        }
    }

    /// Subscribes to published snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.publisher.subscribe()
    }

    /// Records processed items at the given time.
    pub fn record_processed(&mut self, count: u64, now: Timestamp) {
        self.processed_events.push((now, count));
        prune_window(&mut self.processed_events, now);
    }

    /// Records ingested items at the given time.
    pub fn record_ingested(&mut self, count: u64, now: Timestamp) {
        self.ingested_events.push((now, count));
        prune_window(&mut self.ingested_events, now);
    }

    /// Runs one tick: recompute metrics, update the mode with hysteresis,
    /// publish the snapshot, and return it.
    pub fn tick(
        &mut self,
        now: Timestamp,
        observation: BacklogObservation,
        pressure: PressureLevel,
    ) -> SchedulerState {
        prune_window(&mut self.processed_events, now);
        prune_window(&mut self.ingested_events, now);
        let oldest_age_hours = observation
            .oldest_unprocessed_ts
            .map_or(0.0, |oldest| millis_to_hours(now.saturating_millis_since(oldest)));
        let processed_rate = window_rate(&self.processed_events);
        let ingested_rate = window_rate(&self.ingested_events);
        let projected = oldest_age_hours
            + observation.backlog_size as f64 / processed_rate.max(RATE_EPSILON);
        self.mode = if pressure.pauses_derived_processing() {
            SchedulerMode::Paused
        } else {
            match self.mode {
                SchedulerMode::BurnDown if projected < self.exit_hours => SchedulerMode::Steady,
                SchedulerMode::BurnDown => SchedulerMode::BurnDown,
                _ if projected > self.enter_hours => SchedulerMode::BurnDown,
                SchedulerMode::Paused => SchedulerMode::Steady,
                mode => mode,
            }
        };
        let state = SchedulerState {
            mode: self.mode,
            pressure,
            metrics: BacklogMetrics {
                oldest_unprocessed_age_hours: oldest_age_hours,
                processed_items_per_hour: processed_rate,
                ingested_items_per_hour: ingested_rate,
                projected_catchup_hours: projected,
                backlog_size: observation.backlog_size,
            },
        };
        let _ = self.publisher.send(state);
        state
    }

    /// Returns the admission decision for the current mode and gate state.
    #[must_use]
    pub fn admit(&self, idle: bool) -> AdmitDecision {
        match self.mode {
            SchedulerMode::Paused => AdmitDecision { admitted: false, oldest_first: false },
            SchedulerMode::Steady => AdmitDecision { admitted: idle, oldest_first: false },
            SchedulerMode::BurnDown => AdmitDecision { admitted: idle, oldest_first: true },
        }
    }

    /// Returns the current mode.
    #[must_use]
    pub const fn mode(&self) -> SchedulerMode {
        self.mode
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Drops events older than the rolling window.
fn prune_window(events: &mut Vec<(Timestamp, u64)>, now: Timestamp) {
    events.retain(|(ts, _)| now.saturating_millis_since(*ts) <= RATE_WINDOW_MS);
}

/// Items/hour over the rolling window.
fn window_rate(events: &[(Timestamp, u64)]) -> f64 {
    let total: u64 = events.iter().map(|(_, count)| count).sum();
    let window_hours = RATE_WINDOW_MS as f64 / 3_600_000.0;
    total as f64 / window_hours
}

/// Converts milliseconds to hours, clamped at zero.
fn millis_to_hours(millis: i64) -> f64 {
    (millis.max(0)) as f64 / 3_600_000.0
}
