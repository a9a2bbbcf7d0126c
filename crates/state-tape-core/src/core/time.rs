// state-tape-core/src/core/time.rs
// ============================================================================
// Module: State Tape Time Model
// Description: Canonical millisecond timestamps and half-open time ranges.
// Purpose: Provide deterministic, replayable time values across tape records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every persisted State Tape record carries explicit unix-epoch millisecond
//! timestamps. The core never reads wall-clock time; ingest, scheduler, and
//! server boundaries supply timestamps so replays and tests stay
//! deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads
///   wall-clock time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }

    /// Returns the saturating difference `self - other` in milliseconds.
    #[must_use]
    pub const fn saturating_millis_since(self, other: Self) -> i64 {
        self.0.saturating_sub(other.0)
    }

    /// Returns the timestamp advanced by the given number of milliseconds.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Time Range
// ============================================================================

/// Half-open time range `[start, end)` in unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive range start.
    pub start: Timestamp,
    /// Exclusive range end.
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a range covering all representable time.
    #[must_use]
    pub const fn all() -> Self {
        Self { start: Timestamp::from_millis(i64::MIN), end: Timestamp::from_millis(i64::MAX) }
    }

    /// Creates a new half-open range.
    #[must_use]
    pub const fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Returns true when the timestamp falls inside the range.
    #[must_use]
    pub const fn contains(&self, ts: Timestamp) -> bool {
        ts.millis() >= self.start.millis() && ts.millis() < self.end.millis()
    }

    /// Returns true when the range is empty or inverted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start.millis() >= self.end.millis()
    }
}
