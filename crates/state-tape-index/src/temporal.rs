// state-tape-index/src/temporal.rs
// ============================================================================
// Module: Time and Structure Indexes
// Description: Timestamp and element-type lookup structures.
// Purpose: Resolve instants to tape entities and types to artifacts.
// Dependencies: state-tape-core
// ============================================================================

//! ## Overview
//! The time index maps millisecond instants to the state, delta, and action
//! identifiers live at that instant (B-tree range semantics). The structure
//! index maps element types to the screen states containing them. Both are
//! derived and fully rebuildable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::ArtifactId;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;

// ============================================================================
// SECTION: Time Index
// ============================================================================

/// Entity kinds resolvable by instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEntryKind {
    /// A state span covers the instant.
    State,
    /// A delta event landed at the instant.
    Delta,
    /// An action event landed at the instant.
    Action,
}

/// One time-index entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeEntry {
    /// Entry kind.
    pub kind: TimeEntryKind,
    /// Referenced artifact.
    pub artifact_id: ArtifactId,
}

/// B-tree time index.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TimeIndex {
    /// Entries keyed by millisecond instant.
    entries: BTreeMap<i64, Vec<TimeEntry>>,
}

impl TimeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one entry at an instant, keeping per-instant order.
    pub fn insert(&mut self, ts: Timestamp, entry: TimeEntry) {
        let list = self.entries.entry(ts.millis()).or_default();
        if let Err(position) = list.binary_search(&entry) {
            list.insert(position, entry);
        }
    }

    /// Returns entries inside the half-open range, in time order.
    #[must_use]
    pub fn range(&self, range: TimeRange) -> Vec<(Timestamp, TimeEntry)> {
        self.entries
            .range(range.start.millis()..range.end.millis())
            .flat_map(|(ts, list)| {
                list.iter().map(|entry| (Timestamp::from_millis(*ts), entry.clone()))
            })
            .collect()
    }

    /// Entry count across all instants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// True when the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// SECTION: Structure Index
// ============================================================================

/// Element-type lookup over screen states.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StructureIndex {
    /// Artifacts per element-type label, sorted.
    entries: BTreeMap<String, Vec<(ArtifactId, i64)>>,
}

impl StructureIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that an artifact contains an element of the given type.
    pub fn insert(&mut self, type_label: &str, artifact_id: &ArtifactId, ts: Timestamp) {
        let list = self.entries.entry(type_label.to_string()).or_default();
        let entry = (artifact_id.clone(), ts.millis());
        if let Err(position) = list.binary_search(&entry) {
            list.insert(position, entry);
        }
    }

    /// Returns artifacts containing the element type inside a range.
    #[must_use]
    pub fn lookup(&self, type_label: &str, range: TimeRange) -> Vec<ArtifactId> {
        self.entries.get(type_label).map_or_else(Vec::new, |list| {
            list.iter()
                .filter(|(_, ts)| range.contains(Timestamp::from_millis(*ts)))
                .map(|(artifact_id, _)| artifact_id.clone())
                .collect()
        })
    }
}
