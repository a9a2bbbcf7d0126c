// state-tape-core/src/core/geometry.rs
// ============================================================================
// Module: State Tape Geometry
// Description: Integer bounding boxes with validated construction.
// Purpose: Enforce bbox invariants at the type level for all artifacts.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! All State Tape coordinates use a top-left origin. A bounding box is the
//! integer rectangle `[x1, y1, x2, y2]` with inclusive-exclusive bounds.
//! Construction rejects empty or inverted boxes; clipping to frame bounds
//! returns `None` when nothing remains. Artifacts holding a bbox that fails
//! validation are dropped, never silently clamped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when constructing bounding boxes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// The box is empty or inverted.
    #[error("degenerate bbox: [{x1}, {y1}, {x2}, {y2}]")]
    Degenerate {
        /// Left edge.
        x1: i32,
        /// Top edge.
        y1: i32,
        /// Right edge (exclusive).
        x2: i32,
        /// Bottom edge (exclusive).
        y2: i32,
    },
}

// ============================================================================
// SECTION: Bounding Box
// ============================================================================

/// Integer bounding box `[x1, y1, x2, y2]`, inclusive-exclusive, top-left
/// origin.
///
/// # Invariants
/// - `x1 < x2` and `y1 < y2` (enforced at construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    /// Left edge.
    x1: i32,
    /// Top edge.
    y1: i32,
    /// Right edge (exclusive).
    x2: i32,
    /// Bottom edge (exclusive).
    y2: i32,
}

impl BBox {
    /// Creates a validated bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Degenerate`] when the box is empty or
    /// inverted.
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, GeometryError> {
        if x1 >= x2 || y1 >= y2 {
            return Err(GeometryError::Degenerate { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Returns the left edge.
    #[must_use]
    pub const fn x1(&self) -> i32 {
        self.x1
    }

    /// Returns the top edge.
    #[must_use]
    pub const fn y1(&self) -> i32 {
        self.y1
    }

    /// Returns the exclusive right edge.
    #[must_use]
    pub const fn x2(&self) -> i32 {
        self.x2
    }

    /// Returns the exclusive bottom edge.
    #[must_use]
    pub const fn y2(&self) -> i32 {
        self.y2
    }

    /// Returns the box width in pixels.
    #[must_use]
    pub const fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    /// Returns the box height in pixels.
    #[must_use]
    pub const fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    /// Returns the box area in square pixels.
    #[must_use]
    pub const fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Returns the intersection of two boxes, or `None` when disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        Self::new(x1, y1, x2, y2).ok()
    }

    /// Returns intersection-over-union in `[0, 1]`.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = self.intersect(other).map_or(0, |b| b.area());
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f64 / union as f64
    }

    /// Returns true when `other` lies fully inside this box.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    /// Clips the box to frame bounds, returning `None` when nothing remains.
    #[must_use]
    pub fn clip_to_frame(&self, width: u32, height: u32) -> Option<Self> {
        let fw = i64::from(width).min(i64::from(i32::MAX)) as i32;
        let fh = i64::from(height).min(i64::from(i32::MAX)) as i32;
        Self::new(self.x1.max(0), self.y1.max(0), self.x2.min(fw), self.y2.min(fh)).ok()
    }

    /// Returns true when the box lies fully inside the frame bounds.
    #[must_use]
    pub fn within_frame(&self, width: u32, height: u32) -> bool {
        self.clip_to_frame(width, height) == Some(*self)
    }

    /// Returns the box in `[x, y, w, h]` form for evidence references.
    #[must_use]
    pub const fn to_xywh(&self) -> [i32; 4] {
        [self.x1, self.y1, (self.x2 - self.x1), (self.y2 - self.y1)]
    }

    /// Returns the vertical overlap in pixels with another box.
    #[must_use]
    pub const fn y_overlap(&self, other: &Self) -> i64 {
        let top = if self.y1 > other.y1 { self.y1 } else { other.y1 };
        let bottom = if self.y2 < other.y2 { self.y2 } else { other.y2 };
        let overlap = bottom as i64 - top as i64;
        if overlap > 0 { overlap } else { 0 }
    }
}

impl TryFrom<[i32; 4]> for BBox {
    type Error = GeometryError;

    fn try_from(value: [i32; 4]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BBox> for [i32; 4] {
    fn from(value: BBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}
