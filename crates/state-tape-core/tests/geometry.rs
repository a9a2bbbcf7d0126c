// state-tape-core/tests/geometry.rs
// ============================================================================
// Module: Geometry Tests
// Description: Tests for validated bounding boxes.
// ============================================================================
//! ## Overview
//! Validates bbox construction, clipping, and IoU behavior.

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

use state_tape_core::BBox;

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Tests inverted and empty boxes are rejected.
#[test]
fn test_degenerate_boxes_rejected() {
    assert!(BBox::new(10, 10, 10, 20).is_err());
    assert!(BBox::new(10, 10, 5, 20).is_err());
    assert!(BBox::new(0, 0, 1, 1).is_ok());
}

/// Tests serde array form round-trips.
#[test]
fn test_serde_array_roundtrip() {
    let bbox = BBox::new(1, 2, 30, 40).unwrap();
    let json = serde_json::to_string(&bbox).unwrap();
    assert_eq!(json, "[1,2,30,40]");
    let back: BBox = serde_json::from_str(&json).unwrap();
    assert_eq!(back, bbox);
}

/// Tests degenerate serde input is refused rather than clamped.
#[test]
fn test_serde_rejects_degenerate() {
    let result: Result<BBox, _> = serde_json::from_str("[5,5,5,9]");
    assert!(result.is_err());
}

// ============================================================================
// SECTION: Clipping and IoU
// ============================================================================

/// Tests clipping to frame bounds.
#[test]
fn test_clip_to_frame() {
    let bbox = BBox::new(-5, -5, 50, 50).unwrap();
    let clipped = bbox.clip_to_frame(40, 30).unwrap();
    assert_eq!(<[i32; 4]>::from(clipped), [0, 0, 40, 30]);
    let outside = BBox::new(100, 100, 120, 120).unwrap();
    assert!(outside.clip_to_frame(40, 30).is_none());
}

/// Tests IoU of identical, disjoint, and half-overlapping boxes.
#[test]
fn test_iou() {
    let a = BBox::new(0, 0, 10, 10).unwrap();
    let b = BBox::new(0, 0, 10, 10).unwrap();
    let c = BBox::new(20, 20, 30, 30).unwrap();
    let d = BBox::new(5, 0, 15, 10).unwrap();
    assert!((a.iou(&b) - 1.0).abs() < 1e-9);
    assert!(a.iou(&c).abs() < 1e-9);
    let expected = 50.0 / 150.0;
    assert!((a.iou(&d) - expected).abs() < 1e-9);
}

/// Tests xywh conversion for evidence references.
#[test]
fn test_to_xywh() {
    let bbox = BBox::new(3, 4, 13, 24).unwrap();
    assert_eq!(bbox.to_xywh(), [3, 4, 10, 20]);
}
