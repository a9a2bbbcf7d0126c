// state-tape-extract/tests/phash_and_assign.rs
// ============================================================================
// Module: pHash and Assignment Tests
// Description: Tests for perceptual hashing and the Hungarian solver.
// ============================================================================
//! ## Overview
//! Validates fingerprint stability, Hamming behavior, and optimal
//! assignment on small matrices.

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

use state_tape_extract::assign::solve_assignment;
use state_tape_extract::hamming_distance;
use state_tape_extract::phash::phash_from_hex;
use state_tape_extract::phash::phash_to_hex;
use state_tape_extract::phash_gray;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds a grayscale plane with a bright rectangle at the given origin.
fn plane_with_rect(width: u32, height: u32, x0: usize, y0: usize) -> Vec<u8> {
    let mut plane = vec![30_u8; (width * height) as usize];
    for y in y0..(y0 + 20).min(height as usize) {
        for x in x0..(x0 + 40).min(width as usize) {
            plane[y * width as usize + x] = 220;
        }
    }
    plane
}

// ============================================================================
// SECTION: pHash
// ============================================================================

/// Tests the hash is identical for identical planes.
#[test]
fn test_phash_identical_planes() {
    let a = plane_with_rect(128, 96, 10, 10);
    let b = plane_with_rect(128, 96, 10, 10);
    assert_eq!(phash_gray(&a, 128, 96), phash_gray(&b, 128, 96));
}

/// Tests a moved rectangle produces a nonzero distance and an inverted
/// image a large one.
#[test]
fn test_phash_distances() {
    let base = plane_with_rect(128, 96, 10, 10);
    let moved = plane_with_rect(128, 96, 70, 60);
    let inverted: Vec<u8> = base.iter().map(|value| 255 - value).collect();
    let hash_base = phash_gray(&base, 128, 96);
    let hash_moved = phash_gray(&moved, 128, 96);
    let hash_inverted = phash_gray(&inverted, 128, 96);
    assert!(hamming_distance(hash_base, hash_moved) > 0);
    assert!(hamming_distance(hash_base, hash_inverted) >= 12);
}

/// Tests the stable hex form round-trips.
#[test]
fn test_phash_hex_roundtrip() {
    let plane = plane_with_rect(64, 64, 5, 5);
    let hash = phash_gray(&plane, 64, 64);
    assert_eq!(phash_from_hex(&phash_to_hex(hash)), Some(hash));
}

// ============================================================================
// SECTION: Assignment
// ============================================================================

/// Tests the solver finds the optimal assignment on a 3×3 matrix.
#[test]
fn test_assignment_optimal() {
    // Row i prefers column i except row 0 strongly prefers column 1.
    let costs = vec![
        9.0, 1.0, 8.0, //
        1.0, 9.0, 8.0, //
        8.0, 9.0, 1.0,
    ];
    let assignment = solve_assignment(&costs, 3, 3);
    assert_eq!(assignment, vec![Some(1), Some(0), Some(2)]);
}

/// Tests rectangular matrices pad correctly and skip phantom columns.
#[test]
fn test_assignment_rectangular() {
    let costs = vec![
        0.1, 5.0, //
        5.0, 0.2, //
        3.0, 4.0,
    ];
    let assignment = solve_assignment(&costs, 3, 2);
    assert_eq!(assignment[0], Some(0));
    assert_eq!(assignment[1], Some(1));
    assert_eq!(assignment[2], None);
}

/// Tests the empty matrix degenerates cleanly.
#[test]
fn test_assignment_empty() {
    assert!(solve_assignment(&[], 0, 0).is_empty());
    assert_eq!(solve_assignment(&[], 2, 0), vec![None, None]);
}
