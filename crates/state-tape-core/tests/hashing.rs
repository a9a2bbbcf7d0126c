// state-tape-core/tests/hashing.rs
// ============================================================================
// Module: Hashing Tests
// Description: Tests for canonical JSON hashing and float quantization.
// ============================================================================
//! ## Overview
//! Validates deterministic hashing using RFC 8785 canonicalization.

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

use serde_json::json;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::hash_bytes;
use state_tape_core::hash_canonical_json;
use state_tape_core::quantize_f32;
use state_tape_core::quantize_f64;

// ============================================================================
// SECTION: Canonical Hashing
// ============================================================================

/// Tests canonical json hash is stable under key reordering.
#[test]
fn test_canonical_json_hash_is_stable() {
    let value_a = json!({"b": 1, "a": 2});
    let value_b = json!({"a": 2, "b": 1});

    let hash_a = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &value_a).unwrap();
    let hash_b = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &value_b).unwrap();

    assert_eq!(hash_a, hash_b);
}

/// Tests byte hashing produces lowercase hex sha-256.
#[test]
fn test_hash_bytes_known_vector() {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, b"");
    assert_eq!(
        digest.value,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

/// Tests digest prefix helper clamps to the digest length.
#[test]
fn test_digest_prefix() {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, b"prefix");
    assert_eq!(digest.prefix(8).len(), 8);
    assert_eq!(digest.prefix(1024), digest.value.as_str());
}

// ============================================================================
// SECTION: Quantization
// ============================================================================

/// Tests quantization collapses sub-epsilon float noise.
#[test]
fn test_quantization_collapses_noise() {
    let a = quantize_f32(0.123_456_71);
    let b = quantize_f32(0.123_456_74);
    assert_eq!(a.to_bits(), b.to_bits());
    assert_eq!(quantize_f64(1.000_000_000_4), 1.0);
}

/// Tests non-finite inputs quantize to zero.
#[test]
fn test_quantization_non_finite() {
    assert_eq!(quantize_f32(f32::NAN), 0.0);
    assert_eq!(quantize_f64(f64::INFINITY), 0.0);
}
