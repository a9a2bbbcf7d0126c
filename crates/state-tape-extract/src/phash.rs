// state-tape-extract/src/phash.rs
// ============================================================================
// Module: Perceptual Hashing
// Description: 64-bit DCT perceptual hash for state-boundary detection.
// Purpose: Provide a deterministic visual fingerprint per frame.
// Dependencies: none (pure math)
// ============================================================================

//! ## Overview
//! The perceptual hash downscales the grayscale frame to 32×32, applies a
//! 2D DCT-II, keeps the top-left 8×8 coefficient block excluding the DC
//! term, and thresholds each coefficient against the median. The result is a
//! 64-bit fingerprint whose Hamming distance tracks visual change.

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Downscale edge used before the DCT.
const PHASH_EDGE: usize = 32;
/// Low-frequency block edge kept from the DCT.
const PHASH_BLOCK: usize = 8;

// ============================================================================
// SECTION: Grayscale Downscale
// ============================================================================

/// Downscales an 8-bit grayscale plane to `PHASH_EDGE`² by box averaging.
fn downscale_gray(gray: &[u8], width: u32, height: u32) -> [f64; PHASH_EDGE * PHASH_EDGE] {
    let mut out = [0.0_f64; PHASH_EDGE * PHASH_EDGE];
    if width == 0 || height == 0 {
        return out;
    }
    let (w, h) = (width as usize, height as usize);
    for (oy, row) in out.chunks_exact_mut(PHASH_EDGE).enumerate() {
        let y0 = oy * h / PHASH_EDGE;
        let y1 = (((oy + 1) * h).div_ceil(PHASH_EDGE)).max(y0 + 1).min(h.max(1));
        for (ox, slot) in row.iter_mut().enumerate() {
            let x0 = ox * w / PHASH_EDGE;
            let x1 = (((ox + 1) * w).div_ceil(PHASH_EDGE)).max(x0 + 1).min(w.max(1));
            let mut sum = 0.0_f64;
            let mut count = 0.0_f64;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += f64::from(gray[y * w + x]);
                    count += 1.0;
                }
            }
            *slot = if count > 0.0 { sum / count } else { 0.0 };
        }
    }
    out
}

// ============================================================================
// SECTION: DCT
// ============================================================================

/// Applies a separable 2D DCT-II over the 32×32 plane.
fn dct_2d(plane: &[f64; PHASH_EDGE * PHASH_EDGE]) -> [f64; PHASH_EDGE * PHASH_EDGE] {
    let n = PHASH_EDGE;
    let mut rows = [0.0_f64; PHASH_EDGE * PHASH_EDGE];
    for y in 0..n {
        for u in 0..n {
            let mut sum = 0.0_f64;
            for x in 0..n {
                let angle =
                    std::f64::consts::PI * (x as f64 + 0.5) * u as f64 / n as f64;
                sum += plane[y * n + x] * angle.cos();
            }
            rows[y * n + u] = sum;
        }
    }
    let mut out = [0.0_f64; PHASH_EDGE * PHASH_EDGE];
    for u in 0..n {
        for v in 0..n {
            let mut sum = 0.0_f64;
            for y in 0..n {
                let angle =
                    std::f64::consts::PI * (y as f64 + 0.5) * v as f64 / n as f64;
                sum += rows[y * n + u] * angle.cos();
            }
            out[v * n + u] = sum;
        }
    }
    out
}

// ============================================================================
// SECTION: Hash
// ============================================================================

/// Computes the 64-bit perceptual hash of an 8-bit grayscale plane.
#[must_use]
pub fn phash_gray(gray: &[u8], width: u32, height: u32) -> u64 {
    let small = downscale_gray(gray, width, height);
    let dct = dct_2d(&small);
    // Top-left 8×8 block, excluding the DC coefficient.
    let mut coefficients = Vec::with_capacity(PHASH_BLOCK * PHASH_BLOCK - 1);
    for v in 0..PHASH_BLOCK {
        for u in 0..PHASH_BLOCK {
            if u == 0 && v == 0 {
                continue;
            }
            coefficients.push(dct[v * PHASH_EDGE + u]);
        }
    }
    let mut sorted = coefficients.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = sorted[sorted.len() / 2];
    let mut hash = 0_u64;
    for (bit, coefficient) in coefficients.iter().enumerate() {
        if *coefficient > median {
            hash |= 1_u64 << bit;
        }
    }
    hash
}

/// Hamming distance between two perceptual hashes.
#[must_use]
pub const fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Converts a hash to its stable lowercase hex form.
#[must_use]
pub fn phash_to_hex(hash: u64) -> String {
    format!("{hash:016x}")
}

/// Parses the stable hex form back into a hash.
#[must_use]
pub fn phash_from_hex(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex, 16).ok()
}

/// Mean absolute difference between two downscaled grayscale planes, used as
/// the cheap visual diff when the Hamming distance is ambiguous.
#[must_use]
pub fn downscaled_diff(
    gray_a: &[u8],
    width_a: u32,
    height_a: u32,
    gray_b: &[u8],
    width_b: u32,
    height_b: u32,
) -> f64 {
    let a = downscale_gray(gray_a, width_a, height_a);
    let b = downscale_gray(gray_b, width_b, height_b);
    let mut sum = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += (x - y).abs();
    }
    sum / (PHASH_EDGE * PHASH_EDGE) as f64
}
