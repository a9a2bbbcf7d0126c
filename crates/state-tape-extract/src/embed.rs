// state-tape-extract/src/embed.rs
// ============================================================================
// Module: Deterministic Embeddings
// Description: Feature-hash embeddings and the fixed pooling projection.
// Purpose: Produce replayable span embeddings without model inference.
// Dependencies: state-tape-core
// ============================================================================

//! ## Overview
//! The baseline embedder is fully deterministic: text embeds by signed
//! feature hashing, regions embed by an 8×8 luminance pooling, apps and
//! window-title hashes embed by bucketed one-hots. The pooling projection
//! matrix ships with the build: it is generated from an embedded fixed seed,
//! and its content hash is recorded in every span's provenance. A trainable
//! predictor may replace the baseline only through the approved-model list
//! in configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::HashDigest;
use state_tape_core::ImagePatch;
use state_tape_core::hash_bytes;
use state_tape_core::quantize_f32;
use state_tape_core::unit_normalize;

// ============================================================================
// SECTION: Dimensions
// ============================================================================

/// Text embedding dimension.
pub const TEXT_EMBED_DIM: usize = 64;
/// Region embedding dimension (8×8 luminance pooling).
pub const REGION_EMBED_DIM: usize = 64;
/// Application one-hot bucket count.
pub const APP_EMBED_DIM: usize = 16;
/// Window-title hash bucket count.
pub const WINDOW_EMBED_DIM: usize = 16;
/// Concatenated feature dimension fed to the projection.
pub const CONCAT_DIM: usize = TEXT_EMBED_DIM + REGION_EMBED_DIM + APP_EMBED_DIM + WINDOW_EMBED_DIM;
/// Output span embedding dimension.
pub const Z_DIM: usize = 64;

/// Fixed seed for the shipped projection matrix.
const PROJECTION_SEED: u64 = 0x7a9e_3d41_c852_6b90;

// ============================================================================
// SECTION: Deterministic Mixing
// ============================================================================

/// One splitmix64 step, used for feature hashing and matrix generation.
const fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Hashes a byte string to a 64-bit value via iterated splitmix.
fn mix_bytes(bytes: &[u8]) -> u64 {
    let mut state = 0x51ab_7e3c_9d20_f845_u64;
    for byte in bytes {
        state = splitmix64(state ^ u64::from(*byte));
    }
    state
}

// ============================================================================
// SECTION: Feature Embeddings
// ============================================================================

/// Embeds normalized text by signed feature hashing over whitespace terms.
#[must_use]
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut out = vec![0.0_f32; TEXT_EMBED_DIM];
    for term in text.split_whitespace() {
        let lowered = term.to_lowercase();
        let mixed = mix_bytes(lowered.as_bytes());
        let index = (mixed % TEXT_EMBED_DIM as u64) as usize;
        let sign = if (mixed >> 63) == 0 { 1.0 } else { -1.0 };
        out[index] += sign;
    }
    unit_normalize(&mut out);
    out
}

/// Embeds a pixel region by pooling luminance into an 8×8 grid.
#[must_use]
pub fn embed_region(patch: &ImagePatch) -> Vec<f32> {
    let mut out = vec![0.0_f32; REGION_EMBED_DIM];
    if patch.width == 0 || patch.height == 0 {
        return out;
    }
    let (w, h) = (patch.width as usize, patch.height as usize);
    for cell_y in 0..8_usize {
        let y0 = cell_y * h / 8;
        let y1 = ((cell_y + 1) * h / 8).max(y0 + 1).min(h);
        for cell_x in 0..8_usize {
            let x0 = cell_x * w / 8;
            let x1 = ((cell_x + 1) * w / 8).max(x0 + 1).min(w);
            let mut sum = 0.0_f64;
            let mut count = 0.0_f64;
            for y in y0..y1 {
                for x in x0..x1 {
                    let base = (y * w + x) * 3;
                    if base + 2 < patch.rgb.len() {
                        let r = f64::from(patch.rgb[base]);
                        let g = f64::from(patch.rgb[base + 1]);
                        let b = f64::from(patch.rgb[base + 2]);
                        sum += 0.299 * r + 0.587 * g + 0.114 * b;
                        count += 1.0;
                    }
                }
            }
            let mean = if count > 0.0 { sum / count / 255.0 } else { 0.0 };
            out[cell_y * 8 + cell_x] = mean as f32;
        }
    }
    unit_normalize(&mut out);
    out
}

/// Embeds an application name into its one-hot bucket.
#[must_use]
pub fn embed_app(app: &str) -> Vec<f32> {
    let mut out = vec![0.0_f32; APP_EMBED_DIM];
    if !app.is_empty() {
        let index = (mix_bytes(app.as_bytes()) % APP_EMBED_DIM as u64) as usize;
        out[index] = 1.0;
    }
    out
}

/// Embeds a window-title hash into its bucket set.
#[must_use]
pub fn embed_window_hash(window_title_hash: &HashDigest) -> Vec<f32> {
    let mut out = vec![0.0_f32; WINDOW_EMBED_DIM];
    let mixed = mix_bytes(window_title_hash.value.as_bytes());
    out[(mixed % WINDOW_EMBED_DIM as u64) as usize] = 1.0;
    out[((mixed >> 32) % WINDOW_EMBED_DIM as u64) as usize] += 0.5;
    out
}

// ============================================================================
// SECTION: Pooling Projection
// ============================================================================

/// The shipped pooling projection: a fixed `Z_DIM × CONCAT_DIM` matrix.
#[derive(Debug, Clone)]
pub struct PoolingProjection {
    /// Row-major matrix entries.
    matrix: Vec<f32>,
    /// Content hash of the quantized matrix.
    matrix_hash: HashDigest,
}

impl PoolingProjection {
    /// Generates the shipped projection from the embedded seed.
    #[must_use]
    pub fn shipped() -> Self {
        let mut matrix = Vec::with_capacity(Z_DIM * CONCAT_DIM);
        let mut state = PROJECTION_SEED;
        for _ in 0..(Z_DIM * CONCAT_DIM) {
            state = splitmix64(state);
            // Map to a symmetric interval; quantize so the hash replays.
            let unit = (state >> 11) as f64 / (1_u64 << 53) as f64;
            matrix.push(quantize_f32(((unit * 2.0) - 1.0) as f32));
        }
        let mut bytes = Vec::with_capacity(matrix.len() * 4);
        for value in &matrix {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let matrix_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
        Self { matrix, matrix_hash }
    }

    /// Returns the matrix content hash recorded in span provenance.
    #[must_use]
    pub const fn matrix_hash(&self) -> &HashDigest {
        &self.matrix_hash
    }

    /// Projects the concatenated feature vector to a unit-normalized span
    /// embedding.
    #[must_use]
    pub fn project(&self, concat: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0_f32; Z_DIM];
        for (row, slot) in out.iter_mut().enumerate() {
            let mut sum = 0.0_f64;
            let base = row * CONCAT_DIM;
            for (col, value) in concat.iter().enumerate().take(CONCAT_DIM) {
                sum += f64::from(self.matrix[base + col]) * f64::from(*value);
            }
            *slot = sum as f32;
        }
        unit_normalize(&mut out);
        for value in &mut out {
            *value = quantize_f32(*value);
        }
        out
    }
}

/// Concatenates the four feature blocks in their documented order.
#[must_use]
pub fn concat_features(
    region: &[f32],
    text: &[f32],
    app: &[f32],
    window: &[f32],
) -> Vec<f32> {
    let mut out = Vec::with_capacity(CONCAT_DIM);
    out.extend_from_slice(&region[..REGION_EMBED_DIM.min(region.len())]);
    out.resize(REGION_EMBED_DIM, 0.0);
    out.extend_from_slice(&text[..TEXT_EMBED_DIM.min(text.len())]);
    out.resize(REGION_EMBED_DIM + TEXT_EMBED_DIM, 0.0);
    out.extend_from_slice(&app[..APP_EMBED_DIM.min(app.len())]);
    out.resize(REGION_EMBED_DIM + TEXT_EMBED_DIM + APP_EMBED_DIM, 0.0);
    out.extend_from_slice(&window[..WINDOW_EMBED_DIM.min(window.len())]);
    out.resize(CONCAT_DIM, 0.0);
    out
}
