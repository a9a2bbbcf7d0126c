// state-tape-core/src/core/hashing.rs
// ============================================================================
// Module: State Tape Hashing Primitives
// Description: Canonical-JSON digests, raw-byte digests, and quantization.
// Purpose: Make every artifact identifier a pure function of its content.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Artifact identifiers must replay exactly: the same plugin, config, and
//! payload must produce the same id on any machine, in any run. To get
//! there, structured values are serialized through RFC 8785 canonicalization
//! (keys ordered, numbers in their one canonical form) before SHA-256, while
//! media bytes hash as-is. Float fields are the one remaining wobble source,
//! so payload builders round them through [`quantize_f32`]/[`quantize_f64`]
//! ahead of canonicalization.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Digest algorithms the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256; currently the only admissible algorithm.
    Sha256,
}

/// Algorithm used when callers do not pick one explicitly.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// Decimal places floats are rounded to before entering a hashed payload.
pub const FLOAT_QUANTIZATION_PLACES: u32 = 6;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// A digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    /// Producing algorithm.
    pub algorithm: HashAlgorithm,
    /// Digest bytes rendered as lowercase hex.
    pub value: String,
}

impl HashDigest {
    /// Wraps raw digest bytes in their hex form.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self { algorithm, value: hex_encode(bytes) }
    }

    /// Returns up to `n` leading hex characters, useful for short labels.
    #[must_use]
    pub fn prefix(&self, n: usize) -> &str {
        let end = n.min(self.value.len());
        &self.value[..end]
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures while turning a value into its canonical bytes.
#[derive(Debug, Error)]
pub enum HashError {
    /// The value could not be serialized canonically.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Serializes a value into its RFC 8785 canonical byte form.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the value refuses to
/// serialize (for example a map with non-string keys).
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Canonicalizes a value and digests the resulting bytes.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when canonical serialization
/// fails; the digest step itself cannot fail.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Digests raw bytes directly (media blobs, file contents).
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

// ============================================================================
// SECTION: Float Quantization
// ============================================================================

/// Rounds an `f32` to [`FLOAT_QUANTIZATION_PLACES`] decimal places.
///
/// NaN and infinities collapse to zero: a payload entering the hash must
/// not carry values canonical JSON cannot represent.
#[must_use]
pub fn quantize_f32(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10_f64.powi(cast_places());
    let scaled = (f64::from(value) * scale).round() / scale;
    scaled as f32
}

/// Rounds an `f64` to [`FLOAT_QUANTIZATION_PLACES`] decimal places.
///
/// NaN and infinities collapse to zero, as with [`quantize_f32`].
#[must_use]
pub fn quantize_f64(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10_f64.powi(cast_places());
    (value * scale).round() / scale
}

/// The quantization place count as the signed exponent `powi` expects.
const fn cast_places() -> i32 {
    FLOAT_QUANTIZATION_PLACES as i32
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Renders digest bytes as lowercase hex, two characters per byte.
fn hex_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(ALPHABET[usize::from(byte >> 4)] as char);
        out.push(ALPHABET[usize::from(byte & 0x0f)] as char);
    }
    out
}
