// state-tape-index/src/vector.rs
// ============================================================================
// Module: Vector Index
// Description: Deterministic linear-scan retrieval with an ANN snapshot.
// Purpose: Rank span embeddings by cosine similarity.
// Dependencies: state-tape-core
// ============================================================================

//! ## Overview
//! The default retrieval path is an exact linear scan, which is fully
//! deterministic. The optional ANN snapshot is rebuild-on-commit (no
//! incremental updates): it hashes the corpus into a version, prefilters by
//! random-hyperplane signature, and reranks exactly. Queries against a
//! snapshot whose version does not match the live corpus are refused; the
//! caller falls back to the linear scan.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::HashDigest;
use state_tape_core::StateId;
use state_tape_core::cosine_similarity;
use state_tape_core::hash_bytes;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hyperplane count for the snapshot signature.
const ANN_PLANES: usize = 16;
/// Fixed seed for snapshot hyperplanes.
const ANN_SEED: u64 = 0x1d5c_42a7_9f36_08be;
/// Hamming radius of signature buckets probed before exact rerank.
const ANN_PROBE_RADIUS: u32 = 3;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Vector index errors.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    /// The snapshot was built over a different corpus.
    #[error("ann snapshot version mismatch: snapshot {snapshot}, corpus {corpus}")]
    SnapshotVersionMismatch {
        /// Snapshot corpus version.
        snapshot: String,
        /// Live corpus version.
        corpus: String,
    },
}

// ============================================================================
// SECTION: Vector Index
// ============================================================================

/// One scored hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Matching span.
    pub state_id: StateId,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f64,
}

/// Exact vector index over span embeddings.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Entries in insertion order (sorted on rebuild).
    entries: Vec<(StateId, Vec<f32>)>,
}

impl VectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one embedding, keeping entries sorted by span id.
    pub fn insert(&mut self, state_id: StateId, embedding: Vec<f32>) {
        match self.entries.binary_search_by(|(id, _)| id.cmp(&state_id)) {
            Ok(position) => self.entries[position].1 = embedding,
            Err(position) => self.entries.insert(position, (state_id, embedding)),
        }
    }

    /// Entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no embeddings are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact top-K by cosine similarity; ties break on the span id.
    #[must_use]
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|(state_id, embedding)| VectorHit {
                state_id: state_id.clone(),
                score: cosine_similarity(query, embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.state_id.cmp(&b.state_id))
        });
        hits.truncate(k);
        hits
    }

    /// Canonical version of the live corpus.
    #[must_use]
    pub fn corpus_version(&self) -> HashDigest {
        let mut bytes = Vec::new();
        for (state_id, embedding) in &self.entries {
            bytes.extend_from_slice(state_id.as_str().as_bytes());
            for value in embedding {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes)
    }
}

// ============================================================================
// SECTION: ANN Snapshot
// ============================================================================

/// Rebuild-on-commit approximate snapshot, version-gated.
#[derive(Debug, Clone)]
pub struct AnnSnapshot {
    /// Corpus version the snapshot was built over.
    version: HashDigest,
    /// Fixed random hyperplanes.
    planes: Vec<Vec<f32>>,
    /// Signatures per entry, aligned with the index order at build time.
    signatures: Vec<(u32, StateId, Vec<f32>)>,
}

impl AnnSnapshot {
    /// Builds a snapshot over the current corpus.
    #[must_use]
    pub fn build(index: &VectorIndex) -> Self {
        let dim = index.entries.first().map_or(0, |(_, embedding)| embedding.len());
        let planes = hyperplanes(dim);
        let signatures = index
            .entries
            .iter()
            .map(|(state_id, embedding)| {
                (signature(&planes, embedding), state_id.clone(), embedding.clone())
            })
            .collect();
        Self { version: index.corpus_version(), planes, signatures }
    }

    /// Returns the snapshot corpus version.
    #[must_use]
    pub const fn version(&self) -> &HashDigest {
        &self.version
    }

    /// Approximate top-K: signature prefilter then exact rerank.
    ///
    /// # Errors
    ///
    /// Returns [`VectorIndexError::SnapshotVersionMismatch`] when the live
    /// corpus moved since the snapshot was built.
    pub fn top_k(
        &self,
        live: &VectorIndex,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, VectorIndexError> {
        let corpus = live.corpus_version();
        if corpus != self.version {
            return Err(VectorIndexError::SnapshotVersionMismatch {
                snapshot: self.version.value.clone(),
                corpus: corpus.value,
            });
        }
        let query_signature = signature(&self.planes, query);
        let mut hits: Vec<VectorHit> = self
            .signatures
            .iter()
            .filter(|(sig, _, _)| (sig ^ query_signature).count_ones() <= ANN_PROBE_RADIUS)
            .map(|(_, state_id, embedding)| VectorHit {
                state_id: state_id.clone(),
                score: cosine_similarity(query, embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.state_id.cmp(&b.state_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Generates the fixed hyperplanes from the embedded seed.
fn hyperplanes(dim: usize) -> Vec<Vec<f32>> {
    let mut state = ANN_SEED;
    let mut planes = Vec::with_capacity(ANN_PLANES);
    for _ in 0..ANN_PLANES {
        let mut plane = Vec::with_capacity(dim);
        for _ in 0..dim {
            state = splitmix64(state);
            let unit = (state >> 11) as f64 / (1_u64 << 53) as f64;
            plane.push(((unit * 2.0) - 1.0) as f32);
        }
        planes.push(plane);
    }
    planes
}

/// Hyperplane signature of one vector.
fn signature(planes: &[Vec<f32>], vector: &[f32]) -> u32 {
    let mut out = 0_u32;
    for (bit, plane) in planes.iter().enumerate() {
        let dot: f64 = plane
            .iter()
            .zip(vector.iter())
            .map(|(a, b)| f64::from(*a) * f64::from(*b))
            .sum();
        if dot >= 0.0 {
            out |= 1_u32 << bit;
        }
    }
    out
}

/// One splitmix64 step.
const fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
