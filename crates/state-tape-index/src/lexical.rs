// state-tape-index/src/lexical.rs
// ============================================================================
// Module: Lexical Index
// Description: Deterministic inverted index with BM25 scoring.
// Purpose: Rank artifacts by normalized text across every text surface.
// Dependencies: state-tape-core
// ============================================================================

//! ## Overview
//! The inverted index covers `norm_text` across OCR spans, UI labels, window
//! titles, code snippets, and cell values. Postings carry `{artifact_id,
//! bbox, ts_ms}` and stay sorted, so reindexing a stable corpus reproduces
//! identical postings byte-for-byte. Scoring is BM25 with the conventional
//! `k1 = 1.2`, `b = 0.75`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use state_tape_core::ArtifactId;
use state_tape_core::BBox;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::HashDigest;
use state_tape_core::Timestamp;
use state_tape_core::canonical_json_bytes;
use state_tape_core::hash_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// BM25 term-frequency saturation.
const BM25_K1: f64 = 1.2;
/// BM25 length normalization.
const BM25_B: f64 = 0.75;

// ============================================================================
// SECTION: Postings
// ============================================================================

/// One posting for a term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Posting {
    /// Owning artifact.
    pub artifact_id: ArtifactId,
    /// Region of the matched text, when positional.
    pub bbox: Option<[i32; 4]>,
    /// Artifact timestamp.
    pub ts_ms: Timestamp,
}

// ============================================================================
// SECTION: Lexical Index
// ============================================================================

/// Deterministic BM25 inverted index.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    /// Postings per term, sorted.
    postings: BTreeMap<String, Vec<Posting>>,
    /// Token counts per document.
    doc_lengths: BTreeMap<String, u64>,
    /// Total indexed token count.
    total_tokens: u64,
}

impl LexicalIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes one text field of a document.
    pub fn insert_field(
        &mut self,
        artifact_id: &ArtifactId,
        ts_ms: Timestamp,
        text: &str,
        bbox: Option<&BBox>,
    ) {
        for term in tokenize(text) {
            let posting = Posting {
                artifact_id: artifact_id.clone(),
                bbox: bbox.map(|bbox| <[i32; 4]>::from(*bbox)),
                ts_ms,
            };
            let list = self.postings.entry(term).or_default();
            match list.binary_search(&posting) {
                Ok(_) => {}
                Err(position) => list.insert(position, posting),
            }
            *self.doc_lengths.entry(artifact_id.as_str().to_string()).or_insert(0) += 1;
            self.total_tokens += 1;
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Searches the index, returning `(artifact, score, first posting)`
    /// ranked by descending BM25 score with the artifact id as tiebreaker.
    #[must_use]
    pub fn search(&self, query: &str, limit: usize) -> Vec<(ArtifactId, f64, Posting)> {
        let document_count = self.doc_lengths.len() as f64;
        if document_count == 0.0 {
            return Vec::new();
        }
        let average_length = self.total_tokens as f64 / document_count;
        let mut scores: BTreeMap<&str, (f64, &Posting)> = BTreeMap::new();
        for term in tokenize(query) {
            let Some(postings) = self.postings.get(&term) else {
                continue;
            };
            // Document frequency for the term.
            let mut doc_ids: Vec<&str> =
                postings.iter().map(|posting| posting.artifact_id.as_str()).collect();
            doc_ids.dedup();
            let df = doc_ids.len() as f64;
            let idf = (((document_count - df + 0.5) / (df + 0.5)) + 1.0).ln();
            let mut term_frequency: BTreeMap<&str, (u64, &Posting)> = BTreeMap::new();
            for posting in postings {
                let entry = term_frequency
                    .entry(posting.artifact_id.as_str())
                    .or_insert((0, posting));
                entry.0 += 1;
            }
            for (doc, (tf, posting)) in term_frequency {
                let doc_len = self.doc_lengths.get(doc).copied().unwrap_or(1) as f64;
                let tf = tf as f64;
                let score = idf * (tf * (BM25_K1 + 1.0))
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / average_length));
                let entry = scores.entry(doc).or_insert((0.0, posting));
                entry.0 += score;
            }
        }
        let mut ranked: Vec<(ArtifactId, f64, Posting)> = scores
            .into_iter()
            .map(|(doc, (score, posting))| (ArtifactId::new(doc), score, posting.clone()))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Canonical fingerprint over all postings, for idempotence checks.
    #[must_use]
    pub fn fingerprint(&self) -> HashDigest {
        canonical_json_bytes(&self.postings)
            .map(|bytes| hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes))
            .unwrap_or_else(|_| hash_bytes(DEFAULT_HASH_ALGORITHM, b""))
    }
}

// ============================================================================
// SECTION: Tokenization
// ============================================================================

/// Lowercased alphanumeric tokenization.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}
