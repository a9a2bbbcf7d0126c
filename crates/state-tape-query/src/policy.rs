// state-tape-query/src/policy.rs
// ============================================================================
// Module: Evidence Policy Gate
// Description: Redaction, app denylist, and export flags for bundles.
// Purpose: Guarantee nothing sensitive leaves the evidence compiler.
// Dependencies: regex, state-tape-core, state-tape-config
// ============================================================================

//! ## Overview
//! Every text snippet entering a bundle passes the redaction pass: emails,
//! IPv4 addresses, long hex runs, JWT-like strings, and API-key-like tokens
//! are replaced with `[REDACTED:<type>:<sha256-prefix>]`. After the pass the
//! detectors run again; any residue refuses the snippet entirely (the
//! artifact is quarantined for audit, never silently dropped). Artifacts
//! whose `app_hint` matches the denylist are excluded before compilation.
//! Export flags default to refuse-all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use state_tape_config::PolicyConfig;
use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::hash_bytes;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Policy gate errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Redaction could not guarantee completeness; the hit is refused.
    #[error("redaction residue detected: {0}")]
    RedactionResidue(String),
    /// Policy denied the artifact with a caller-visible reason.
    #[error("policy denied: {0}")]
    Denied(String),
}

// ============================================================================
// SECTION: Patterns
// ============================================================================

/// Compiles a pattern literal.
#[allow(clippy::expect_used, reason = "pattern literals are compile-time constants")]
fn compile_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid pattern literal")
}

/// Email addresses.
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| compile_pattern(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"));

/// IPv4 addresses.
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| compile_pattern(r"\b(?:\d{1,3}\.){3}\d{1,3}\b"));

/// Long hex runs (32+ chars), e.g. digests and raw keys.
static LONG_HEX: LazyLock<Regex> = LazyLock::new(|| compile_pattern(r"\b[0-9a-fA-F]{32,}\b"));

/// JWT-like three-part base64url tokens.
static JWT_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    compile_pattern(r"\beyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\b")
});

/// API-key-like tokens (vendor prefixes plus long opaque suffixes).
static API_KEY_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    compile_pattern(r"\b(?:sk|pk|rk|ghp|gho|xoxb|xoxp|AKIA|ASIA)[A-Za-z0-9_-]{12,}\b")
});

/// Ordered detector table; order fixes replacement determinism.
fn detectors() -> [(&'static str, &'static Regex); 5] {
    [
        ("email", &EMAIL),
        ("jwt", &JWT_LIKE),
        ("api_key", &API_KEY_LIKE),
        ("hex", &LONG_HEX),
        ("ipv4", &IPV4),
    ]
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Result of one redaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    /// Redacted text.
    pub text: String,
    /// True when any replacement happened.
    pub applied: bool,
}

/// Redacts every detected pattern in the text.
#[must_use]
pub fn redact(text: &str) -> Redacted {
    let mut out = text.to_string();
    let mut applied = false;
    for (label, pattern) in detectors() {
        let mut next = String::with_capacity(out.len());
        let mut cursor = 0_usize;
        for found in pattern.find_iter(&out) {
            applied = true;
            next.push_str(&out[cursor..found.start()]);
            let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, found.as_str().as_bytes());
            next.push_str(&format!("[REDACTED:{label}:{}]", digest.prefix(8)));
            cursor = found.end();
        }
        next.push_str(&out[cursor..]);
        out = next;
    }
    Redacted { text: out, applied }
}

/// Redacts and verifies completeness; residue refuses the text.
///
/// # Errors
///
/// Returns [`PolicyError::RedactionResidue`] when a detector still matches
/// after the pass.
pub fn redact_checked(text: &str) -> Result<Redacted, PolicyError> {
    let redacted = redact(text);
    if let Some(label) = residue_label(&redacted.text) {
        return Err(PolicyError::RedactionResidue(label.to_string()));
    }
    Ok(redacted)
}

/// Returns the first detector that still matches outside redaction markers.
#[must_use]
pub fn residue_label(text: &str) -> Option<&'static str> {
    // Strip the markers themselves: their hash prefixes are not residue.
    static MARKER: LazyLock<Regex> =
        LazyLock::new(|| compile_pattern(r"\[REDACTED:[a-z_]+:[0-9a-f]{1,16}\]"));
    let stripped = MARKER.replace_all(text, "");
    for (label, pattern) in detectors() {
        if pattern.is_match(&stripped) {
            return Some(label);
        }
    }
    None
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Policy gate configured from the closed policy record.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    /// Closed policy configuration.
    config: PolicyConfig,
}

impl PolicyGate {
    /// Creates the gate.
    #[must_use]
    pub const fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Returns true when the app hint is denied.
    #[must_use]
    pub fn app_denied(&self, app_hint: Option<&str>) -> bool {
        app_hint.is_some_and(|app| self.config.app_denylist.contains(app))
    }

    /// Export flag: raw media visibility (default false).
    #[must_use]
    pub const fn can_show_raw_media(&self) -> bool {
        self.config.can_show_raw_media
    }

    /// Export flag: text export (default false).
    #[must_use]
    pub const fn can_export_text(&self) -> bool {
        self.config.can_export_text
    }
}
