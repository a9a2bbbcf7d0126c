// state-tape-query/src/auth.rs
// ============================================================================
// Module: Query API Auth
// Description: Process-scoped bearer tokens with constant-time checks.
// Purpose: Gate the loopback query API behind a per-process token.
// Dependencies: subtle, state-tape-core
// ============================================================================

//! ## Overview
//! `GET /api/auth/token` issues one bearer token scoped to the server
//! process; every popup query must present it. Verification uses a
//! constant-time comparison so the token cannot be probed byte-by-byte.
//! Tokens never persist: a restart mints a new one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use state_tape_core::DEFAULT_HASH_ALGORITHM;
use state_tape_core::hash_bytes;
use subtle::ConstantTimeEq;

// ============================================================================
// SECTION: Token Issuer
// ============================================================================

/// Process-scoped bearer token issuer.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    /// The process token.
    token: String,
}

impl TokenIssuer {
    /// Mints the process token from process identity and start instant.
    #[must_use]
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let seed = format!("state-tape:{}:{nanos}", process::id());
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, seed.as_bytes());
        Self { token: format!("stt-{}", digest.value) }
    }

    /// Creates an issuer with a fixed token (tests only).
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Returns the process token for issuance.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Verifies an `Authorization` header value in constant time.
    #[must_use]
    pub fn verify_bearer(&self, header: Option<&str>) -> bool {
        let Some(header) = header else {
            return false;
        };
        let Some(presented) = header.strip_prefix("Bearer ") else {
            return false;
        };
        let expected = self.token.as_bytes();
        let presented = presented.trim().as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected.ct_eq(presented).into()
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}
