// state-tape-cli/src/client.rs
// ============================================================================
// Module: Popup Query Client
// Description: HTTP client for the loopback query API with retry policy.
// Purpose: Issue popup queries with bounded retries and token refresh.
// Dependencies: reqwest, serde_json, state-tape-query
// ============================================================================

//! ## Overview
//! The client fetches the process-scoped bearer token, posts popup queries,
//! and applies the documented retry policy: two retries with 200 ms and
//! 600 ms backoff, one token refresh on `401`, and a 12 s network timeout.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Network timeout for every request.
const NETWORK_TIMEOUT: Duration = Duration::from_secs(12);
/// Backoff delays between retries.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(200), Duration::from_millis(600)];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure after the retry budget.
    #[error("query client transport error: {0}")]
    Transport(String),
    /// Authentication failed even after a token refresh.
    #[error("query client auth failed")]
    Auth,
    /// The server returned a non-success status.
    #[error("query client http status {0}")]
    Status(u16),
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Popup query client bound to one server base URL.
pub struct QueryClient {
    /// HTTP client with the network timeout applied.
    http: reqwest::Client,
    /// Server base URL (e.g. `http://127.0.0.1:8743`).
    base_url: String,
    /// Cached bearer token.
    token: Option<String>,
}

impl QueryClient {
    /// Creates a client for the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the HTTP client cannot build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(NETWORK_TIMEOUT)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self { http, base_url: base_url.into(), token: None })
    }

    /// Fetches (or refreshes) the process-scoped token.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or status failures.
    pub async fn refresh_token(&mut self) -> Result<(), ClientError> {
        let url = format!("{}/api/auth/token", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        let body: Value =
            response.json().await.map_err(|err| ClientError::Transport(err.to_string()))?;
        self.token = body.get("token").and_then(Value::as_str).map(ToString::to_string);
        if self.token.is_none() {
            return Err(ClientError::Auth);
        }
        Ok(())
    }

    /// Posts one popup query with the documented retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] after the retry and refresh budget is spent.
    pub async fn popup(
        &mut self,
        query: &str,
        max_citations: Option<u32>,
    ) -> Result<Value, ClientError> {
        if self.token.is_none() {
            self.refresh_token().await?;
        }
        let mut refreshed = false;
        let mut attempt = 0_usize;
        loop {
            match self.popup_once(query, max_citations).await {
                Ok(value) => return Ok(value),
                Err(ClientError::Status(401)) if !refreshed => {
                    // One refresh, then one more try.
                    refreshed = true;
                    self.refresh_token().await?;
                }
                Err(error) => {
                    if attempt >= RETRY_BACKOFF.len() {
                        return Err(error);
                    }
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One popup request without retries.
    async fn popup_once(
        &self,
        query: &str,
        max_citations: Option<u32>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}/api/query/popup", self.base_url);
        let token = self.token.as_deref().unwrap_or_default();
        let mut body = json!({ "query": query });
        if let Some(cap) = max_citations {
            body["max_citations"] = json!(cap);
        }
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        response.json().await.map_err(|err| ClientError::Transport(err.to_string()))
    }
}
