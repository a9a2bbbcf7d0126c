// state-tape-query/src/server.rs
// ============================================================================
// Module: Query HTTP API
// Description: Loopback-only popup query and token endpoints.
// Purpose: Serve evidence-only answers with a deadline and bearer auth.
// Dependencies: axum, tokio, crate::{auth, bundle, engine}
// ============================================================================

//! ## Overview
//! Two endpoints: `POST /api/query/popup` (bearer-authenticated) and
//! `GET /api/auth/token`. The server refuses non-loopback binds, rejects
//! `schedule_extract` (the query path never schedules work), enforces the
//! citation cap, and converts an elapsed deadline into the deterministic
//! `timeout` outcome. The handler path performs no writes and no model
//! calls.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde_json::json;
use thiserror::Error;

use crate::auth::TokenIssuer;
use crate::bundle::PopupRequest;
use crate::bundle::PopupResponse;
use crate::bundle::QueryOutcome;
use crate::engine::QueryEngine;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hard citation ceiling.
const MAX_CITATIONS_CEILING: u32 = 32;
/// Default citation count when the request leaves it unset.
const DEFAULT_CITATIONS: u32 = 8;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server configuration errors.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Refused a non-loopback bind address.
    #[error("refusing non-loopback bind: {0}")]
    NonLoopbackBind(SocketAddr),
    /// Listener failure.
    #[error("server io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: API Context
// ============================================================================

/// Shared state for the API handlers.
pub struct ApiContext {
    /// The read-only query engine.
    pub engine: Arc<QueryEngine>,
    /// Bearer token issuer.
    pub issuer: TokenIssuer,
    /// Default citation cap.
    pub max_citations: u32,
    /// Popup deadline in milliseconds.
    pub popup_timeout_ms: u64,
}

/// Builds the API router.
#[must_use]
pub fn router(context: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/api/query/popup", post(popup))
        .route("/api/auth/token", get(issue_token))
        .with_state(context)
}

/// Serves the router on a loopback address.
///
/// # Errors
///
/// Returns [`ServeError`] for non-loopback binds or listener failures.
pub async fn serve(addr: SocketAddr, context: Arc<ApiContext>) -> Result<(), ServeError> {
    if !addr.ip().is_loopback() {
        return Err(ServeError::NonLoopbackBind(addr));
    }
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ServeError::Io(err.to_string()))?;
    axum::serve(listener, router(context))
        .await
        .map_err(|err| ServeError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `GET /api/auth/token`: issues the process-scoped token.
async fn issue_token(State(context): State<Arc<ApiContext>>) -> impl IntoResponse {
    Json(json!({ "token": context.issuer.token() }))
}

/// `POST /api/query/popup`: the evidence-only query endpoint.
async fn popup(
    State(context): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<PopupRequest>,
) -> impl IntoResponse {
    let auth_header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    if !context.issuer.verify_bearer(auth_header) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "reason": "invalid bearer token" })),
        )
            .into_response();
    }
    if request.schedule_extract == Some(true) {
        // The query path is read-only: scheduling requests are refused with
        // a caller-visible reason, never silently honored.
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "ok": false,
                "reason": "schedule_extract is not permitted on the query path"
            })),
        )
            .into_response();
    }
    let max_citations = request
        .max_citations
        .unwrap_or(context.max_citations.min(DEFAULT_CITATIONS))
        .min(MAX_CITATIONS_CEILING) as usize;
    let engine = Arc::clone(&context.engine);
    let query = request.query.clone();
    let started = Instant::now();
    let deadline = Duration::from_millis(context.popup_timeout_ms);
    let outcome = tokio::time::timeout(
        deadline,
        tokio::task::spawn_blocking(move || {
            let latency = started.elapsed().as_millis() as u64;
            engine.execute(&query, max_citations, latency)
        }),
    )
    .await;
    let response = match outcome {
        Ok(Ok(mut response)) => {
            response.latency_ms_total = started.elapsed().as_millis() as u64;
            response
        }
        Ok(Err(join_error)) => PopupResponse {
            ok: false,
            query: request.query,
            query_run_id: String::new(),
            state: QueryOutcome::Error,
            summary: String::new(),
            bullets: Vec::new(),
            topic: String::new(),
            confidence_pct: 0,
            needs_processing: false,
            processing_blocked_reason: Some(join_error.to_string()),
            scheduled_extract_job_id: None,
            latency_ms_total: started.elapsed().as_millis() as u64,
            citations: Vec::new(),
        },
        Err(_elapsed) => PopupResponse {
            ok: true,
            query: request.query,
            query_run_id: String::new(),
            state: QueryOutcome::Timeout,
            summary: String::new(),
            bullets: Vec::new(),
            topic: String::new(),
            confidence_pct: 0,
            needs_processing: false,
            processing_blocked_reason: Some("query deadline exceeded".to_string()),
            scheduled_extract_job_id: None,
            latency_ms_total: started.elapsed().as_millis() as u64,
            citations: Vec::new(),
        },
    };
    (StatusCode::OK, Json(response)).into_response()
}
