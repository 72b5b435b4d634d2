// toolgate-gateway/src/server.rs
// ============================================================================
// Module: Gateway HTTP Edge
// Description: Thin HTTP surface over the proxy and its query interfaces.
// Purpose: Expose tool-call, approval, audit, and health routes.
// Dependencies: toolgate-core, axum, tokio, crate::orchestrator
// ============================================================================

//! ## Overview
//! The edge exposes the proxy (`POST /v1/tool-call`), the approval-query
//! interface (`GET /v1/approvals`, `POST /v1/approvals/{id}`, SSE change
//! events), the audit-query interface (`GET /v1/audit`), and a liveness
//! probe. Authentication, TLS, and CORS are the deployment's concern; the
//! edge validates payload shape only and maps outcomes onto status codes:
//! denials are 403, client errors 400, upstream failures 502.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde_json::value::RawValue;
use thiserror::Error;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use toolgate_core::ApprovalError;
use toolgate_core::ApprovalQueue;
use toolgate_core::AuditStore;
use toolgate_core::HumanDecision;
use toolgate_core::PolicySnapshotSource;
use toolgate_core::ToolCallRequest;
use uuid::Uuid;

use crate::orchestrator::ProxyService;
use crate::orchestrator::ToolCallOutcome;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// HTTP edge errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listen address failed.
    #[error("bind failed: {0}")]
    Bind(String),
    /// The server loop terminated abnormally.
    #[error("server failed: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared state for the edge handlers.
#[derive(Clone)]
pub struct AppState {
    /// Proxy orchestrator.
    pub proxy: Arc<ProxyService>,
    /// Approval queue for the dashboard collaborator.
    pub approvals: ApprovalQueue,
    /// Audit store for the dashboard collaborator.
    pub audit: Arc<dyn AuditStore>,
    /// Policy snapshot source for the liveness probe.
    pub policies: Arc<dyn PolicySnapshotSource>,
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Response wrapper for tool calls.
#[derive(Debug, Serialize)]
struct ToolCallResponse {
    /// Whether the call succeeded end to end.
    success: bool,
    /// Upstream body when successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Box<RawValue>>,
    /// Denial reason or error message otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ToolCallResponse {
    /// Success wrapper around the upstream body.
    fn success(result: Box<RawValue>) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failure wrapper carrying a reason.
    fn failure(error: String) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Decision payload accepted from the dashboard.
#[derive(Debug, Deserialize)]
struct DecideRequest {
    /// Whether the call is approved.
    approved: bool,
    /// Reason for the decision; required for denials.
    #[serde(default)]
    reason: String,
    /// Identity of the decider.
    #[serde(default)]
    decided_by: String,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the edge router over the shared state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/tool-call", post(handle_tool_call))
        .route("/v1/approvals", get(handle_list_approvals))
        .route("/v1/approvals/:id", post(handle_decide))
        .route("/v1/approvals/events", get(handle_approval_events))
        .route("/v1/audit", get(handle_audit))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

/// Serves the edge until the shutdown future resolves.
///
/// # Errors
///
/// Returns [`ServerError`] when binding or serving fails.
pub async fn serve(
    bind: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| ServerError::Bind(err.to_string()))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| ServerError::Serve(err.to_string()))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `POST /v1/tool-call`.
async fn handle_tool_call(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let request: ToolCallRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ToolCallResponse::failure(format!("invalid request body: {err}"))),
            );
        }
    };
    match state.proxy.handle(request).await {
        ToolCallOutcome::Success {
            result,
        } => (StatusCode::OK, Json(ToolCallResponse::success(result))),
        ToolCallOutcome::Denied {
            reason,
        } => (StatusCode::FORBIDDEN, Json(ToolCallResponse::failure(reason))),
        ToolCallOutcome::ClientError {
            message,
        } => (StatusCode::BAD_REQUEST, Json(ToolCallResponse::failure(message))),
        ToolCallOutcome::UpstreamError {
            message,
        } => (StatusCode::BAD_GATEWAY, Json(ToolCallResponse::failure(message))),
    }
}

/// Handles `GET /v1/approvals`.
async fn handle_list_approvals(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.approvals.get_pending())
}

/// Handles `POST /v1/approvals/{id}`.
async fn handle_decide(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(decide): Json<DecideRequest>,
) -> impl IntoResponse {
    if !decide.approved && decide.reason.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "reason is required when denying"})),
        );
    }
    let decision = HumanDecision {
        approved: decide.approved,
        reason: decide.reason,
        decided_by: (!decide.decided_by.is_empty()).then_some(decide.decided_by),
    };
    match state.approvals.decide(id, decision) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(ApprovalError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("request not found: {id}")})),
        ),
        Err(ApprovalError::Cancelled) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "request cancelled"})),
        ),
    }
}

/// Handles `GET /v1/approvals/events` as a coalescing SSE stream.
async fn handle_approval_events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = WatchStream::new(state.approvals.subscribe())
        .map(|version| Ok::<Event, Infallible>(Event::default().event("change").data(version.to_string())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handles `GET /v1/audit`.
async fn handle_audit(State(state): State<AppState>) -> impl IntoResponse {
    let audit = Arc::clone(&state.audit);
    match tokio::task::spawn_blocking(move || audit.get_all()).await {
        Ok(Ok(entries)) => (StatusCode::OK, Json(entries)).into_response(),
        Ok(Err(err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("audit query failed: {err}")})),
        )
            .into_response(),
    }
}

/// Handles `GET /healthz`.
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "policies": state.policies.snapshot().len(),
    }))
}
