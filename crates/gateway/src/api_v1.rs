//! HTTP API v1: session lifecycle over REST.
//!
//! Endpoints:
//!
//! - `GET  /v1/tools`: Registered tool specs
//! - `GET  /v1/sessions`: Known sessions and their status
//! - `POST /v1/sessions`: Start a session for a patient
//! - `GET  /v1/sessions/{id}`: Snapshot (status, steps, scratchpad)
//! - `POST /v1/sessions/{id}/run`: Run to the end, returns the plan
//! - `POST /v1/sessions/{id}/cancel`: Request cancellation

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use vertexcare_core::{
    AgentError, AgentErrorKind, InterventionPlan, ScratchpadEntry, SessionId, SessionSnapshot,
    SessionStatus, ToolSpec,
};

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/tools", get(list_tools_handler))
        .route(
            "/sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}/run", post(run_session_handler))
        .route("/sessions/{id}/cancel", post(cancel_session_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

/// Error body for every failed request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AgentErrorKind>,
    #[serde(default)]
    pub retry_advised: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scratchpad: Vec<ScratchpadEntry>,
}

/// A request failure, rendered as [`ErrorResponse`].
#[derive(Debug)]
pub enum ApiError {
    /// The session ended (or never started) without a plan.
    Agent(AgentError),
    /// The request itself was malformed.
    BadRequest(String),
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self::Agent(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// HTTP status for a session failure.
pub fn status_for(kind: &AgentErrorKind) -> StatusCode {
    match kind {
        AgentErrorKind::UnknownSession { .. } => StatusCode::NOT_FOUND,
        AgentErrorKind::NotRunnable { .. } | AgentErrorKind::Cancelled => StatusCode::CONFLICT,
        AgentErrorKind::InsufficientEvidence | AgentErrorKind::InvalidPlan { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AgentErrorKind::InvalidPatientId { .. } => StatusCode::BAD_REQUEST,
        AgentErrorKind::Reasoning { .. } => StatusCode::BAD_GATEWAY,
        AgentErrorKind::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        AgentErrorKind::StepLimitExceeded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Agent(err) => {
                let status = status_for(&err.kind);
                let body = ErrorResponse {
                    error: err.kind.to_string(),
                    session_id: Some(err.session_id),
                    retry_advised: err.retry_advised(),
                    failure: Some(err.kind),
                    scratchpad: err.scratchpad,
                };
                (status, Json(body)).into_response()
            }
            Self::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error,
                    session_id: None,
                    failure: None,
                    retry_advised: false,
                    scratchpad: Vec::new(),
                }),
            )
                .into_response(),
        }
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("'{raw}' is not a valid session id")))
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolSpec>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub patient_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSessionRequest {
    /// Overall deadline; the gateway default when absent.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state.manager.registry().specs();
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

async fn list_sessions_handler(State(state): State<SharedState>) -> Json<SessionListResponse> {
    let mut sessions: Vec<SessionSummary> = state
        .manager
        .list()
        .into_iter()
        .map(|(session_id, status)| SessionSummary { session_id, status })
        .collect();
    sessions.sort_by_key(|s| s.session_id.to_string());
    Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    })
}

async fn create_session_handler(
    State(state): State<SharedState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let Json(payload) = payload?;
    let session_id = state
        .manager
        .start_session(&payload.patient_id)
        .map_err(|kind| ApiError::BadRequest(kind.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            status: SessionStatus::Created,
        }),
    ))
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let id = parse_session_id(&id)?;
    Ok(Json(state.manager.snapshot(id)?))
}

async fn run_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Option<Json<RunSessionRequest>>,
) -> Result<Json<InterventionPlan>, ApiError> {
    let id = parse_session_id(&id)?;
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let deadline = request
        .deadline_ms
        .map(Duration::from_millis)
        .unwrap_or(state.run_deadline);

    info!(session_id = %id, deadline_ms = deadline.as_millis() as u64, "Run requested");
    match state.manager.run_to_end(id, deadline).await {
        Ok(plan) => Ok(Json(plan)),
        Err(err) => {
            warn!(session_id = %id, error = %err.kind, "Run ended without a plan");
            Err(err.into())
        }
    }
}

async fn cancel_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let id = parse_session_id(&id)?;
    let status = state.manager.cancel(id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            session_id: id,
            status,
        }),
    ))
}
