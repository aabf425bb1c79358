//! HTTP API gateway for VertexCare.
//!
//! Exposes health checks, the one-shot `POST /generate_plan` endpoint and
//! the v1 session API (start, run, inspect, cancel).
//!
//! Built on Axum; the agent runtime is assembled once at start-up and
//! shared by every request.

pub mod api_v1;
pub mod runtime;

use axum::extract::DefaultBodyLimit;
use axum::extract::rejection::JsonRejection;
use axum::{
    Router,
    extract::State,
    http::{Method, header},
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vertexcare_agent::SessionManager;
use vertexcare_config::AppConfig;
use vertexcare_core::{AgentError, InterventionPlan};

use crate::api_v1::ApiError;

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub manager: Arc<SessionManager>,
    /// Run deadline when a request gives none.
    pub run_deadline: Duration,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl GatewayState {
    pub fn new(config: AppConfig, manager: Arc<SessionManager>) -> Self {
        Self {
            run_deadline: Duration::from_millis(config.gateway.run_deadline_ms),
            config,
            manager,
            start_time: chrono::Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: health, `/generate_plan` and the v1 API.
///
/// Layers applied:
/// - CORS for browser dashboards
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/generate_plan", post(generate_plan_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let manager = Arc::new(runtime::build_manager(&config)?);
    let _event_logger = runtime::spawn_event_logger(manager.events());
    let _reaper = runtime::spawn_session_reaper(
        manager.clone(),
        Duration::from_millis(config.gateway.session_retention_ms),
    );

    let app = build_router(Arc::new(GatewayState::new(config, manager)));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
    })
}

/// Patient ids arrive as strings or bare integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatientRef {
    Text(String),
    Number(u64),
}

impl PatientRef {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratePlanRequest {
    #[serde(rename = "patientId", alias = "patient_id")]
    patient_id: PatientRef,
}

/// Start a session and run it to the end in one call.
async fn generate_plan_handler(
    State(state): State<SharedState>,
    payload: Result<Json<GeneratePlanRequest>, JsonRejection>,
) -> Result<Json<InterventionPlan>, ApiError> {
    let Json(payload) = payload?;
    let patient_id = payload.patient_id.into_string();
    info!(patient_id = %patient_id, "Plan requested");

    let session_id = state
        .manager
        .start_session(&patient_id)
        .map_err(|kind| ApiError::BadRequest(kind.to_string()))?;

    let result = state
        .manager
        .run_to_end(session_id, state.run_deadline)
        .await;
    // Nobody can look this session up again.
    state.manager.remove(session_id).ok();

    let plan = result.inspect_err(|err: &AgentError| {
        warn!(session_id = %session_id, error = %err.kind, "Plan generation failed");
    })?;
    Ok(Json(plan))
}
