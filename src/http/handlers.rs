use super::state::AppState;
use crate::error::{EngineError, OrchestratorError, SessionError};
use crate::health::{ComponentStatus, HealthRecord};
use crate::orchestrator::VoiceActivity;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct VoiceActivityResponse {
    pub session_id: String,

    /// False when the channel already had an active session
    pub created: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: Vec<HealthRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Session {} not found", session_id))
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrchestratorError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            OrchestratorError::Session(_) | OrchestratorError::WrongState { .. } => StatusCode::CONFLICT,
            OrchestratorError::Engine(EngineError::AlreadyRecording(_))
            | OrchestratorError::Engine(EngineError::NoActiveRecording(_)) => StatusCode::CONFLICT,
            OrchestratorError::Engine(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        error_response(status, self)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice-activity
/// Arm and start a recording for a channel (idempotent while one is active)
pub async fn voice_activity(
    State(state): State<AppState>,
    Json(activity): Json<VoiceActivity>,
) -> Result<impl IntoResponse, OrchestratorError> {
    if activity.channel_id.trim().is_empty() {
        return Ok(error_response(StatusCode::BAD_REQUEST, "channel_id is required"));
    }

    let outcome = state.orchestrator.on_voice_activity(activity).await.map_err(|e| {
        error!("Voice activity rejected: {}", e);
        e
    })?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(VoiceActivityResponse {
            session_id: outcome.session_id,
            created: outcome.created,
        }),
    )
        .into_response())
}

/// POST /sessions/:session_id/stop
/// Stop recording and start the publish pipeline
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, OrchestratorError> {
    info!("Stop requested for session: {}", session_id);

    let snapshot = state.orchestrator.stop(&session_id).await?;
    Ok(Json(snapshot))
}

/// POST /sessions/:session_id/abort
/// Abort a session, cancelling anything in flight
pub async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Option<Json<AbortRequest>>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "operator abort".to_string());
    warn!("Abort requested for session {}: {}", session_id, reason);

    let snapshot = state.orchestrator.abort(&session_id, &reason).await?;
    Ok(Json(snapshot))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.list_sessions().await)
}

/// GET /sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get_session(&session_id).await {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/events
/// Ordered transition log of one session
pub async fn get_session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.events(&session_id).await {
        Some(events) => (StatusCode::OK, Json(events)).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /health
/// Worst component status wins; 503 when any component is dead
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let components = state.orchestrator.get_health();

    let status = if components.iter().any(|c| c.status == ComponentStatus::Dead) {
        ComponentStatus::Dead
    } else if components.iter().any(|c| c.status == ComponentStatus::Degraded) {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };

    let code = match status {
        ComponentStatus::Dead => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (code, Json(HealthResponse { status, components }))
}
