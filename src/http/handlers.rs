use super::state::AppState;
use crate::live::SessionPhase;
use crate::session::{ControllerError, SessionStats, StartRequest};
use crate::transcript::TranscriptEntry;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionPhase,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: SessionPhase,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    /// `text` for `[HH:MM:SS] SPEAKER: text` lines, JSON otherwise
    pub format: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn no_session() -> Response {
    error_response(StatusCode::NOT_FOUND, "No session has been started")
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a new live session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Response {
    match state.controller.start(req).await {
        Ok(handle) => {
            info!("Session started via HTTP: {}", handle.session_id());
            (
                StatusCode::OK,
                Json(StartSessionResponse {
                    session_id: handle.session_id().to_string(),
                    status: handle.phase(),
                    message: "Connected! Start talking...".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start session: {}", e);
            let status = match &e {
                ControllerError::MissingCredential => StatusCode::BAD_REQUEST,
                ControllerError::AlreadyRunning => StatusCode::CONFLICT,
                ControllerError::ConnectFailed(_) => StatusCode::BAD_GATEWAY,
                ControllerError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, e.to_string())
        }
    }
}

/// POST /session/stop
/// Stop the current session
pub async fn stop_session(State(state): State<AppState>) -> Response {
    match state.controller.stop().await {
        Ok(Some(stats)) => {
            info!("Session stopped via HTTP: {}", stats.session_id);
            (
                StatusCode::OK,
                Json(StopSessionResponse {
                    session_id: stats.session_id.clone(),
                    status: stats.phase,
                    message: "Session ended".to_string(),
                    stats,
                }),
            )
                .into_response()
        }
        Ok(None) => no_session(),
        Err(e) => {
            error!("Failed to stop session: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to stop session: {:#}", e),
            )
        }
    }
}

/// GET /session/status
/// Phase and statistics of the current or last session
pub async fn session_status(State(state): State<AppState>) -> Response {
    match state.controller.status().await {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => no_session(),
    }
}

/// GET /session/transcript
/// Finalized transcript entries so far
pub async fn session_transcript(
    State(state): State<AppState>,
    Query(query): Query<TranscriptQuery>,
) -> Response {
    let Some(transcript) = state.controller.transcript().await else {
        return no_session();
    };

    if query.format.as_deref() == Some("text") {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            transcript.render(),
        )
            .into_response();
    }

    let entries: Vec<TranscriptEntry> = transcript.entries().to_vec();
    (StatusCode::OK, Json(entries)).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
