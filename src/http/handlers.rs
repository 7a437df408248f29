use super::state::AppState;
use crate::coach::error_message;
use crate::error::{CoachError, SessionError};
use crate::session::{ConnectionStatus, SessionStats};
use crate::transcript::TranscriptEntry;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub status: ConnectionStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopSessionResponse {
    pub status: ConnectionStatus,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    /// Localized recovery text for the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn error_response(code: StatusCode, error: String, hint: Option<String>) -> axum::response::Response {
    (code, Json(ErrorResponse { error, hint })).into_response()
}

fn session_error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Connection(_) | SessionError::Protocol => StatusCode::BAD_GATEWAY,
        SessionError::AlreadyActive | SessionError::Cancelled => StatusCode::CONFLICT,
        SessionError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a voice session
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Starting voice session");

    match state.coach.start().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StartSessionResponse {
                status: ConnectionStatus::Active,
                message: "Session started".to_string(),
            }),
        )
            .into_response(),
        Err(CoachError::PaymentRequired) => error_response(
            StatusCode::PAYMENT_REQUIRED,
            CoachError::PaymentRequired.to_string(),
            Some(state.coach.usage().await.remaining),
        ),
        Err(CoachError::Session(e)) => {
            error!("Failed to start session: {}", e);
            error_response(
                session_error_status(&e),
                format!("Failed to start session: {}", e),
                Some(error_message(&e).to_string()),
            )
        }
    }
}

/// POST /session/stop
/// Stop the voice session (no-op when idle)
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping voice session");
    state.coach.stop().await;

    let status = state.coach.status().await;
    (
        StatusCode::OK,
        Json(StopSessionResponse {
            status: status.status,
            message: "Session stopped".to_string(),
            stats: status.stats,
        }),
    )
        .into_response()
}

/// GET /session/status
pub async fn get_session_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.coach.status().await)).into_response()
}

/// GET /transcript
/// Transcript accumulated so far
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptEntry> = state.coach.transcript().await;
    (StatusCode::OK, Json(transcript)).into_response()
}

/// DELETE /transcript
pub async fn clear_transcript(State(state): State<AppState>) -> impl IntoResponse {
    state.coach.clear_transcript().await;
    StatusCode::NO_CONTENT
}

/// GET /usage
pub async fn get_usage(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.coach.usage().await)).into_response()
}

/// POST /usage/upgrade
/// Mark the account as paid
pub async fn upgrade_usage(State(state): State<AppState>) -> impl IntoResponse {
    match state.coach.upgrade().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Failed to upgrade account: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to upgrade account: {}", e),
                None,
            )
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
