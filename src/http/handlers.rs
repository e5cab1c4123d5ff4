use super::state::AppState;
use crate::audio::{CaptureStats, PlaybackStats};
use crate::error::SessionError;
use crate::feedback::Feedback;
use crate::session::{ConversationMode, SessionState, StartOutcome};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StartConversationRequest {
    /// Conversation mode (default: free_conversation)
    #[serde(default)]
    pub mode: ConversationMode,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StartConversationResponse {
    pub session_id: String,
    pub state: SessionState,
}

/// Controller snapshot without the transcript
#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub mode: Option<ConversationMode>,
    pub started_at: Option<DateTime<Utc>>,
    pub turns: usize,
    pub capture: CaptureStats,
    pub playback: PlaybackStats,
    pub last_error: Option<String>,
    pub last_feedback: Option<Feedback>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /conversation/start
/// Acquire the microphone and open a realtime session
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> impl IntoResponse {
    info!("Starting conversation ({})", req.mode);

    match state.controller.start(req.mode).await {
        Ok(StartOutcome::Started { session_id }) => (
            StatusCode::OK,
            Json(StartConversationResponse {
                session_id,
                state: state.controller.state(),
            }),
        )
            .into_response(),
        Ok(StartOutcome::AlreadyActive { state }) => error_response(
            StatusCode::CONFLICT,
            format!("A conversation is already {:?}", state).to_lowercase(),
        ),
        Err(SessionError::ControllerGone) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            SessionError::ControllerGone.to_string(),
        ),
        Err(e) => {
            error!("Failed to start conversation: {}", e);
            error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to start conversation: {}", e),
            )
        }
    }
}

/// POST /conversation/stop
/// End the conversation; returns the summary and evaluation result
pub async fn stop_conversation(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping conversation");

    match state.controller.stop().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            warn!("Failed to stop conversation: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// GET /conversation/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.controller.snapshot();

    (
        StatusCode::OK,
        Json(StatusResponse {
            state: snapshot.state,
            session_id: snapshot.session_id,
            mode: snapshot.mode,
            started_at: snapshot.started_at,
            turns: snapshot.transcript.len(),
            capture: snapshot.capture,
            playback: snapshot.playback,
            last_error: snapshot.last_error,
            last_feedback: snapshot.last_feedback,
        }),
    )
}

/// GET /conversation/transcript
/// Ordered turns accumulated so far (or of the last session)
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.transcript()))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
