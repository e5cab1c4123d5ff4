use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::ConversationMode;
use crate::audio::{CaptureStats, PlaybackStats};
use crate::feedback::Feedback;
use crate::transcript::Turn;

/// Lifecycle state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Stopping,
    Evaluating,
    Error,
}

impl SessionState {
    /// A session exists and owns the microphone/transport/playback.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Connected
                | SessionState::Stopping
                | SessionState::Evaluating
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Everything a UI needs to render the conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub mode: Option<ConversationMode>,
    pub started_at: Option<DateTime<Utc>>,
    pub transcript: Vec<Turn>,
    pub capture: CaptureStats,
    pub playback: PlaybackStats,
    pub last_error: Option<String>,
    pub last_feedback: Option<Feedback>,
}

/// A finished session as handed to evaluation and returned from `stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub mode: ConversationMode,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub transcript: Vec<Turn>,
    pub capture: CaptureStats,
    pub playback: PlaybackStats,
}

/// How evaluation of an ended session went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Empty transcript or no feedback service
    Skipped,
    Completed { feedback: Feedback },
    Failed { error: String, saved_to: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    Ended {
        summary: SessionSummary,
        evaluation: EvaluationOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { session_id: String },
    /// A session is already in progress; nothing was acquired
    AlreadyActive { state: SessionState },
}

/// User-visible events (toast/banner equivalents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    StateChanged { state: SessionState },
    Connected { session_id: String },
    Interrupted { stopped_sources: usize },
    Error { message: String },
    FeedbackReady { feedback: Feedback },
    FeedbackFailed { message: String },
}
