//! Post-session evaluation and persistence boundary
//!
//! Runs only after an explicit stop with a non-empty transcript. Failures are
//! reported to the user but never fail the session itself.

mod nats;
mod types;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;
use crate::session::{ConversationMode, LearnerProfile};
use crate::transcript::Turn;

pub use nats::NatsFeedbackService;
pub use types::{Correction, Feedback, FeedbackReply};

/// Everything the evaluator needs about a finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub session_id: String,
    pub mode: ConversationMode,
    pub learner: LearnerProfile,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub transcript: Vec<Turn>,
}

#[async_trait::async_trait]
pub trait FeedbackService: Send + Sync {
    /// Generate feedback for the session and persist the session record
    async fn evaluate(&self, request: EvaluationRequest) -> Result<Feedback, FeedbackError>;
}
