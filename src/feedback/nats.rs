use async_nats::Client;
use tracing::info;

use super::types::{Feedback, FeedbackReply};
use super::{EvaluationRequest, FeedbackService};
use crate::error::FeedbackError;

/// Requests feedback from an evaluator service over NATS request/reply
pub struct NatsFeedbackService {
    client: Client,
    subject: String,
}

impl NatsFeedbackService {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject: String) -> Result<Self, FeedbackError> {
        info!("Connecting feedback client to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .map_err(|e| FeedbackError::Unavailable(e.to_string()))?;

        Ok(Self { client, subject })
    }
}

#[async_trait::async_trait]
impl FeedbackService for NatsFeedbackService {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<Feedback, FeedbackError> {
        let payload = serde_json::to_vec(&request)
            .map_err(|e| FeedbackError::GenerationFailed(e.to_string()))?;

        info!(
            "Requesting feedback for session {} ({} turns) on {}",
            request.session_id,
            request.transcript.len(),
            self.subject
        );

        let reply = self
            .client
            .request(self.subject.clone(), payload.into())
            .await
            .map_err(|e| FeedbackError::Unavailable(e.to_string()))?;

        FeedbackReply::parse(&reply.payload)
    }
}
