use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    pub explanation: String,
}

/// Structured feedback on a conversation. Scores are 0-100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub overall_score: u8,
    pub fluency: u8,
    pub grammar: u8,
    pub vocabulary: u8,
    pub pronunciation: u8,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
}

impl Feedback {
    pub const MAX_SCORE: u8 = 100;

    pub fn validate(self) -> Result<Self, FeedbackError> {
        let scores = [
            ("overall_score", self.overall_score),
            ("fluency", self.fluency),
            ("grammar", self.grammar),
            ("vocabulary", self.vocabulary),
            ("pronunciation", self.pronunciation),
        ];
        for (name, score) in scores {
            if score > Self::MAX_SCORE {
                return Err(FeedbackError::InvalidPayload(format!(
                    "{} out of range: {}",
                    name, score
                )));
            }
        }
        Ok(self)
    }
}

/// Reply envelope from the evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackReply {
    Ok { feedback: Feedback },
    Error { message: String },
}

impl FeedbackReply {
    /// Parse and validate a raw reply payload.
    pub fn parse(payload: &[u8]) -> Result<Feedback, FeedbackError> {
        let reply: FeedbackReply = serde_json::from_slice(payload)
            .map_err(|e| FeedbackError::InvalidPayload(e.to_string()))?;

        match reply {
            FeedbackReply::Ok { feedback } => feedback.validate(),
            FeedbackReply::Error { message } => Err(FeedbackError::GenerationFailed(message)),
        }
    }
}
