use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::{CaptureConfig, INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE};

/// What kind of conversation the learner asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    FreeConversation,
    RolePlay,
    PronunciationDrill,
    ExamSpeaking,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::FreeConversation => "free_conversation",
            ConversationMode::RolePlay => "role_play",
            ConversationMode::PronunciationDrill => "pronunciation_drill",
            ConversationMode::ExamSpeaking => "exam_speaking",
        }
    }
}

impl Default for ConversationMode {
    fn default() -> Self {
        Self::FreeConversation
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "free_conversation" | "free" => Ok(Self::FreeConversation),
            "role_play" | "roleplay" => Ok(Self::RolePlay),
            "pronunciation_drill" | "pronunciation" => Ok(Self::PronunciationDrill),
            "exam_speaking" | "exam" => Ok(Self::ExamSpeaking),
            other => Err(format!("unknown conversation mode: {}", other)),
        }
    }
}

/// CEFR level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Proficiency {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

/// Who is speaking and at what level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub target_language: String,
    pub native_language: String,
    pub proficiency: Proficiency,
}

impl Default for LearnerProfile {
    fn default() -> Self {
        Self {
            target_language: "German".to_string(),
            native_language: "English".to_string(),
            proficiency: Proficiency::B1,
        }
    }
}

/// Configuration for the session controller
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub learner: LearnerProfile,

    /// Microphone acquisition and framing
    pub capture: CaptureConfig,

    /// Sample rate of model speech (the endpoint sends 24kHz)
    pub output_sample_rate: u32,

    /// Where to write transcripts whose feedback request failed
    pub feedback_fallback_dir: Option<PathBuf>,

    /// Capacity of the notice broadcast channel
    pub notice_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            learner: LearnerProfile::default(),
            capture: CaptureConfig {
                sample_rate: OUTBOUND_SAMPLE_RATE,
                ..CaptureConfig::default()
            },
            output_sample_rate: INBOUND_SAMPLE_RATE,
            feedback_fallback_dir: None,
            notice_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parses_aliases() {
        assert_eq!("free".parse::<ConversationMode>(), Ok(ConversationMode::FreeConversation));
        assert_eq!("Role-Play".parse::<ConversationMode>(), Ok(ConversationMode::RolePlay));
        assert!("karaoke".parse::<ConversationMode>().is_err());
    }

    #[test]
    fn test_mode_round_trips_through_display() {
        for mode in [
            ConversationMode::FreeConversation,
            ConversationMode::RolePlay,
            ConversationMode::PronunciationDrill,
            ConversationMode::ExamSpeaking,
        ] {
            assert_eq!(mode.to_string().parse::<ConversationMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_default_rates() {
        let settings = SessionSettings::default();
        assert_eq!(settings.capture.sample_rate, 16000);
        assert_eq!(settings.output_sample_rate, 24000);
        assert_eq!(settings.capture.frame_size, 4096);
    }
}
