use serde::{Deserialize, Serialize};

use super::ServerContent;
use crate::session::{ConversationMode, LearnerProfile};

/// Audio frame message published to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    pub data: String,      // Base64-encoded PCM bytes
    pub mime_type: String, // e.g. "audio/pcm;rate=16000"
    pub timestamp: String, // RFC3339 timestamp
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            encoding: "pcm16".to_string(),
            sample_rate,
            channels: 1,
        }
    }
}

/// Request sent on `<prefix>.open`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpenRequest {
    pub session_id: String,
    pub mode: ConversationMode,
    pub learner: LearnerProfile,
    pub input_audio: AudioFormat,
    pub output_audio: AudioFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpenReply {
    Accepted,
    Rejected { reason: String },
}

/// Event received on `<prefix>.<session>.events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Open,
    Content(ServerContent),
    Error { message: String },
    Closed { reason: Option<String> },
}

/// Message sent on `<prefix>.<session>.control`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Close,
}
