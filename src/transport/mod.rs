//! Realtime transport to the AI speech endpoint
//!
//! The transport's open/message/error/close callbacks are delivered as
//! `TransportEvent`s over a single channel, in arrival order.

pub mod messages;
pub mod nats;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::EncodedAudio;
use crate::error::TransportError;
use crate::session::{ConversationMode, LearnerProfile};

pub use messages::{AudioFormat, AudioFrameMessage, GatewayEvent, OpenReply, SessionOpenRequest};
pub use nats::{NatsSession, NatsTransport, NatsTransportConfig};

/// Inbound content frame. Any combination of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerContent {
    /// Speech-to-text delta for the learner's audio
    pub input_transcription: Option<String>,
    /// Text delta for the model's spoken reply
    pub output_transcription: Option<String>,
    /// Base64 16-bit PCM chunks at the inbound rate
    pub audio: Vec<String>,
    pub turn_complete: bool,
    /// The learner barged in over model speech
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(ServerContent),
    Error(TransportError),
    Closed { reason: Option<String> },
}

/// Parameters for opening a realtime session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub session_id: String,
    pub mode: ConversationMode,
    pub learner: LearnerProfile,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

/// Handle to an open (or opening) realtime session
#[async_trait::async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Queue one encoded microphone frame. Never blocks.
    ///
    /// `NotReady` and `Backpressure` mean the frame was dropped.
    fn send_audio_frame(&self, payload: EncodedAudio) -> Result<(), TransportError>;

    /// Close the session. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// A session handle plus its ordered event stream
pub struct Connection {
    pub session: Arc<dyn RealtimeSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, TransportError>;
}
