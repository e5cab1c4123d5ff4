pub mod audio;
pub mod config;
pub mod error;
pub mod feedback;
pub mod http;
pub mod session;
pub mod transcript;
pub mod transport;

pub use audio::{
    decode_inbound, encode_outbound, AudioBuffer, AudioOutput, CaptureConfig, CaptureLane,
    EncodedAudio, Microphone, MicrophoneFactory, MicrophoneSource, OutputFactory, PlaybackLane,
    WallClockOutputFactory,
};
pub use config::Config;
pub use error::{
    CaptureError, DecodeError, FeedbackError, PlaybackError, SessionError, TransportError,
};
pub use feedback::{Feedback, FeedbackService, NatsFeedbackService};
pub use http::{create_router, AppState};
pub use session::{
    ConversationMode, LearnerProfile, SessionController, SessionDeps, SessionSettings,
    SessionSnapshot, SessionState, StartOutcome, StopOutcome,
};
pub use transcript::{Speaker, TranscriptAggregator, Turn};
pub use transport::{NatsTransport, RealtimeSession, RealtimeTransport, TransportEvent};
