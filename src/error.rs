//! Error types for the voice conversation core.
//!
//! Capture, transport and decode failures are handled inside the session
//! controller; only `SessionError` crosses into callers.

use thiserror::Error;

/// Microphone unavailable, denied, or lost mid-stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,
    #[error("Microphone unavailable: {0}")]
    Unavailable(String),
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("Microphone stream ended unexpectedly")]
    StreamEnded,
    #[error("Microphone device lost: {0}")]
    DeviceLost(String),
}

/// Realtime connection failures, plus the two non-fatal send outcomes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Session rejected by gateway: {0}")]
    Rejected(String),
    #[error("Transport not ready")]
    NotReady,
    #[error("Outbound queue full")]
    Backpressure,
    #[error("Transport closed: {0}")]
    Closed(String),
    #[error("Transport error: {0}")]
    Remote(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Send failures that drop a frame without ending the session.
    pub fn is_frame_drop(&self) -> bool {
        matches!(self, TransportError::NotReady | TransportError::Backpressure)
    }
}

/// Malformed inbound audio payload. The offending chunk is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),
    #[error("Payload length {len} is not a multiple of the {frame_bytes}-byte frame size")]
    MisalignedLength { len: usize, frame_bytes: usize },
    #[error("Channel count must be non-zero")]
    ZeroChannels,
    #[error("Sample rate must be non-zero")]
    ZeroSampleRate,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(String),
    #[error("Failed to start playback source: {0}")]
    StartFailed(String),
}

/// Feedback generation or session persistence failed after a session ended.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("Feedback service unavailable: {0}")]
    Unavailable(String),
    #[error("Feedback generation failed: {0}")]
    GenerationFailed(String),
    #[error("Invalid feedback payload: {0}")]
    InvalidPayload(String),
}

/// Errors returned by `SessionController` operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("Session controller is no longer running")]
    ControllerGone,
}
