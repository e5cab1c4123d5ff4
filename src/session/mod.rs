//! Conversation session management
//!
//! This module provides the `SessionController` that owns one realtime
//! conversation at a time:
//! - Microphone acquisition and the capture lane
//! - The realtime transport and its event stream
//! - Scheduled playback of model speech
//! - Transcript aggregation and post-session evaluation

mod config;
mod controller;
mod stats;

pub use config::{ConversationMode, LearnerProfile, Proficiency, SessionSettings};
pub use controller::{SessionController, SessionDeps};
pub use stats::{
    EvaluationOutcome, SessionNotice, SessionSnapshot, SessionState, SessionSummary, StartOutcome,
    StopOutcome,
};
