//! HTTP API server for driving a conversation from a UI
//!
//! This module provides a REST API over the session controller:
//! - POST /conversation/start - Start a conversation in a given mode
//! - POST /conversation/stop - End it and run evaluation
//! - GET /conversation/status - Query controller state
//! - GET /conversation/transcript - Get accumulated transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{StartConversationRequest, StartConversationResponse, StatusResponse};
pub use routes::create_router;
pub use state::AppState;
