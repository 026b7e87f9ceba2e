//! HTTP API server for operator control
//!
//! This module provides a REST API over the orchestrator:
//! - POST /voice-activity - Report voice activity on a channel
//! - POST /sessions/:id/stop - Stop a recording and start publishing
//! - POST /sessions/:id/abort - Abort a session
//! - GET /sessions - List sessions
//! - GET /sessions/:id - Session snapshot
//! - GET /sessions/:id/events - Session transition log
//! - GET /health - Component health

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
