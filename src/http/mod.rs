//! HTTP API server for external control
//!
//! This module provides a REST API around the coach:
//! - POST /session/start - Start a voice session
//! - POST /session/stop - Stop the voice session
//! - GET /session/status - Status, speaking flag, last error, counters
//! - GET /transcript, DELETE /transcript - Read or clear the transcript
//! - GET /usage, POST /usage/upgrade - Usage gate
//! - GET /health - Health check

pub mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
