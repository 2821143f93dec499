//! HTTP API for driving the session controller from a UI
//!
//! - POST /session/start - Start a session (409 if one is running)
//! - POST /session/stop - Stop the current session
//! - GET /session/status - Phase and statistics
//! - GET /session/transcript - Transcript entries, `?format=text` for the export rendering
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
