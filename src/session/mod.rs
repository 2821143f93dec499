//! Live session management
//!
//! This module provides the pieces that run one conversation:
//! - `LiveSession` drives the protocol state machine against a transport,
//!   capture source and playback sink
//! - `SessionController` wires credentials and configuration into sessions
//!   and exposes start/stop/status to a UI
//! - `ConversationFlags` coordinate capture with playback

mod config;
mod controller;
mod events;
mod flags;
mod session;
mod stats;

pub use config::{Credential, SessionConfig};
pub use controller::{ConfiguredIo, ControllerError, SessionController, SessionIo, StartRequest};
pub use events::UiEvent;
pub use flags::ConversationFlags;
pub use session::{LiveSession, LiveSessionHandle, SessionParts, SessionStatus};
pub use stats::{SessionCounters, SessionStats};
