use crate::live::{MessageSource, SessionPhase, StatusLevel};
use crate::transcript::TranscriptEntry;

/// Notifications for whatever renders the session (terminal, HTTP client, UI)
#[derive(Debug, Clone)]
pub enum UiEvent {
    Status { level: StatusLevel, message: String },
    /// One line of the conversation log
    Message { source: MessageSource, text: String },
    Transcript(TranscriptEntry),
    Phase(SessionPhase),
}
