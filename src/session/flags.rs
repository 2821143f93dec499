use std::sync::atomic::{AtomicBool, Ordering};

/// Coordination flags shared by capture, playback and transcription
///
/// One instance per session, handed to each component explicitly.
/// Capture is suppressed while the assistant is speaking or a transcription
/// is in progress so the microphone never records the assistant's own voice.
#[derive(Debug, Default)]
pub struct ConversationFlags {
    listening: AtomicBool,
    speaking: AtomicBool,
    transcribing: AtomicBool,
}

impl ConversationFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn set_listening(&self, value: bool) {
        self.listening.store(value, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, value: bool) {
        self.speaking.store(value, Ordering::SeqCst);
    }

    pub fn is_transcribing(&self) -> bool {
        self.transcribing.load(Ordering::SeqCst)
    }

    pub fn set_transcribing(&self, value: bool) {
        self.transcribing.store(value, Ordering::SeqCst);
    }

    /// Whether a capture block may be sent upstream right now
    pub fn capture_allowed(&self) -> bool {
        self.is_listening() && !self.is_speaking() && !self.is_transcribing()
    }
}
