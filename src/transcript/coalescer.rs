use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::entry::{Speaker, TranscriptEntry};

#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    pub enabled: bool,
    /// Silence after the last fragment that closes an utterance
    pub idle_timeout: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Default)]
struct SpeakerBuffer {
    text: String,
    last_update: Option<Instant>,
}

impl SpeakerBuffer {
    fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn take(&mut self, speaker: Speaker) -> Option<TranscriptEntry> {
        let text = std::mem::take(&mut self.text);
        self.last_update = None;

        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(TranscriptEntry::new(speaker, text))
    }
}

/// Merges streamed fragments into utterances, one buffer per speaker
#[derive(Debug)]
pub struct TranscriptCoalescer {
    config: CoalescerConfig,
    user: SpeakerBuffer,
    assistant: SpeakerBuffer,
}

impl TranscriptCoalescer {
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            config,
            user: SpeakerBuffer::default(),
            assistant: SpeakerBuffer::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    fn buffer_mut(&mut self, speaker: Speaker) -> &mut SpeakerBuffer {
        match speaker {
            Speaker::User => &mut self.user,
            Speaker::Assistant => &mut self.assistant,
        }
    }

    /// Whether a speaker has text waiting to be finalized
    pub fn is_pending(&self, speaker: Speaker) -> bool {
        match speaker {
            Speaker::User => !self.user.is_empty(),
            Speaker::Assistant => !self.assistant.is_empty(),
        }
    }

    /// Append a fragment verbatim to the speaker's buffer
    ///
    /// Whitespace-only fragments are ignored and leave the timestamp alone.
    /// Returns whether the fragment was taken.
    pub fn append_fragment(&mut self, speaker: Speaker, fragment: &str, now: Instant) -> bool {
        if !self.config.enabled || fragment.trim().is_empty() {
            return false;
        }

        let buffer = self.buffer_mut(speaker);
        buffer.text.push_str(fragment);
        buffer.last_update = Some(now);
        true
    }

    /// Finalize every buffer that has been idle longer than the timeout
    pub fn sweep(&mut self, now: Instant) -> Vec<TranscriptEntry> {
        let timeout = self.config.idle_timeout;
        let mut finalized = Vec::new();

        for speaker in [Speaker::User, Speaker::Assistant] {
            let buffer = self.buffer_mut(speaker);
            if buffer.is_empty() {
                continue;
            }
            let idle = buffer
                .last_update
                .map(|at| now.saturating_duration_since(at) > timeout)
                .unwrap_or(true);

            if idle {
                if let Some(entry) = buffer.take(speaker) {
                    debug!("Finalized {} utterance after idle timeout", speaker);
                    finalized.push(entry);
                }
            }
        }

        finalized
    }

    /// Finalize everything regardless of age; a no-op once the buffers are empty
    pub fn flush(&mut self) -> Vec<TranscriptEntry> {
        [Speaker::User, Speaker::Assistant]
            .into_iter()
            .filter_map(|speaker| self.buffer_mut(speaker).take(speaker))
            .collect()
    }
}
