use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::live::SessionPhase;

/// Statistics about a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    pub phase: SessionPhase,

    /// User-facing failure message when the session failed
    pub failure: Option<String>,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Seconds from start until now, or until the session ended
    pub duration_secs: f64,

    /// Capture blocks sent upstream
    pub blocks_sent: usize,

    /// Capture blocks discarded by the listening gate
    pub blocks_suppressed: usize,

    /// Audio chunks received, binary and inline
    pub audio_chunks_received: usize,

    pub chunks_played: usize,

    /// Chunks no decoder accepted
    pub chunks_dropped: usize,

    pub transcript_entries: usize,
}

/// Live counters updated by the session driver
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub blocks_sent: AtomicUsize,
    pub blocks_suppressed: AtomicUsize,
    pub audio_chunks_received: AtomicUsize,
}

impl SessionCounters {
    pub fn blocks_sent(&self) -> usize {
        self.blocks_sent.load(Ordering::SeqCst)
    }

    pub fn blocks_suppressed(&self) -> usize {
        self.blocks_suppressed.load(Ordering::SeqCst)
    }

    pub fn audio_chunks_received(&self) -> usize {
        self.audio_chunks_received.load(Ordering::SeqCst)
    }
}
