// Gapless playback of inbound audio chunks
//
// Chunks are queued in arrival order and each decoded chunk is scheduled at
// max(next_play_time, sink clock), then next_play_time advances by the
// duration the sink reports. When the queue runs dry the loop waits one idle
// grace period and then for the scheduled audio to finish before it clears
// the speaking flag, so the microphone stays closed while the assistant is
// still audible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::chunk::AudioChunk;
use super::decoder::{DecodedFormat, DecoderChain};
use super::sink::AudioSink;
use crate::session::ConversationFlags;

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Wait on an empty queue before playback stops
    pub idle_grace: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            idle_grace: Duration::from_millis(200),
        }
    }
}

/// Counters shared with session statistics
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    pub played: AtomicUsize,
    pub dropped: AtomicUsize,
}

impl PlaybackCounters {
    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Placement of one chunk on the output clock
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledChunk {
    pub start_at: f64,
    pub duration: f64,
    pub format: DecodedFormat,
}

impl ScheduledChunk {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    config: PlaybackConfig,
    decoders: DecoderChain,
    queue: VecDeque<AudioChunk>,
    sink: Box<dyn AudioSink>,
    flags: Arc<ConversationFlags>,
    counters: Arc<PlaybackCounters>,
    next_play_time: f64,
    playing: bool,
}

impl PlaybackScheduler {
    pub fn new(
        config: PlaybackConfig,
        decoders: DecoderChain,
        sink: Box<dyn AudioSink>,
        flags: Arc<ConversationFlags>,
    ) -> Self {
        Self {
            config,
            decoders,
            queue: VecDeque::new(),
            sink,
            flags,
            counters: Arc::new(PlaybackCounters::default()),
            next_play_time: 0.0,
            playing: false,
        }
    }

    pub fn counters(&self) -> Arc<PlaybackCounters> {
        Arc::clone(&self.counters)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Append a chunk to the queue
    ///
    /// Returns false when the chunk is discarded: empty payloads, or while a
    /// transcription is in progress.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> bool {
        if chunk.is_empty() {
            return false;
        }
        if self.flags.is_transcribing() {
            debug!("Discarding {} byte chunk while transcribing", chunk.len());
            return false;
        }

        self.queue.push_back(chunk);

        if !self.playing {
            self.begin();
        }
        true
    }

    fn begin(&mut self) {
        self.playing = true;
        // Audio scheduled before an idle restart may still be playing
        self.next_play_time = self.next_play_time.max(self.sink.current_time());
        debug!("Playback started at {:.3}s", self.next_play_time);
    }

    fn finish(&mut self) {
        self.playing = false;
        self.flags.set_speaking(false);
        debug!("Playback idle");
    }

    /// Decode the head chunk and schedule it right after the previous one
    ///
    /// A chunk that no decoder accepts is dropped without stalling the queue.
    pub async fn play_next(&mut self) -> Option<ScheduledChunk> {
        let chunk = self.queue.pop_front()?;

        let Some(decoded) = self.decoders.decode(chunk.bytes()) else {
            warn!(
                "Dropping {} byte audio chunk ({:?}): no decoder matched",
                chunk.len(),
                chunk.origin()
            );
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            return None;
        };

        let start_at = self.next_play_time.max(self.sink.current_time());

        let duration = match self.sink.schedule(&decoded, start_at).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Failed to schedule audio chunk: {:#}", e);
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                return None;
            }
        };

        self.next_play_time = start_at + duration;
        self.flags.set_speaking(true);
        self.counters.played.fetch_add(1, Ordering::SeqCst);

        debug!(
            "Scheduled {:.3}s of audio at {:.3}s ({:?})",
            duration, start_at, decoded.format
        );

        Some(ScheduledChunk {
            start_at,
            duration,
            format: decoded.format,
        })
    }

    /// Output time still covered by scheduled audio
    fn remaining(&self) -> Duration {
        let secs = self.next_play_time - self.sink.current_time();
        if secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<AudioChunk>) {
        while let Ok(chunk) = rx.try_recv() {
            self.enqueue(chunk);
        }
    }

    /// Playback loop: plays while chunks keep arriving, idles out after the grace period
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AudioChunk>) {
        while let Some(chunk) = rx.recv().await {
            if !self.enqueue(chunk) {
                continue;
            }

            loop {
                self.drain(&mut rx);

                if !self.queue.is_empty() {
                    self.play_next().await;
                    continue;
                }

                tokio::time::sleep(self.config.idle_grace).await;
                self.drain(&mut rx);
                if !self.queue.is_empty() {
                    continue;
                }

                let remaining = self.remaining();
                if !remaining.is_zero() {
                    tokio::select! {
                        chunk = rx.recv() => {
                            if let Some(chunk) = chunk {
                                self.enqueue(chunk);
                                continue;
                            }
                        }
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }

                self.finish();
                break;
            }
        }

        debug!("Playback loop finished");
    }
}

/// Handle to a playback loop running on its own task
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<AudioChunk>,
    task: JoinHandle<()>,
    flags: Arc<ConversationFlags>,
    counters: Arc<PlaybackCounters>,
}

impl PlaybackHandle {
    pub fn spawn(scheduler: PlaybackScheduler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let flags = Arc::clone(&scheduler.flags);
        let counters = scheduler.counters();
        let task = tokio::spawn(scheduler.run(rx));

        Self {
            tx,
            task,
            flags,
            counters,
        }
    }

    pub fn enqueue(&self, chunk: AudioChunk) {
        if self.tx.send(chunk).is_err() {
            debug!("Playback loop gone, chunk discarded");
        }
    }

    pub fn counters(&self) -> Arc<PlaybackCounters> {
        Arc::clone(&self.counters)
    }

    /// Tear down playback, discarding anything still queued
    pub fn stop(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            info!("Playback stopped");
        }
        self.flags.set_speaking(false);
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
