//! Transcript assembly
//!
//! The live service streams transcription as small text fragments with no
//! utterance boundary. `TranscriptCoalescer` buffers fragments per speaker and
//! finalizes a buffer into a `TranscriptEntry` after a period of silence, or
//! immediately when the session stops.

mod coalescer;
mod entry;

pub use coalescer::{CoalescerConfig, TranscriptCoalescer};
pub use entry::{Speaker, Transcript, TranscriptEntry};
