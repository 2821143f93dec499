use base64::Engine;

use super::backend::CaptureBlock;
use crate::live::messages::ClientMessage;

pub const PCM_MIME_TYPE: &str = "audio/pcm";

/// Convert normalized samples to 16-bit signed little-endian PCM
///
/// Each sample is scaled to the int16 range and clamped, never wrapped.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).round().clamp(-32768.0, 32767.0) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Turns capture blocks into outbound realtime-input messages
#[derive(Debug, Clone)]
pub struct AudioFrameEncoder {
    mime_type: String,
}

impl Default for AudioFrameEncoder {
    fn default() -> Self {
        Self {
            mime_type: PCM_MIME_TYPE.to_string(),
        }
    }
}

impl AudioFrameEncoder {
    pub fn encode(&self, block: &CaptureBlock) -> ClientMessage {
        let pcm = encode_pcm16(&block.samples);
        let data = base64::engine::general_purpose::STANDARD.encode(pcm);
        ClientMessage::realtime_audio(&self.mime_type, data)
    }
}
