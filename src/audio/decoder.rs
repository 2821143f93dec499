// Decoders for inbound audio chunks
//
// Chunks arrive without a format tag. A chunk is first offered to the
// container decoder (self-describing formats with a header), then to an
// ordered list of raw PCM hypotheses. The first decoder that accepts the
// bytes wins; there is no best-fit scoring.

use serde::Deserialize;
use std::fmt;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Raw sample encodings the PCM probe understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Signed 16-bit little-endian
    Int16,
    /// IEEE 754 32-bit float little-endian
    Float32,
    /// Unsigned 8-bit, offset 128
    Uint8,
}

impl SampleEncoding {
    pub fn sample_width(&self) -> usize {
        match self {
            SampleEncoding::Int16 => 2,
            SampleEncoding::Float32 => 4,
            SampleEncoding::Uint8 => 1,
        }
    }

    fn normalize(&self, bytes: &[u8]) -> Vec<f32> {
        match self {
            SampleEncoding::Int16 => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .collect(),
            SampleEncoding::Float32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            SampleEncoding::Uint8 => bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        }
    }
}

/// One (sample rate, sample encoding) hypothesis for a raw chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct PcmCandidate {
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
}

impl PcmCandidate {
    pub fn new(sample_rate: u32, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            encoding,
        }
    }
}

impl fmt::Display for PcmCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pcm {:?} @ {}Hz", self.encoding, self.sample_rate)
    }
}

/// How a chunk was decoded
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFormat {
    Container { container: &'static str },
    Pcm(PcmCandidate),
}

/// Mono samples ready for scheduling
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub format: DecodedFormat,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

pub trait ChunkDecoder: Send + Sync {
    fn name(&self) -> String;

    /// Decode the chunk, or `None` if the bytes do not fit this decoder
    fn try_decode(&self, bytes: &[u8]) -> Option<DecodedAudio>;
}

/// Interprets bytes as raw PCM under one fixed candidate format
pub struct PcmDecoder {
    candidate: PcmCandidate,
    min_samples: usize,
}

impl PcmDecoder {
    pub fn new(candidate: PcmCandidate, min_samples: usize) -> Self {
        Self {
            candidate,
            min_samples,
        }
    }
}

impl ChunkDecoder for PcmDecoder {
    fn name(&self) -> String {
        self.candidate.to_string()
    }

    fn try_decode(&self, bytes: &[u8]) -> Option<DecodedAudio> {
        let width = self.candidate.encoding.sample_width();
        if bytes.len() % width != 0 {
            return None;
        }
        if bytes.len() / width < self.min_samples {
            return None;
        }

        let samples = self.candidate.encoding.normalize(bytes);
        if samples.iter().any(|s| !s.is_finite()) {
            return None;
        }

        Some(DecodedAudio {
            samples,
            sample_rate: self.candidate.sample_rate,
            format: DecodedFormat::Pcm(self.candidate),
        })
    }
}

/// Decodes self-framing containers (WAV, MP3, OGG, FLAC, MP4/AAC, ADTS)
///
/// Only attempted when the chunk starts with a known container signature.
#[derive(Debug, Default)]
pub struct ContainerDecoder;

impl ContainerDecoder {
    /// Identify a container by its leading bytes
    pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
        if bytes.len() < 4 {
            return None;
        }
        if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WAVE".as_slice()) {
            return Some("wav");
        }
        if bytes.starts_with(b"OggS") {
            return Some("ogg");
        }
        if bytes.starts_with(b"fLaC") {
            return Some("flac");
        }
        if bytes.starts_with(b"ID3") {
            return Some("mp3");
        }
        if bytes.get(4..8) == Some(b"ftyp".as_slice()) {
            return Some("mp4");
        }
        if bytes[0] == 0xFF && bytes[1] & 0xF6 == 0xF0 {
            return Some("aac");
        }
        if is_mpeg_audio_header(bytes) {
            return Some("mp3");
        }
        None
    }

    fn decode_container(
        &self,
        bytes: &[u8],
        container: &'static str,
    ) -> Result<DecodedAudio, SymphoniaError> {
        let source = Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(container);

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(SymphoniaError::Unsupported("no audio track"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(SymphoniaError::Unsupported("unknown sample rate"))?;

        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(e) => return Err(e),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            samples.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        Ok(DecodedAudio {
            samples,
            sample_rate,
            format: DecodedFormat::Container { container },
        })
    }
}

impl ChunkDecoder for ContainerDecoder {
    fn name(&self) -> String {
        "container".to_string()
    }

    fn try_decode(&self, bytes: &[u8]) -> Option<DecodedAudio> {
        let container = Self::sniff(bytes)?;

        match self.decode_container(bytes, container) {
            Ok(decoded) if !decoded.samples.is_empty() => Some(decoded),
            Ok(_) => {
                debug!("{} container decoded to no samples", container);
                None
            }
            Err(e) => {
                debug!("{} container rejected: {}", container, e);
                None
            }
        }
    }
}

/// MPEG audio frame header: sync word plus valid version, layer, bitrate and rate fields
fn is_mpeg_audio_header(bytes: &[u8]) -> bool {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
        return false;
    }
    let version = (bytes[1] >> 3) & 0x03;
    let layer = (bytes[1] >> 1) & 0x03;
    let bitrate = bytes[2] >> 4;
    let rate = (bytes[2] >> 2) & 0x03;

    version != 0x01 && layer != 0x00 && bitrate != 0x00 && bitrate != 0x0F && rate != 0x03
}

/// Ordered decoder list, first success wins
pub struct DecoderChain {
    decoders: Vec<Box<dyn ChunkDecoder>>,
}

impl DecoderChain {
    pub fn new(decoders: Vec<Box<dyn ChunkDecoder>>) -> Self {
        Self { decoders }
    }

    /// Container decoding first, then each PCM candidate in list order
    pub fn standard(candidates: &[PcmCandidate], min_samples: usize) -> Self {
        let mut decoders: Vec<Box<dyn ChunkDecoder>> = vec![Box::new(ContainerDecoder)];
        for candidate in candidates {
            decoders.push(Box::new(PcmDecoder::new(*candidate, min_samples)));
        }
        Self::new(decoders)
    }

    pub fn decode(&self, bytes: &[u8]) -> Option<DecodedAudio> {
        self.decoders.iter().find_map(|decoder| {
            let decoded = decoder.try_decode(bytes);
            if decoded.is_some() {
                debug!("Chunk of {} bytes accepted by {}", bytes.len(), decoder.name());
            }
            decoded
        })
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
