use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info};

use super::decoder::DecodedAudio;

/// Audio output accepting buffers scheduled on its own clock
#[async_trait::async_trait]
pub trait AudioSink: Send {
    /// Current position of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule decoded audio to start at `start_at` seconds on the output clock
    ///
    /// Returns how many seconds of the output clock the audio occupies.
    async fn schedule(&mut self, audio: &DecodedAudio, start_at: f64) -> Result<f64>;
}

/// Where rendered playback goes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum OutputTarget {
    /// Raw s16le mono on stdout
    Stdout,
    /// Discard audio, keep the clock
    Null,
    /// Raw s16le mono written to a file
    File(PathBuf),
}

impl From<String> for OutputTarget {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stdout" | "-" => OutputTarget::Stdout,
            "null" | "none" => OutputTarget::Null,
            _ => OutputTarget::File(PathBuf::from(value)),
        }
    }
}

pub async fn create_sink(target: &OutputTarget, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
    match target {
        OutputTarget::Stdout => Ok(Box::new(PcmWriterSink::new(tokio::io::stdout(), sample_rate))),
        OutputTarget::Null => Ok(Box::new(NullSink::new())),
        OutputTarget::File(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create playback file {}", path.display()))?;
            info!("Rendering playback to {}", path.display());
            Ok(Box::new(PcmWriterSink::new(file, sample_rate)))
        }
    }
}

/// Sink that renders nothing and only tracks wall-clock time
pub struct NullSink {
    started: Instant,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioSink for NullSink {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    async fn schedule(&mut self, audio: &DecodedAudio, start_at: f64) -> Result<f64> {
        let duration = audio.duration_secs();
        debug!("Discarding {:.3}s of audio scheduled at {:.3}s", duration, start_at);
        Ok(duration)
    }
}

/// Renders a continuous s16le mono stream at a fixed output rate
///
/// Gaps between scheduled buffers are written as silence so the byte stream
/// stays aligned with the output clock.
pub struct PcmWriterSink<W> {
    writer: W,
    sample_rate: u32,
    started: Instant,
    frames_written: u64,
}

impl<W> PcmWriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, sample_rate: u32) -> Self {
        Self {
            writer,
            sample_rate,
            started: Instant::now(),
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait::async_trait]
impl<W> AudioSink for PcmWriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    async fn schedule(&mut self, audio: &DecodedAudio, start_at: f64) -> Result<f64> {
        let start_frame = (start_at * self.sample_rate as f64).round() as u64;
        let mut pcm = Vec::new();

        if start_frame > self.frames_written {
            let gap = (start_frame - self.frames_written) as usize;
            pcm.resize(gap * 2, 0u8);
            self.frames_written += gap as u64;
        }

        let rendered = resample(&audio.samples, audio.sample_rate, self.sample_rate)?;
        for sample in &rendered {
            let value = (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16;
            pcm.extend_from_slice(&value.to_le_bytes());
        }
        self.frames_written += rendered.len() as u64;

        self.writer
            .write_all(&pcm)
            .await
            .context("Failed to write playback audio")?;
        self.writer.flush().await.context("Failed to flush playback audio")?;

        Ok(rendered.len() as f64 / self.sample_rate as f64)
    }
}

/// Band-limited sinc resampling of a mono buffer
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .context("Failed to create resampler")?;

    let input = vec![samples.to_vec()];
    let mut output = resampler
        .process(&input, None)
        .context("Failed to resample playback audio")?;

    Ok(output.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::{DecodedFormat, PcmCandidate, SampleEncoding};

    fn decoded(samples: Vec<f32>, sample_rate: u32) -> DecodedAudio {
        DecodedAudio {
            samples,
            sample_rate,
            format: DecodedFormat::Pcm(PcmCandidate::new(sample_rate, SampleEncoding::Int16)),
        }
    }

    #[test]
    fn test_output_target_from_string() {
        assert_eq!(OutputTarget::from("stdout".to_string()), OutputTarget::Stdout);
        assert_eq!(OutputTarget::from("null".to_string()), OutputTarget::Null);
        assert_eq!(
            OutputTarget::from("out.pcm".to_string()),
            OutputTarget::File(PathBuf::from("out.pcm"))
        );
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn test_resample_upsamples_by_ratio() {
        let out = resample(&vec![0.0; 1600], 16000, 24000).unwrap();
        assert!((out.len() as i64 - 2400).abs() <= 16, "got {} frames", out.len());
        assert!(out.iter().all(|s| s.abs() < 1e-6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_sink_reports_rendered_duration() {
        let mut sink = PcmWriterSink::new(Vec::new(), 24000);

        let duration = sink.schedule(&decoded(vec![0.0; 1600], 16000), 0.0).await.unwrap();

        assert_eq!(duration, sink.frames_written() as f64 / 24000.0);
        assert!((duration - 0.1).abs() < 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_sink_fills_gaps_with_silence() {
        let mut sink = PcmWriterSink::new(Vec::new(), 1000);

        let first = sink.schedule(&decoded(vec![0.5; 10], 1000), 0.0).await.unwrap();
        sink.schedule(&decoded(vec![0.5; 10], 1000), 0.02).await.unwrap();

        assert_eq!(first, 0.01);
        assert_eq!(sink.frames_written(), 30);
        let bytes = sink.into_inner();
        assert_eq!(bytes.len(), 60);
        // frames 10..20 are silence
        assert!(bytes[20..40].iter().all(|&b| b == 0));
        assert_eq!(i16::from_le_bytes([bytes[40], bytes[41]]), 16384);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_sink_clock_follows_time() {
        let sink = NullSink::new();
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert!((sink.current_time() - 0.25).abs() < 1e-6);
    }
}
