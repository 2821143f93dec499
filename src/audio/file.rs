use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{CaptureBlock, CaptureConfig, CaptureSource};

/// Replays a mono WAV file as if it were the microphone
///
/// Blocks are emitted at real-time pace so the remote end sees the same
/// cadence as a live capture.
pub struct WavCapture {
    pub path: String,
    pub duration_seconds: f64,
    samples: Vec<f32>,
    config: CaptureConfig,
    task: Option<JoinHandle<()>>,
}

impl WavCapture {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening capture file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        let spec = reader.spec();

        if spec.sample_rate != config.sample_rate || spec.channels != 1 {
            bail!(
                "Capture file must be {}Hz mono, got {}Hz {}ch",
                config.sample_rate,
                spec.sample_rate,
                spec.channels
            );
        }

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Capture file loaded: {:.1}s, {}Hz, {} samples",
            duration_seconds,
            spec.sample_rate,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            samples,
            config,
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl CaptureSource for WavCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(32);
        let samples = std::mem::take(&mut self.samples);
        let config = self.config.clone();
        let block_ms = config.block_duration_ms().max(1);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(block_ms));
            let mut timestamp_ms = 0;

            // A short trailing block is zero-padded to the fixed block size
            for chunk in samples.chunks(config.block_size) {
                ticker.tick().await;

                let mut block = chunk.to_vec();
                block.resize(config.block_size, 0.0);

                let frame = CaptureBlock {
                    samples: block,
                    sample_rate: config.sample_rate,
                    timestamp_ms,
                };
                timestamp_ms += block_ms;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        info!("WAV capture started: {}", self.path);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("WAV capture stopped: {}", self.path);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "wav"
    }
}
