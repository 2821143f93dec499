use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::file::WavCapture;

/// One fixed-size block of normalized microphone samples (mono, f32 in [-1.0, 1.0])
#[derive(Debug, Clone)]
pub struct CaptureBlock {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for capture sources
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate (the rate sent upstream)
    pub sample_rate: u32,
    /// Channel count, only mono is supported on the wire
    pub channels: u16,
    /// Samples per block
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            block_size: 1024,
        }
    }
}

impl CaptureConfig {
    pub fn block_duration_ms(&self) -> u64 {
        (self.block_size as u64 * 1000) / self.sample_rate.max(1) as u64
    }
}

/// Microphone capture source
///
/// Implementations:
/// - Reader: raw f32le samples from stdin or any async reader (e.g. a recorder process)
/// - Wav: replay a WAV file at real-time pace
/// - Channel: blocks pushed by an embedding application
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start capturing
    ///
    /// Returns a channel receiver that will receive capture blocks
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>>;

    /// Stop capturing
    async fn stop(&mut self) -> Result<()>;

    /// Check if the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Where capture blocks come from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum InputSource {
    /// Raw little-endian f32 mono samples on stdin
    Stdin,
    /// WAV file replayed at real-time pace
    Wav(PathBuf),
}

impl From<String> for InputSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stdin" | "-" => InputSource::Stdin,
            _ => InputSource::Wav(PathBuf::from(value)),
        }
    }
}

pub struct CaptureSourceFactory;

impl CaptureSourceFactory {
    pub fn create(source: &InputSource, config: CaptureConfig) -> Result<Box<dyn CaptureSource>> {
        match source {
            InputSource::Stdin => Ok(Box::new(ReaderCapture::new(
                "stdin",
                tokio::io::stdin(),
                config,
            ))),
            InputSource::Wav(path) => {
                let capture = WavCapture::open(path, config)
                    .with_context(|| format!("Failed to open capture file {}", path.display()))?;
                Ok(Box::new(capture))
            }
        }
    }
}

/// Reads raw f32le mono samples from an async reader and cuts them into blocks
pub struct ReaderCapture<R> {
    name: String,
    reader: Option<R>,
    config: CaptureConfig,
    task: Option<JoinHandle<()>>,
}

impl<R> ReaderCapture<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(name: impl Into<String>, reader: R, config: CaptureConfig) -> Self {
        Self {
            name: name.into(),
            reader: Some(reader),
            config,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl<R> CaptureSource for ReaderCapture<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        let mut reader = self
            .reader
            .take()
            .context("Capture reader already consumed")?;

        let (tx, rx) = mpsc::channel(32);
        let config = self.config.clone();
        let name = self.name.clone();

        info!(
            "Starting {} capture ({}Hz, {} samples per block)",
            name, config.sample_rate, config.block_size
        );

        self.task = Some(tokio::spawn(async move {
            let mut raw = vec![0u8; config.block_size * 4];
            let mut timestamp_ms = 0;

            loop {
                if let Err(e) = reader.read_exact(&mut raw).await {
                    debug!("{} capture ended: {}", name, e);
                    break;
                }

                let samples = raw
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();

                let block = CaptureBlock {
                    samples,
                    sample_rate: config.sample_rate,
                    timestamp_ms,
                };
                timestamp_ms += config.block_duration_ms();

                if tx.send(block).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("{} capture stopped", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Capture source fed by the embedding application
///
/// Blocks pushed through the sender returned by [`ChannelCapture::new`] are
/// forwarded unchanged once the source has been started.
pub struct ChannelCapture {
    rx: Option<mpsc::Receiver<CaptureBlock>>,
    capturing: bool,
}

impl ChannelCapture {
    pub fn new(buffer: usize) -> (mpsc::Sender<CaptureBlock>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            tx,
            Self {
                rx: Some(rx),
                capturing: false,
            },
        )
    }
}

#[async_trait::async_trait]
impl CaptureSource for ChannelCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureBlock>> {
        let rx = self.rx.take().context("Channel capture already started")?;
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing {
            warn!("Channel capture not active");
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }
}
