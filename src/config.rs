use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{InputSource, OutputTarget, PcmCandidate, SampleEncoding};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub transcript: TranscriptConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-interviewer".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

/// Remote speech service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint, the credential is appended as `?key=`
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// Bound on waiting for the transport to open
    pub open_timeout_ms: u64,
    /// Settle time between the setup message and the initial prompt
    pub prompt_delay_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: "Puck".to_string(),
            open_timeout_ms: 10_000,
            prompt_delay_ms: 1_000,
        }
    }
}

impl LiveConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn prompt_delay(&self) -> Duration {
        Duration::from_millis(self.prompt_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture rate sent to the service
    pub send_sample_rate: u32,
    /// Output clock rate for rendered playback
    pub receive_sample_rate: u32,
    pub channels: u16,
    /// Samples per capture block
    pub input_chunk_size: usize,
    /// Debounce before playback stops on an empty queue
    pub idle_grace_ms: u64,
    /// Chunks with fewer samples than this are rejected by every PCM candidate
    pub min_probe_samples: usize,
    /// Ordered PCM hypotheses, the first structurally valid one wins
    pub probe_formats: Vec<PcmCandidate>,
    pub input: InputSource,
    pub output: OutputTarget,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            send_sample_rate: 16_000,
            receive_sample_rate: 24_000,
            channels: 1,
            input_chunk_size: 1024,
            idle_grace_ms: 200,
            min_probe_samples: 10,
            probe_formats: default_probe_formats(),
            input: InputSource::Stdin,
            output: OutputTarget::Stdout,
        }
    }
}

impl AudioConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }
}

pub fn default_probe_formats() -> Vec<PcmCandidate> {
    vec![
        PcmCandidate::new(24_000, SampleEncoding::Int16),
        PcmCandidate::new(16_000, SampleEncoding::Int16),
        PcmCandidate::new(22_050, SampleEncoding::Int16),
        PcmCandidate::new(8_000, SampleEncoding::Int16),
        PcmCandidate::new(24_000, SampleEncoding::Float32),
        PcmCandidate::new(24_000, SampleEncoding::Uint8),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub enabled: bool,
    /// Trailing silence that closes an utterance
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_ms: 2_000,
            sweep_interval_ms: 500,
        }
    }
}

impl TranscriptConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Config {
    /// Load configuration from an optional file, overridden by
    /// `VOICE_INTERVIEWER__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICE_INTERVIEWER").separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate().context("Invalid configuration")?;
        Ok(cfg)
    }

    /// Reject values the session timers and audio paths cannot run with
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("live.open_timeout_ms", self.live.open_timeout_ms),
            ("audio.idle_grace_ms", self.audio.idle_grace_ms),
            ("audio.send_sample_rate", u64::from(self.audio.send_sample_rate)),
            ("audio.receive_sample_rate", u64::from(self.audio.receive_sample_rate)),
            ("audio.input_chunk_size", self.audio.input_chunk_size as u64),
            ("transcript.sweep_interval_ms", self.transcript.sweep_interval_ms),
        ];
        for (key, value) in nonzero {
            anyhow::ensure!(value > 0, "{} must be greater than zero", key);
        }
        for candidate in &self.audio.probe_formats {
            anyhow::ensure!(
                candidate.sample_rate > 0,
                "audio.probe_formats sample_rate must be greater than zero"
            );
        }
        Ok(())
    }
}
