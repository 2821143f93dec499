use std::fmt;
use std::time::Duration;

use crate::audio::{CaptureConfig, DecoderChain, PcmCandidate, PlaybackConfig};
use crate::config::Config;
use crate::live::ProtocolConfig;
use crate::transcript::CoalescerConfig;

/// Opaque API key; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Configuration for one live conversation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g. "session-6f1c...")
    pub session_id: String,

    pub credential: Credential,

    /// WebSocket endpoint without the credential
    pub endpoint: String,

    pub model: String,
    pub voice: String,

    /// System prompt sent as the first user turn
    pub prompt: String,

    pub open_timeout: Duration,
    pub prompt_delay: Duration,

    pub capture: CaptureConfig,

    /// Ordered PCM hypotheses for inbound audio
    pub probe_formats: Vec<PcmCandidate>,
    pub min_probe_samples: usize,
    pub idle_grace: Duration,

    pub transcript: CoalescerConfig,
    pub sweep_interval: Duration,
}

impl SessionConfig {
    pub fn from_config(cfg: &Config, credential: Credential) -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            credential,
            endpoint: cfg.live.endpoint.clone(),
            model: cfg.live.model.clone(),
            voice: cfg.live.voice.clone(),
            prompt: String::new(),
            open_timeout: cfg.live.open_timeout(),
            prompt_delay: cfg.live.prompt_delay(),
            capture: CaptureConfig {
                sample_rate: cfg.audio.send_sample_rate,
                channels: cfg.audio.channels,
                block_size: cfg.audio.input_chunk_size,
            },
            probe_formats: cfg.audio.probe_formats.clone(),
            min_probe_samples: cfg.audio.min_probe_samples,
            idle_grace: cfg.audio.idle_grace(),
            transcript: CoalescerConfig {
                enabled: cfg.transcript.enabled,
                idle_timeout: cfg.transcript.idle_timeout(),
            },
            sweep_interval: cfg.transcript.sweep_interval(),
        }
    }

    /// Timers that drive the session loop must have a positive period
    pub fn validate(&self) -> anyhow::Result<()> {
        let timers = [
            ("open timeout", self.open_timeout),
            ("idle grace", self.idle_grace),
            ("sweep interval", self.sweep_interval),
        ];
        for (name, value) in timers {
            anyhow::ensure!(!value.is_zero(), "Session {} must be greater than zero", name);
        }
        anyhow::ensure!(
            self.capture.sample_rate > 0 && self.capture.block_size > 0,
            "Session capture rate and block size must be greater than zero"
        );
        Ok(())
    }

    /// Endpoint with the credential attached as the `key` query parameter
    pub fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.credential.expose())
    }

    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            prompt: self.prompt.clone(),
            open_timeout: self.open_timeout,
            prompt_delay: self.prompt_delay,
        }
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            idle_grace: self.idle_grace,
        }
    }

    pub fn decoders(&self) -> DecoderChain {
        DecoderChain::standard(&self.probe_formats, self.min_probe_samples)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default(), Credential::new(""))
    }
}
