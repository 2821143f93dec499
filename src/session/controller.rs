use super::config::{Credential, SessionConfig};
use super::events::UiEvent;
use super::session::{LiveSession, LiveSessionHandle, SessionParts};
use super::stats::SessionStats;
use crate::audio::{
    create_sink, AudioSink, CaptureConfig, CaptureSource, CaptureSourceFactory, InputSource,
    OutputTarget,
};
use crate::config::Config;
use crate::live::{Connector, SessionFailure, SessionPhase, WsConnector};
use crate::transcript::Transcript;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

/// Provides the collaborators for each new session
#[async_trait::async_trait]
pub trait SessionIo: Send + Sync {
    fn connector(&self) -> Arc<dyn Connector>;

    async fn capture(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureSource>>;

    async fn sink(&self) -> Result<Box<dyn AudioSink>>;
}

/// Collaborators chosen by configuration: WebSocket transport, configured
/// input and output
pub struct ConfiguredIo {
    connector: Arc<WsConnector>,
    input: InputSource,
    output: OutputTarget,
    output_sample_rate: u32,
}

impl ConfiguredIo {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            connector: Arc::new(WsConnector::new()),
            input: cfg.audio.input.clone(),
            output: cfg.audio.output.clone(),
            output_sample_rate: cfg.audio.receive_sample_rate,
        }
    }
}

#[async_trait::async_trait]
impl SessionIo for ConfiguredIo {
    fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    async fn capture(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureSource>> {
        CaptureSourceFactory::create(&self.input, config.clone())
    }

    async fn sink(&self) -> Result<Box<dyn AudioSink>> {
        create_sink(&self.output, self.output_sample_rate).await
    }
}

/// Per-start overrides of the configured session settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    pub api_key: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Please enter your API key")]
    MissingCredential,

    #[error("A session is already running")]
    AlreadyRunning,

    /// Capture or output could not be set up
    #[error("{0:#}")]
    Unavailable(anyhow::Error),

    #[error("{0}")]
    ConnectFailed(SessionFailure),
}

/// Top-level orchestration: one session at a time, wired from configuration
pub struct SessionController {
    config: Config,
    io: Arc<dyn SessionIo>,
    default_credential: Option<Credential>,
    events: broadcast::Sender<UiEvent>,
    current: RwLock<Option<Arc<LiveSessionHandle>>>,
    start_gate: Mutex<()>,
}

impl SessionController {
    pub fn new(config: Config, io: Arc<dyn SessionIo>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            io,
            default_credential: None,
            events,
            current: RwLock::new(None),
            start_gate: Mutex::new(()),
        }
    }

    /// Credential used when a start request carries none
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.default_credential = Some(credential);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub async fn current(&self) -> Option<Arc<LiveSessionHandle>> {
        self.current.read().await.clone()
    }

    /// Start a session and wait until it is active or has failed
    pub async fn start(
        &self,
        request: StartRequest,
    ) -> Result<Arc<LiveSessionHandle>, ControllerError> {
        let _gate = self.start_gate.lock().await;

        if let Some(existing) = self.current.read().await.as_ref() {
            if !existing.phase().is_terminal() {
                return Err(ControllerError::AlreadyRunning);
            }
        }

        let credential = request
            .api_key
            .map(Credential::new)
            .or_else(|| self.default_credential.clone())
            .filter(|credential| !credential.is_empty())
            .ok_or(ControllerError::MissingCredential)?;

        let mut config = SessionConfig::from_config(&self.config, credential);
        if let Some(voice) = request.voice {
            config.voice = voice;
        }
        if let Some(model) = request.model {
            config.model = model;
        }
        if let Some(prompt) = request.prompt {
            config.prompt = prompt;
        }

        let session_id = config.session_id.clone();
        info!("Starting session {} (voice {}, model {})", session_id, config.voice, config.model);

        let capture = self
            .io
            .capture(&config.capture)
            .await
            .context("Failed to access microphone")
            .map_err(ControllerError::Unavailable)?;
        let sink = self
            .io
            .sink()
            .await
            .context("Failed to open audio output")
            .map_err(ControllerError::Unavailable)?;

        let parts = SessionParts {
            connector: self.io.connector(),
            capture,
            sink,
        };

        let handle = LiveSession::start(config, parts, self.events.clone())
            .await
            .map_err(ControllerError::Unavailable)?;
        let handle = Arc::new(handle);

        // Replacing the previous session drops its transcript
        *self.current.write().await = Some(Arc::clone(&handle));

        let status = handle.wait_until_settled().await;
        match status.phase {
            SessionPhase::Active => {
                info!("Session {} active", session_id);
                Ok(handle)
            }
            _ => {
                let failure = status
                    .failure
                    .unwrap_or(SessionFailure::Closed { code: 1000 });
                warn!("Session {} did not become active: {}", session_id, failure);
                Err(ControllerError::ConnectFailed(failure))
            }
        }
    }

    /// Stop the current session; `None` when no session was ever started
    pub async fn stop(&self) -> Result<Option<SessionStats>> {
        let Some(handle) = self.current().await else {
            return Ok(None);
        };
        let stats = handle.stop().await.context("Failed to stop session")?;
        Ok(Some(stats))
    }

    pub async fn status(&self) -> Option<SessionStats> {
        let handle = self.current().await?;
        Some(handle.stats().await)
    }

    /// Transcript of the current or most recent session
    pub async fn transcript(&self) -> Option<Transcript> {
        let handle = self.current().await?;
        let transcript = handle.transcript();
        let transcript = transcript.lock().await;
        Some(transcript.clone())
    }
}
