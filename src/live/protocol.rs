// Session lifecycle as a pure state machine
//
// `SessionMachine::handle` takes one event and returns the side effects to
// run, in order. It never performs I/O; the async driver owns the transport,
// timers, capture and playback and feeds their outcomes back as events.
//
// Idle -> Connecting -> Active -> Closing -> Closed
//            |            |
//            +-> Failed <-+

use base64::Engine;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::failure::SessionFailure;
use super::messages::{ClientMessage, ServerContent, ServerEvent};
use crate::audio::AudioChunk;
use crate::transcript::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Active => "active",
            SessionPhase::Closing => "closing",
            SessionPhase::Closed => "closed",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Author of a conversation log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageSource {
    System,
    Ai,
    User,
    Assistant,
}

impl From<Speaker> for MessageSource {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => MessageSource::User,
            Speaker::Assistant => MessageSource::Assistant,
        }
    }
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageSource::System => "SYSTEM",
            MessageSource::Ai => "AI",
            MessageSource::User => "USER",
            MessageSource::Assistant => "ASSISTANT",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub model: String,
    pub voice: String,
    /// First conversational turn; skipped when empty
    pub prompt: String,
    pub open_timeout: Duration,
    pub prompt_delay: Duration,
}

#[derive(Debug)]
pub enum SessionEvent {
    Start,
    TransportOpened,
    OpenTimedOut,
    TransportError(SessionFailure),
    TransportClosed { code: u16, reason: String },
    PromptDelayElapsed,
    Inbound(ServerEvent),
    AudioReceived(AudioChunk),
    StopRequested,
    TeardownComplete,
}

#[derive(Debug)]
pub enum Command {
    OpenTransport { timeout: Duration },
    Send(ClientMessage),
    ArmPromptTimer { delay: Duration },
    CancelPromptTimer,
    StartCapture,
    StopCapture,
    StartSweep,
    StopSweep,
    FlushTranscripts,
    StopPlayback,
    CloseTransport,
    AppendTranscript { speaker: Speaker, text: String },
    PlayAudio(AudioChunk),
    Status { level: StatusLevel, message: String },
    Log { source: MessageSource, text: String },
}

impl Command {
    fn status(level: StatusLevel, message: impl Into<String>) -> Self {
        Command::Status {
            level,
            message: message.into(),
        }
    }

    fn system(text: impl Into<String>) -> Self {
        Command::Log {
            source: MessageSource::System,
            text: text.into(),
        }
    }
}

pub struct SessionMachine {
    config: ProtocolConfig,
    phase: SessionPhase,
    failure: Option<SessionFailure>,
    shutdown_requested: bool,
    prompt_sent: bool,
}

impl SessionMachine {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            phase: SessionPhase::Idle,
            failure: None,
            shutdown_requested: false,
            prompt_sent: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn prompt_sent(&self) -> bool {
        self.prompt_sent
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Command> {
        match (self.phase, event) {
            (SessionPhase::Idle, SessionEvent::Start) => {
                self.phase = SessionPhase::Connecting;
                info!("Session connecting");
                vec![
                    Command::status(StatusLevel::Info, "Connecting to Gemini Live..."),
                    Command::OpenTransport {
                        timeout: self.config.open_timeout,
                    },
                ]
            }

            (SessionPhase::Connecting, SessionEvent::TransportOpened) => self.on_opened(),

            (SessionPhase::Connecting, SessionEvent::OpenTimedOut) => {
                self.fail(SessionFailure::OpenTimeout)
            }

            (SessionPhase::Connecting | SessionPhase::Active, SessionEvent::TransportError(f)) => {
                self.fail(f)
            }

            (
                SessionPhase::Connecting | SessionPhase::Active,
                SessionEvent::TransportClosed { code, reason },
            ) => self.on_closed(code, &reason),

            (SessionPhase::Active, SessionEvent::PromptDelayElapsed) => self.on_prompt_due(),

            (SessionPhase::Active, SessionEvent::Inbound(event)) => self.on_server_event(event),

            (SessionPhase::Active, SessionEvent::AudioReceived(chunk)) => {
                vec![Command::PlayAudio(chunk)]
            }

            (_, SessionEvent::StopRequested) => self.on_stop(),

            (SessionPhase::Closing, SessionEvent::TeardownComplete) => {
                self.phase = SessionPhase::Closed;
                info!("Session closed");
                vec![Command::status(StatusLevel::Info, "Session ended")]
            }

            (phase, event) => {
                debug!("Ignoring {:?} in phase {}", event, phase);
                Vec::new()
            }
        }
    }

    fn teardown() -> Vec<Command> {
        vec![
            Command::CancelPromptTimer,
            Command::StopSweep,
            Command::FlushTranscripts,
            Command::StopCapture,
            Command::StopPlayback,
            Command::CloseTransport,
        ]
    }

    fn on_opened(&mut self) -> Vec<Command> {
        self.phase = SessionPhase::Active;
        info!("Session active");

        vec![
            Command::Send(ClientMessage::setup(&self.config.model, &self.config.voice)),
            Command::status(StatusLevel::Success, "Connected! Start talking..."),
            Command::system("Assistant connected with live transcription"),
            Command::ArmPromptTimer {
                delay: self.config.prompt_delay,
            },
            Command::StartCapture,
            Command::StartSweep,
        ]
    }

    fn on_prompt_due(&mut self) -> Vec<Command> {
        if self.prompt_sent {
            return Vec::new();
        }
        self.prompt_sent = true;

        if self.config.prompt.trim().is_empty() {
            warn!("No prompt configured, skipping initial prompt");
            return vec![Command::status(
                StatusLevel::Warning,
                "No prompt configured, waiting for the user to speak",
            )];
        }

        vec![
            Command::Send(ClientMessage::prompt(self.config.prompt.clone())),
            Command::system("Initial prompt sent - AI should respond soon"),
        ]
    }

    fn on_server_event(&mut self, event: ServerEvent) -> Vec<Command> {
        match event {
            ServerEvent::Content(content) => Self::on_content(content),
            ServerEvent::SetupComplete => {
                debug!("Setup acknowledged");
                Vec::new()
            }
            ServerEvent::GoAway { time_left } => {
                warn!("Service will disconnect soon (time left: {:?})", time_left);
                vec![Command::status(
                    StatusLevel::Warning,
                    "The service will end this session soon",
                )]
            }
            ServerEvent::Error(message) => {
                warn!("Service reported an error: {}", message);
                vec![Command::status(
                    StatusLevel::Error,
                    format!("Service error: {}", message),
                )]
            }
            ServerEvent::Unrecognized(value) => {
                debug!("Unrecognized control message: {}", value);
                Vec::new()
            }
        }
    }

    fn on_content(content: ServerContent) -> Vec<Command> {
        let mut commands = Vec::new();

        if let Some(text) = content.input_text() {
            commands.push(Command::AppendTranscript {
                speaker: Speaker::User,
                text: text.to_string(),
            });
        }
        if let Some(text) = content.output_text() {
            commands.push(Command::AppendTranscript {
                speaker: Speaker::Assistant,
                text: text.to_string(),
            });
        }

        for part in content.parts() {
            if let Some(text) = &part.text {
                commands.push(Command::Log {
                    source: MessageSource::Ai,
                    text: text.clone(),
                });
            }

            let Some(inline) = &part.inline_data else {
                continue;
            };
            if !inline.is_audio() {
                continue;
            }
            match base64::engine::general_purpose::STANDARD.decode(&inline.data) {
                Ok(bytes) => commands.push(Command::PlayAudio(AudioChunk::inline(
                    bytes,
                    inline.mime_type.clone(),
                ))),
                Err(e) => warn!("Dropping inline audio with invalid base64: {}", e),
            }
        }

        if content.interrupted {
            debug!("Model turn interrupted");
        }
        if content.turn_complete {
            debug!("Model turn complete");
        }

        commands
    }

    fn on_closed(&mut self, code: u16, reason: &str) -> Vec<Command> {
        match SessionFailure::from_close_code(code) {
            None => {
                info!("Remote closed the session normally");
                self.phase = SessionPhase::Closed;
                let mut commands = Self::teardown();
                commands.push(Command::status(StatusLevel::Info, "Session ended normally"));
                commands
            }
            Some(failure) => {
                if !reason.is_empty() {
                    warn!("Remote closed with code {}: {}", code, reason);
                }
                self.fail(failure)
            }
        }
    }

    fn on_stop(&mut self) -> Vec<Command> {
        if self.shutdown_requested || self.phase.is_terminal() {
            return Vec::new();
        }
        self.shutdown_requested = true;

        if self.phase == SessionPhase::Idle {
            self.phase = SessionPhase::Closed;
            return Vec::new();
        }

        info!("Stopping session");
        self.phase = SessionPhase::Closing;
        Self::teardown()
    }

    fn fail(&mut self, failure: SessionFailure) -> Vec<Command> {
        warn!("Session failed: {}", failure);
        self.phase = SessionPhase::Failed;

        let mut commands = Self::teardown();
        if !self.shutdown_requested {
            commands.push(Command::status(StatusLevel::Error, failure.to_string()));
        }
        self.failure = Some(failure);
        commands
    }
}
