use super::config::SessionConfig;
use super::events::UiEvent;
use super::flags::ConversationFlags;
use super::stats::{SessionCounters, SessionStats};
use crate::audio::{
    AudioFrameEncoder, AudioSink, CaptureBlock, CaptureSource, PlaybackCounters, PlaybackHandle,
    PlaybackScheduler,
};
use crate::live::{
    Classified, Command, Connector, FrameClassifier, SessionEvent, SessionFailure,
    SessionMachine, SessionPhase, Transport, TransportEvent, TransportFault,
};
use crate::transcript::{Transcript, TranscriptCoalescer, TranscriptEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, Sleep};
use tracing::{debug, error, info, warn};

type ConnectResult = Result<Result<Box<dyn Transport>, TransportFault>, tokio::time::error::Elapsed>;
type ConnectFuture = Pin<Box<dyn Future<Output = ConnectResult> + Send>>;

/// External collaborators a session runs against
pub struct SessionParts {
    pub connector: Arc<dyn Connector>,
    pub capture: Box<dyn CaptureSource>,
    pub sink: Box<dyn AudioSink>,
}

/// Lifecycle snapshot published by the driver
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub failure: Option<SessionFailure>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// State shared between the driver task and its handle
struct Shared {
    session_id: String,
    started_at: DateTime<Utc>,
    flags: Arc<ConversationFlags>,
    transcript: Arc<Mutex<Transcript>>,
    counters: SessionCounters,
    playback: Arc<PlaybackCounters>,
}

/// A running live conversation
///
/// The driver task owns the transport, timers, capture receiver, coalescer
/// and playback; everything it does is a reaction to one event at a time.
pub struct LiveSession;

impl LiveSession {
    /// Start capture, then spawn the driver which opens the transport
    pub async fn start(
        config: SessionConfig,
        parts: SessionParts,
        events: broadcast::Sender<UiEvent>,
    ) -> Result<LiveSessionHandle> {
        info!("Starting live session: {}", config.session_id);
        config.validate()?;

        let SessionParts {
            connector,
            mut capture,
            sink,
        } = parts;

        let capture_rx = capture
            .start()
            .await
            .context("Failed to access microphone")?;
        info!("Capture started from {}", capture.name());

        let flags = Arc::new(ConversationFlags::new());
        let scheduler =
            PlaybackScheduler::new(config.playback(), config.decoders(), sink, Arc::clone(&flags));
        let playback = PlaybackHandle::spawn(scheduler);

        let shared = Arc::new(Shared {
            session_id: config.session_id.clone(),
            started_at: Utc::now(),
            flags: Arc::clone(&flags),
            transcript: Arc::new(Mutex::new(Transcript::new())),
            counters: SessionCounters::default(),
            playback: playback.counters(),
        });

        let (status_tx, status_rx) = watch::channel(SessionStatus {
            phase: SessionPhase::Idle,
            failure: None,
            ended_at: None,
        });
        let status_tx = Arc::new(status_tx);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let driver = Driver {
            machine: SessionMachine::new(config.protocol()),
            coalescer: TranscriptCoalescer::new(config.transcript.clone()),
            encoder: AudioFrameEncoder::default(),
            classifier: FrameClassifier::default(),
            config,
            connector,
            connecting: None,
            transport: None,
            capture,
            capture_rx: Some(capture_rx),
            prompt_timer: None,
            sweep: None,
            playback,
            shared: Arc::clone(&shared),
            events,
            status_tx: Arc::clone(&status_tx),
            stop_rx,
        };

        let session_id = shared.session_id.clone();
        let task = tokio::spawn(async move {
            // Publish a terminal status if the driver panics
            if let Err(e) = tokio::spawn(driver.run()).await {
                error!("Session {} driver aborted: {}", session_id, e);
                status_tx.send_modify(|status| {
                    if !status.phase.is_terminal() {
                        status.phase = SessionPhase::Failed;
                        status.failure = Some(SessionFailure::Internal);
                        status.ended_at = Some(Utc::now());
                    }
                });
            }
        });

        Ok(LiveSessionHandle {
            shared,
            stop_tx,
            task: Mutex::new(Some(task)),
            status_rx,
        })
    }
}

/// Control handle for a running session
pub struct LiveSessionHandle {
    shared: Arc<Shared>,
    stop_tx: mpsc::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    status_rx: watch::Receiver<SessionStatus>,
}

impl LiveSessionHandle {
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.status_rx.borrow().phase
    }

    pub fn flags(&self) -> Arc<ConversationFlags> {
        Arc::clone(&self.shared.flags)
    }

    pub fn transcript(&self) -> Arc<Mutex<Transcript>> {
        Arc::clone(&self.shared.transcript)
    }

    /// Wait until the session is active, or has ended without getting there
    pub async fn wait_until_settled(&self) -> SessionStatus {
        self.wait_for(|status| {
            status.phase == SessionPhase::Active || status.phase.is_terminal()
        })
        .await
    }

    /// Wait until the session has ended
    pub async fn wait_until_ended(&self) -> SessionStatus {
        self.wait_for(|status| status.phase.is_terminal()).await
    }

    async fn wait_for(&self, predicate: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        let mut rx = self.status_rx.clone();
        if rx.wait_for(|status| predicate(status)).await.is_err() {
            // Driver gone, its last published status is final
            debug!("Session driver finished before the wait completed");
        }
        self.status()
    }

    /// Stop the session and wait for teardown; safe to call repeatedly
    pub async fn stop(&self) -> Result<SessionStats> {
        if self.stop_tx.try_send(()).is_err() {
            debug!("Stop already requested or session finished");
        }

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Session task panicked: {}", e);
            }
            info!("Live session stopped: {}", self.shared.session_id);
        }

        Ok(self.stats().await)
    }

    /// Get current session statistics
    pub async fn stats(&self) -> SessionStats {
        let status = self.status();
        let end = status.ended_at.unwrap_or_else(Utc::now);
        let duration = end.signed_duration_since(self.shared.started_at);

        let transcript_entries = self.shared.transcript.lock().await.len();

        SessionStats {
            session_id: self.shared.session_id.clone(),
            phase: status.phase,
            failure: status.failure.map(|f| f.to_string()),
            started_at: self.shared.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            blocks_sent: self.shared.counters.blocks_sent(),
            blocks_suppressed: self.shared.counters.blocks_suppressed(),
            audio_chunks_received: self.shared.counters.audio_chunks_received(),
            chunks_played: self.shared.playback.played(),
            chunks_dropped: self.shared.playback.dropped(),
            transcript_entries,
        }
    }
}

struct Driver {
    config: SessionConfig,
    machine: SessionMachine,
    connector: Arc<dyn Connector>,
    connecting: Option<ConnectFuture>,
    transport: Option<Box<dyn Transport>>,
    capture: Box<dyn CaptureSource>,
    capture_rx: Option<mpsc::Receiver<CaptureBlock>>,
    prompt_timer: Option<Pin<Box<Sleep>>>,
    sweep: Option<Interval>,
    encoder: AudioFrameEncoder,
    classifier: FrameClassifier,
    coalescer: TranscriptCoalescer,
    playback: PlaybackHandle,
    shared: Arc<Shared>,
    events: broadcast::Sender<UiEvent>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    stop_rx: mpsc::Receiver<()>,
}

async fn connected(connecting: &mut Option<ConnectFuture>) -> ConnectResult {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn transport_event(transport: &mut Option<Box<dyn Transport>>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

async fn capture_block(rx: &mut Option<mpsc::Receiver<CaptureBlock>>) -> Option<CaptureBlock> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn timer(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        self.dispatch(SessionEvent::Start).await;

        while !self.machine.phase().is_terminal() {
            let event = tokio::select! {
                result = connected(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(Ok(transport)) => {
                            self.transport = Some(transport);
                            SessionEvent::TransportOpened
                        }
                        Ok(Err(fault)) => {
                            warn!("Failed to connect: {}", fault);
                            SessionEvent::TransportError(fault.failure())
                        }
                        Err(_) => SessionEvent::OpenTimedOut,
                    }
                }

                event = transport_event(&mut self.transport) => {
                    match self.on_transport_event(event).await {
                        Some(event) => event,
                        None => continue,
                    }
                }

                block = capture_block(&mut self.capture_rx) => {
                    match block {
                        Some(block) => self.forward_block(block).await,
                        None => {
                            info!("Capture source ended");
                            self.capture_rx = None;
                        }
                    }
                    continue;
                }

                _ = timer(&mut self.prompt_timer) => {
                    self.prompt_timer = None;
                    SessionEvent::PromptDelayElapsed
                }

                _ = tick(&mut self.sweep) => {
                    let entries = self.coalescer.sweep(Instant::now());
                    self.record(entries).await;
                    continue;
                }

                _ = self.stop_rx.recv() => SessionEvent::StopRequested,
            };

            self.dispatch(event).await;
        }

        let phase = self.machine.phase();
        let failure = self.machine.failure().cloned();
        self.status_tx.send_replace(SessionStatus {
            phase,
            failure,
            ended_at: Some(Utc::now()),
        });
        info!("Session {} finished ({})", self.shared.session_id, phase);
    }

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) -> Option<SessionEvent> {
        match event {
            Some(TransportEvent::Frame(frame)) => match self.classifier.classify(frame).await {
                Ok(Classified::Control(event)) => Some(SessionEvent::Inbound(event)),
                Ok(Classified::Audio(chunk)) => Some(SessionEvent::AudioReceived(chunk)),
                Err(e) => {
                    warn!("Dropping inbound frame: {}", e);
                    None
                }
            },
            Some(TransportEvent::Closed { code, reason }) => {
                info!("Transport closed with code {}", code);
                self.transport = None;
                Some(SessionEvent::TransportClosed { code, reason })
            }
            Some(TransportEvent::Error(fault)) => {
                warn!("Transport error: {}", fault);
                Some(SessionEvent::TransportError(fault.failure()))
            }
            None => {
                self.transport = None;
                Some(SessionEvent::TransportClosed {
                    code: 1006,
                    reason: "transport ended".to_string(),
                })
            }
        }
    }

    async fn forward_block(&mut self, block: CaptureBlock) {
        let open = self.machine.phase() == SessionPhase::Active
            && self.shared.flags.capture_allowed();

        let Some(transport) = self.transport.as_mut().filter(|_| open) else {
            self.shared
                .counters
                .blocks_suppressed
                .fetch_add(1, Ordering::SeqCst);
            return;
        };

        let message = self.encoder.encode(&block);
        match message.to_json() {
            Ok(json) => {
                if let Err(e) = transport.send_text(json).await {
                    warn!("Failed to send audio block: {}", e);
                    return;
                }
                self.shared.counters.blocks_sent.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!("Failed to serialize audio block: {}", e),
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        let before = self.machine.phase();

        for command in self.machine.handle(event) {
            self.execute(command).await;
        }

        if self.machine.phase() == SessionPhase::Closing {
            for command in self.machine.handle(SessionEvent::TeardownComplete) {
                self.execute(command).await;
            }
        }

        let phase = self.machine.phase();
        if phase != before {
            let failure = self.machine.failure().cloned();
            self.status_tx.send_modify(|status| {
                status.phase = phase;
                status.failure = failure;
            });
            self.notify(UiEvent::Phase(phase));
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::OpenTransport { timeout } => {
                let connector = Arc::clone(&self.connector);
                let url = self.config.url();
                self.connecting = Some(Box::pin(tokio::time::timeout(timeout, async move {
                    connector.connect(&url).await
                })));
            }
            Command::Send(message) => {
                let Some(transport) = self.transport.as_mut() else {
                    warn!("No open transport, dropping {} message", message.kind());
                    return;
                };
                match message.to_json() {
                    Ok(json) => match transport.send_text(json).await {
                        Ok(()) => debug!("Sent {} message", message.kind()),
                        Err(e) => warn!("Failed to send {} message: {}", message.kind(), e),
                    },
                    Err(e) => warn!("Failed to serialize {} message: {}", message.kind(), e),
                }
            }
            Command::ArmPromptTimer { delay } => {
                self.prompt_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Command::CancelPromptTimer => self.prompt_timer = None,
            Command::StartCapture => {
                self.shared.flags.set_listening(true);
                info!("Listening");
            }
            Command::StopCapture => {
                self.shared.flags.set_listening(false);
                self.capture_rx = None;
                if self.capture.is_capturing() {
                    if let Err(e) = self.capture.stop().await {
                        warn!("Failed to stop capture: {:#}", e);
                    }
                }
            }
            Command::StartSweep => {
                let period = self.config.sweep_interval;
                self.sweep = Some(tokio::time::interval_at(Instant::now() + period, period));
            }
            Command::StopSweep => self.sweep = None,
            Command::FlushTranscripts => {
                let entries = self.coalescer.flush();
                self.record(entries).await;
            }
            Command::StopPlayback => self.playback.stop(),
            Command::CloseTransport => {
                self.connecting = None;
                if let Some(mut transport) = self.transport.take() {
                    if let Err(e) = transport.close().await {
                        warn!("Failed to close transport: {}", e);
                    }
                }
            }
            Command::AppendTranscript { speaker, text } => {
                self.coalescer.append_fragment(speaker, &text, Instant::now());
            }
            Command::PlayAudio(chunk) => {
                self.shared
                    .counters
                    .audio_chunks_received
                    .fetch_add(1, Ordering::SeqCst);
                self.playback.enqueue(chunk);
            }
            Command::Status { level, message } => {
                self.notify(UiEvent::Status { level, message });
            }
            Command::Log { source, text } => {
                self.notify(UiEvent::Message { source, text });
            }
        }
    }

    async fn record(&mut self, entries: Vec<TranscriptEntry>) {
        if entries.is_empty() {
            return;
        }

        let mut transcript = self.shared.transcript.lock().await;
        for entry in entries {
            info!("{}", entry.to_line());
            transcript.push(entry.clone());
            self.notify(UiEvent::Transcript(entry));
        }
    }

    fn notify(&self, event: UiEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
