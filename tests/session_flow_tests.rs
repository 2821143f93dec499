// Integration tests for the live session driver
//
// These tests run a full session against the in-memory transport with a
// paused clock, so the prompt delay, sweep interval and open timeout are
// exercised without real waiting.

use anyhow::Result;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use voice_interviewer::audio::{CaptureBlock, ChannelCapture, NullSink};
use voice_interviewer::live::{
    Connector, InMemoryConnector, RemotePeer, SessionFailure, StatusLevel, Transport,
    TransportFault,
};
use voice_interviewer::session::{
    Credential, LiveSession, LiveSessionHandle, SessionConfig, SessionParts, UiEvent,
};
use voice_interviewer::{SessionPhase, Speaker};

struct Harness {
    handle: LiveSessionHandle,
    peer: RemotePeer,
    mic: mpsc::Sender<CaptureBlock>,
    events: broadcast::Receiver<UiEvent>,
}

fn session_config(prompt: &str) -> SessionConfig {
    SessionConfig {
        credential: Credential::new("test-key"),
        prompt: prompt.to_string(),
        ..SessionConfig::default()
    }
}

async fn start_session(config: SessionConfig) -> Result<Harness> {
    let (connector, mut peers) = InMemoryConnector::new();
    let (mic, capture) = ChannelCapture::new(16);
    let (events_tx, events) = broadcast::channel(256);

    let handle = LiveSession::start(
        config,
        SessionParts {
            connector: Arc::new(connector),
            capture: Box::new(capture),
            sink: Box::new(NullSink::new()),
        },
        events_tx,
    )
    .await?;

    let peer = peers.recv().await.expect("session should connect");

    Ok(Harness {
        handle,
        peer,
        mic,
        events,
    })
}

fn transcript_fragment(field: &str, text: &str) -> Value {
    json!({ "serverContent": { field: { "text": text } } })
}

fn block(value: f32) -> CaptureBlock {
    CaptureBlock {
        samples: vec![value; 1024],
        sample_rate: 16000,
        timestamp_ms: 0,
    }
}

fn drain(events: &mut broadcast::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn test_setup_then_exactly_one_prompt_after_delay() -> Result<()> {
    let mut h = start_session(session_config("You are a friendly interviewer.")).await?;

    assert!(h.peer.url().ends_with("?key=test-key"));

    let status = h.handle.wait_until_settled().await;
    assert_eq!(status.phase, SessionPhase::Active);

    let setup = h.peer.next_json().await.expect("setup message");
    assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-live-001");
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Puck"
    );
    assert_eq!(setup["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert_eq!(setup["setup"]["inputAudioTranscription"], json!({}));
    assert_eq!(setup["setup"]["outputAudioTranscription"], json!({}));

    // Not before the settle delay
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(h.peer.try_next_sent().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let prompt = h.peer.next_json().await.expect("prompt message");
    assert_eq!(
        prompt,
        json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": "You are a friendly interviewer." }] }],
                "turnComplete": true
            }
        })
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.peer.try_next_sent().is_none(), "prompt must be sent once");
    assert_eq!(h.handle.phase(), SessionPhase::Active);

    let messages: Vec<String> = drain(&mut h.events)
        .into_iter()
        .filter_map(|event| match event {
            UiEvent::Message { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(
        messages,
        vec![
            "Assistant connected with live transcription".to_string(),
            "Initial prompt sent - AI should respond soon".to_string(),
        ]
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_flushes_pending_fragments() -> Result<()> {
    let h = start_session(session_config("hi")).await?;
    h.handle.wait_until_settled().await;

    for fragment in ["Hel", "lo wo", "rld"] {
        h.peer
            .send_json(&transcript_fragment("inputTranscription", fragment));
    }
    h.peer.close(1000, "");

    let status = h.handle.wait_until_ended().await;
    assert_eq!(status.phase, SessionPhase::Closed);
    assert!(status.failure.is_none());

    let transcript = h.handle.transcript();
    let transcript = transcript.lock().await;
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript.entries()[0].speaker, Speaker::User);
    assert_eq!(transcript.entries()[0].text, "Hello world");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_sweep_finalizes_utterances() -> Result<()> {
    let h = start_session(session_config("hi")).await?;
    h.handle.wait_until_settled().await;

    h.peer
        .send_json(&transcript_fragment("outputTranscription", "What brings you here?"));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.handle.transcript().lock().await.len(), 0);

    // Idle threshold plus one sweep period
    tokio::time::sleep(Duration::from_millis(1100)).await;
    {
        let transcript = h.handle.transcript();
        let transcript = transcript.lock().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].speaker, Speaker::Assistant);
    }

    let stats = h.handle.stop().await?;
    assert_eq!(stats.transcript_entries, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_fails_and_still_flushes() -> Result<()> {
    let mut h = start_session(session_config("hi")).await?;
    h.handle.wait_until_settled().await;

    h.peer
        .send_json(&transcript_fragment("inputTranscription", "half a sentence"));
    h.peer.close(1006, "");

    let status = h.handle.wait_until_ended().await;
    assert_eq!(status.phase, SessionPhase::Failed);
    assert_eq!(status.failure, Some(SessionFailure::AbnormalClosure));
    assert_eq!(h.handle.transcript().lock().await.len(), 1);

    let errors: Vec<String> = drain(&mut h.events)
        .into_iter()
        .filter_map(|event| match event {
            UiEvent::Status {
                level: StatusLevel::Error,
                message,
            } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec!["Connection lost unexpectedly".to_string()]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_open_timeout_fails_session() -> Result<()> {
    let (_mic, capture) = ChannelCapture::new(4);
    let (events, _) = broadcast::channel(16);

    let handle = LiveSession::start(
        session_config("hi"),
        SessionParts {
            connector: Arc::new(InMemoryConnector::stalled()),
            capture: Box::new(capture),
            sink: Box::new(NullSink::new()),
        },
        events,
    )
    .await?;

    let status = handle.wait_until_settled().await;
    assert_eq!(status.phase, SessionPhase::Failed);
    assert_eq!(status.failure, Some(SessionFailure::OpenTimeout));
    assert_eq!(status.failure.unwrap().to_string(), "Connection timeout");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() -> Result<()> {
    let mut h = start_session(session_config("hi")).await?;
    h.handle.wait_until_settled().await;

    h.peer
        .send_json(&transcript_fragment("inputTranscription", "unfinished"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let first = h.handle.stop().await?;
    let second = h.handle.stop().await?;

    assert_eq!(first.phase, SessionPhase::Closed);
    assert_eq!(second.phase, SessionPhase::Closed);
    assert_eq!(first.transcript_entries, 1);
    assert_eq!(second.transcript_entries, 1);
    assert!(first.failure.is_none());
    assert!(h.peer.is_closed_by_client());

    let ended = drain(&mut h.events)
        .into_iter()
        .filter(|event| matches!(event, UiEvent::Status { message, .. } if message == "Session ended"))
        .count();
    assert_eq!(ended, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_capture_is_gated_by_phase_and_flags() -> Result<()> {
    let mut h = start_session(session_config("")).await?;
    h.handle.wait_until_settled().await;
    h.peer.next_json().await.expect("setup message");

    h.mic.send(block(0.5)).await?;
    let audio = h.peer.next_json().await.expect("realtime input");
    let chunk = &audio["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm");
    let pcm = base64::engine::general_purpose::STANDARD.decode(chunk["data"].as_str().unwrap())?;
    assert_eq!(pcm.len(), 2048);
    assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 16384);

    // Assistant speaking: the microphone is muted
    h.handle.flags().set_speaking(true);
    h.mic.send(block(0.5)).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.peer.try_next_sent().is_none());

    h.handle.flags().set_speaking(false);
    h.handle.flags().set_transcribing(true);
    h.mic.send(block(0.5)).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.peer.try_next_sent().is_none());

    let stats = h.handle.stats().await;
    assert_eq!(stats.blocks_sent, 1);
    assert_eq!(stats.blocks_suppressed, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_inbound_audio_paths_reach_playback() -> Result<()> {
    let h = start_session(session_config("")).await?;
    h.handle.wait_until_settled().await;

    // 100 ms of 24 kHz int16 as a binary frame
    h.peer.send_binary(vec![0u8; 4800]);

    // Same, inline in a model turn, with a text part
    let inline = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 4800]);
    h.peer.send_json(&json!({
        "serverContent": { "modelTurn": { "parts": [
            { "text": "Let's begin." },
            { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": inline } }
        ] } }
    }));

    // Deferred payload carrying JSON is routed as control, not audio
    h.peer.send_deferred(br#"  {"setupComplete":{}}"#.to_vec());

    // Too short for any candidate format
    h.peer.send_binary(vec![1, 2, 3]);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = h.handle.stats().await;
    assert_eq!(stats.audio_chunks_received, 3);
    assert_eq!(stats.chunks_played, 2);
    assert_eq!(stats.chunks_dropped, 1);
    assert!(h.handle.flags().is_speaking());

    // Speaking clears once the queue has been idle past the grace period
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!h.handle.flags().is_speaking());

    Ok(())
}

/// Connector whose connect attempt panics inside the driver
struct PanickingConnector;

#[async_trait::async_trait]
impl Connector for PanickingConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportFault> {
        panic!("connector exploded");
    }
}

fn parts(connector: impl Connector + 'static) -> SessionParts {
    let (_mic, capture) = ChannelCapture::new(4);
    SessionParts {
        connector: Arc::new(connector),
        capture: Box::new(capture),
        sink: Box::new(NullSink::new()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_connecting_closes_cleanly() -> Result<()> {
    let (events, mut rx) = broadcast::channel(16);
    let handle = LiveSession::start(
        session_config("hi"),
        parts(InMemoryConnector::stalled()),
        events,
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.phase(), SessionPhase::Connecting);

    let stats = handle.stop().await?;
    assert_eq!(stats.phase, SessionPhase::Closed);
    assert!(stats.failure.is_none());

    // The abandoned connect does not fire the open timeout later
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(handle.phase(), SessionPhase::Closed);

    let timeouts = drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event, UiEvent::Status { message, .. } if message == "Connection timeout"))
        .count();
    assert_eq!(timeouts, 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_playback_clears_speaking() -> Result<()> {
    let h = start_session(session_config("")).await?;
    h.handle.wait_until_settled().await;

    // One second of 24 kHz int16 audio
    h.peer.send_binary(vec![0u8; 48_000]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.handle.flags().is_speaking());
    assert_eq!(h.handle.stats().await.chunks_played, 1);

    let stats = h.handle.stop().await?;
    assert_eq!(stats.phase, SessionPhase::Closed);
    assert!(stats.failure.is_none());
    assert!(!h.handle.flags().is_speaking());
    assert!(h.peer.is_closed_by_client());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_sweep_interval_is_rejected_at_start() -> Result<()> {
    let (events, _) = broadcast::channel(16);
    let config = SessionConfig {
        sweep_interval: Duration::ZERO,
        ..session_config("hi")
    };

    let result = LiveSession::start(config, parts(InMemoryConnector::stalled()), events).await;
    let err = result.err().expect("start should fail");
    assert!(err.to_string().contains("sweep interval"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_driver_panic_ends_session_as_failed() -> Result<()> {
    let (events, _) = broadcast::channel(16);
    let handle = LiveSession::start(session_config("hi"), parts(PanickingConnector), events).await?;

    let status = handle.wait_until_ended().await;
    assert_eq!(status.phase, SessionPhase::Failed);
    assert_eq!(status.failure, Some(SessionFailure::Internal));
    assert!(status.ended_at.is_some());

    let stats = handle.stop().await?;
    assert_eq!(stats.phase, SessionPhase::Failed);
    assert_eq!(stats.failure.as_deref(), Some("Session stopped unexpectedly"));

    Ok(())
}
