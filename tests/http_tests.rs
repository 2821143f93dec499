// Integration tests for the session controller and its HTTP surface
//
// Sessions run against the in-memory transport; requests go straight into
// the router without binding a socket.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;
use voice_interviewer::audio::{
    AudioSink, CaptureBlock, CaptureConfig, CaptureSource, ChannelCapture, NullSink,
};
use voice_interviewer::live::{Connector, InMemoryConnector, RemotePeer, TransportFault};
use voice_interviewer::session::{ControllerError, SessionIo};
use voice_interviewer::{
    create_router, AppState, Config, Credential, SessionController, SessionPhase, StartRequest,
};

/// Session collaborators backed by in-process channels
struct TestIo {
    connector: Arc<dyn Connector>,
    fail_capture: bool,
    captures: StdMutex<Vec<mpsc::Sender<CaptureBlock>>>,
}

impl TestIo {
    fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            fail_capture: false,
            captures: StdMutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl SessionIo for TestIo {
    fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    async fn capture(&self, _config: &CaptureConfig) -> Result<Box<dyn CaptureSource>> {
        if self.fail_capture {
            anyhow::bail!("no input device");
        }
        let (tx, capture) = ChannelCapture::new(8);
        self.captures.lock().unwrap().push(tx);
        Ok(Box::new(capture))
    }

    async fn sink(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(NullSink::new()))
    }
}

fn accepting() -> (SessionController, mpsc::UnboundedReceiver<RemotePeer>) {
    let (connector, peers) = InMemoryConnector::new();
    let controller = SessionController::new(Config::default(), Arc::new(TestIo::new(connector)));
    (controller, peers)
}

fn with_key(key: &str) -> StartRequest {
    StartRequest {
        api_key: Some(key.to_string()),
        ..StartRequest::default()
    }
}

async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn body_text(response: axum::response::Response) -> Result<String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn post_json(uri: &str, body: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

#[tokio::test]
async fn test_controller_requires_credential() -> Result<()> {
    let (controller, _peers) = accepting();

    let err = controller.start(StartRequest::default()).await.err().expect("start should fail");
    assert!(matches!(err, ControllerError::MissingCredential));
    assert_eq!(err.to_string(), "Please enter your API key");

    // Whitespace is not a key
    let err = controller.start(with_key("   ")).await.err().expect("start should fail");
    assert!(matches!(err, ControllerError::MissingCredential));

    assert!(controller.current().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_controller_uses_default_credential() -> Result<()> {
    let (connector, mut peers) = InMemoryConnector::new();
    let controller = SessionController::new(Config::default(), Arc::new(TestIo::new(connector)))
        .with_credential(Credential::new("server-key"));

    let handle = controller.start(StartRequest::default()).await?;
    assert_eq!(handle.phase(), SessionPhase::Active);

    let peer = peers.recv().await.expect("peer");
    assert!(peer.url().ends_with("key=server-key"));

    controller.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_controller_single_session_at_a_time() -> Result<()> {
    let (controller, mut peers) = accepting();

    let first = controller.start(with_key("k")).await?;
    let _peer = peers.recv().await.expect("peer");

    let err = controller.start(with_key("k")).await.err().expect("second start should fail");
    assert!(matches!(err, ControllerError::AlreadyRunning));
    assert_eq!(first.phase(), SessionPhase::Active);

    let stats = controller.stop().await?.expect("stats");
    assert_eq!(stats.phase, SessionPhase::Closed);

    // A new session may start once the previous one has ended
    let second = controller.start(with_key("k")).await?;
    assert_ne!(first.session_id(), second.session_id());

    controller.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_controller_reports_connect_failure() -> Result<()> {
    let connector = InMemoryConnector::rejecting(TransportFault::Rejected { status: 403 });
    let controller = SessionController::new(Config::default(), Arc::new(TestIo::new(connector)));

    let err = controller.start(with_key("bad")).await.err().expect("start should fail");
    assert!(matches!(err, ControllerError::ConnectFailed(_)));
    assert_eq!(err.to_string(), "Policy violation or invalid API key");

    let stats = controller.status().await.expect("failed session is kept");
    assert_eq!(stats.phase, SessionPhase::Failed);
    Ok(())
}

#[tokio::test]
async fn test_controller_reports_unavailable_capture() -> Result<()> {
    let (connector, _peers) = InMemoryConnector::new();
    let mut io = TestIo::new(connector);
    io.fail_capture = true;
    let controller = SessionController::new(Config::default(), Arc::new(io));

    let err = controller.start(with_key("k")).await.err().expect("start should fail");
    assert!(matches!(err, ControllerError::Unavailable(_)));
    assert!(err.to_string().contains("Failed to access microphone"));
    assert!(controller.current().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let (controller, _peers) = accepting();
    let app = create_router(AppState::new(Arc::new(controller)));

    let response = app.oneshot(get("/health")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await?, "OK");
    Ok(())
}

#[tokio::test]
async fn test_queries_without_session_are_not_found() -> Result<()> {
    let (controller, _peers) = accepting();
    let app = create_router(AppState::new(Arc::new(controller)));

    let response = app.clone().oneshot(get("/session/status")?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/session/transcript")?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(post_json("/session/stop", json!({}))?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_start_without_key_is_bad_request() -> Result<()> {
    let (controller, _peers) = accepting();
    let app = create_router(AppState::new(Arc::new(controller)));

    let response = app.oneshot(post_json("/session/start", json!({}))?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await?["error"], "Please enter your API key");
    Ok(())
}

#[tokio::test]
async fn test_session_lifecycle_over_http() -> Result<()> {
    let (controller, mut peers) = accepting();
    let app = create_router(AppState::new(Arc::new(controller)));

    let response = app
        .clone()
        .oneshot(post_json(
            "/session/start",
            json!({ "api_key": "k", "voice": "Kore", "prompt": "Ask me about Rust" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let started = body_json(response).await?;
    assert_eq!(started["status"], "active");
    let session_id = started["session_id"].as_str().unwrap_or_default().to_string();
    assert!(session_id.starts_with("session-"));

    let mut peer = peers.recv().await.expect("peer");
    let setup = peer.next_json().await.expect("setup");
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Kore"
    );

    let response = app
        .clone()
        .oneshot(post_json("/session/start", json!({ "api_key": "k" }))?)
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.clone().oneshot(get("/session/status")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["phase"], "active");

    peer.send_json(&json!({ "serverContent": { "outputTranscription": { "text": "Hi there" } } }));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = app
        .clone()
        .oneshot(post_json("/session/stop", json!({}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let stopped = body_json(response).await?;
    assert_eq!(stopped["session_id"], session_id.as_str());
    assert_eq!(stopped["status"], "closed");
    assert_eq!(stopped["stats"]["transcript_entries"], 1);

    // Transcript outlives the session
    let response = app
        .clone()
        .oneshot(get("/session/transcript")?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let entries = body_json(response).await?;
    assert_eq!(entries[0]["speaker"], "ASSISTANT");
    assert_eq!(entries[0]["text"], "Hi there");

    let response = app.oneshot(get("/session/transcript?format=text")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await?;
    assert!(text.ends_with("] ASSISTANT: Hi there"));

    Ok(())
}
