pub mod audio;
pub mod config;
pub mod http;
pub mod live;
pub mod session;
pub mod transcript;

pub use audio::{
    AudioChunk, AudioFrameEncoder, AudioSink, CaptureBlock, CaptureSource, DecoderChain,
    PlaybackHandle, PlaybackScheduler,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use live::{
    ClientMessage, Connector, FrameClassifier, InMemoryConnector, ServerEvent, SessionFailure,
    SessionMachine, SessionPhase, WsConnector,
};
pub use session::{
    ConfiguredIo, Credential, LiveSession, LiveSessionHandle, SessionConfig, SessionController,
    SessionStats, StartRequest, UiEvent,
};
pub use transcript::{Speaker, Transcript, TranscriptCoalescer, TranscriptEntry};
