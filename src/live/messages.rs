use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Outbound
// ============================================================================

/// Messages sent to the live service, one JSON object per text frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Presence of this object turns transcription on; it has no fields
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

impl ClientMessage {
    /// Session setup: audio responses in the given voice, transcription both ways
    pub fn setup(model: impl Into<String>, voice: impl Into<String>) -> Self {
        ClientMessage::Setup(Setup {
            model: model.into(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.into(),
                        },
                    },
                },
            },
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription: TranscriptionConfig::default(),
        })
    }

    /// The system prompt delivered as one complete user turn
    pub fn prompt(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: vec![TextPart { text: text.into() }],
            }],
            turn_complete: true,
        })
    }

    pub fn realtime_audio(mime_type: &str, data: String) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data,
            }],
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::ClientContent(_) => "clientContent",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Control messages received from the live service
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Acknowledgement of the setup message
    SetupComplete,
    Content(ServerContent),
    /// The service will close the connection soon
    GoAway { time_left: Option<String> },
    Error(String),
    /// Valid JSON of a shape this client does not handle
    Unrecognized(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub model_turn: Option<ModelTurn>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn is_audio(&self) -> bool {
        self.mime_type.contains("audio")
    }
}

impl ServerContent {
    pub fn input_text(&self) -> Option<&str> {
        self.input_transcription.as_ref()?.text.as_deref()
    }

    pub fn output_text(&self) -> Option<&str> {
        self.output_transcription.as_ref()?.text.as_deref()
    }

    pub fn parts(&self) -> &[Part] {
        self.model_turn
            .as_ref()
            .map(|turn| turn.parts.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    go_away: Option<RawGoAway>,
    error: Option<RawError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawGoAway {
    time_left: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawError {
    message: Option<String>,
}

impl ServerEvent {
    /// Parse one control message; only invalid JSON is an error
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            return ServerEvent::Unrecognized(value);
        }
        let raw = match RawServerMessage::deserialize(&value) {
            Ok(raw) => raw,
            Err(_) => return ServerEvent::Unrecognized(value),
        };

        if let Some(content) = raw.server_content {
            return ServerEvent::Content(content);
        }
        if raw.setup_complete.is_some() {
            return ServerEvent::SetupComplete;
        }
        if let Some(go_away) = raw.go_away {
            return ServerEvent::GoAway {
                time_left: go_away.time_left,
            };
        }
        if let Some(error) = raw.error {
            return ServerEvent::Error(
                error
                    .message
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            );
        }

        ServerEvent::Unrecognized(value)
    }
}
