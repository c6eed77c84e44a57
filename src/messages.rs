//! Message types for the Neuphonic streaming protocol.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Outbound
// ============================================================================

/// Text that tells the server to flush and finalize the current utterance.
pub const STOP_TOKEN: &str = " <STOP>";

/// Text fragment to synthesize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    /// Text to synthesize.
    pub text: String,
}

impl TextMessage {
    /// Creates a new text message.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The completion marker.
    pub fn stop() -> Self {
        Self::new(STOP_TOKEN)
    }
}

/// Audio fragment sent to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMessage {
    /// Base64-encoded audio data.
    pub audio: String,
}

impl AudioMessage {
    /// Encodes raw audio bytes.
    pub fn new(audio: &[u8]) -> Self {
        Self {
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
        }
    }
}

/// A message accepted by `send()`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Text fragment, sent as `{"text": ...}`.
    Text(String),
    /// Raw audio, sent base64-encoded as `{"audio": ...}`.
    Audio(Vec<u8>),
    /// Structured message, serialized as-is.
    Json(Value),
    /// Pre-serialized frame, sent verbatim.
    Raw(String),
}

impl OutboundMessage {
    /// Serializes the message into a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Text(text) => serde_json::to_string(&TextMessage::new(text.clone())),
            OutboundMessage::Audio(audio) => serde_json::to_string(&AudioMessage::new(audio)),
            OutboundMessage::Json(value) => serde_json::to_string(value),
            OutboundMessage::Raw(frame) => Ok(frame.clone()),
        }
    }

    /// Text carried by the message, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            OutboundMessage::Text(text) => Some(text),
            OutboundMessage::Json(value) => value.get("text").and_then(Value::as_str),
            OutboundMessage::Audio(_) | OutboundMessage::Raw(_) => None,
        }
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        OutboundMessage::Text(text.to_string())
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        OutboundMessage::Text(text)
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        OutboundMessage::Json(value)
    }
}

impl From<TextMessage> for OutboundMessage {
    fn from(message: TextMessage) -> Self {
        OutboundMessage::Text(message.text)
    }
}

impl From<AudioMessage> for OutboundMessage {
    fn from(message: AudioMessage) -> Self {
        OutboundMessage::Json(serde_json::json!({ "audio": message.audio }))
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Typed wrapper around every server response.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Response payload.
    pub data: T,
    /// Free-form metadata attached by the server.
    pub metadata: Option<Map<String, Value>>,
    /// HTTP-like status code.
    pub status_code: Option<i32>,
    /// Errors reported by the server.
    pub errors: Option<Vec<String>>,
}

/// Payload carried in an [`Envelope`].
pub trait Payload: DeserializeOwned + Send + Sync + 'static {
    /// Text the server reports as synthesized so far.
    fn text(&self) -> Option<&str>;

    /// Whether `close()` should wait for the server to echo the last sent
    /// text before tearing down.
    fn tracks_completion() -> bool {
        true
    }
}

/// Text-to-speech response payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TtsResponse {
    /// Decoded audio bytes.
    #[serde(default, deserialize_with = "base64_audio")]
    pub audio: Option<Vec<u8>>,
    /// Text the audio corresponds to.
    #[serde(default)]
    pub text: Option<String>,
    /// Sampling rate of `audio` in Hz.
    #[serde(default)]
    pub sampling_rate: Option<u32>,
}

impl Payload for TtsResponse {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Kind of agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentResponseType {
    /// Synthesized agent speech.
    AudioResponse,
    /// Transcript of what the user said.
    UserTranscript,
    /// Text generated by the language model.
    LlmResponse,
    /// The user interrupted; stop playing queued audio.
    StopAudioResponse,
}

/// Agent response payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentResponse {
    /// Response kind.
    #[serde(rename = "type")]
    pub kind: AgentResponseType,
    /// Decoded audio bytes.
    #[serde(default, deserialize_with = "base64_audio")]
    pub audio: Option<Vec<u8>>,
    /// Transcript or generated text.
    #[serde(default)]
    pub text: Option<String>,
}

impl Payload for AgentResponse {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    // Agent text is generated or transcribed, never an echo of what was sent.
    fn tracks_completion() -> bool {
        false
    }
}

fn base64_audio<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
        .map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map_err(|e| serde::de::Error::custom(format!("invalid base64 audio: {e}")))
        })
        .transpose()
}
