//! Session configuration rendered into connection query parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for a streaming session.
///
/// Implementors are serialized with serde; every non-null field becomes a
/// query parameter, so `Option` fields left as `None` take the server-side
/// default.
pub trait SessionConfig: Serialize {
    /// Path of the WebSocket endpoint, relative to the host.
    fn path(&self) -> String;

    /// Non-null parameters as `(key, value)` pairs in lexicographic key order.
    fn query_pairs(&self) -> Vec<(String, String)> {
        let map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return Vec::new(),
        };
        let sorted: BTreeMap<String, Value> = map.into_iter().collect();
        sorted
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect()
    }

    /// URL-encoded query string, empty when every field is null.
    fn to_query_params(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.query_pairs() {
            serializer.append_pair(&key, &value);
        }
        serializer.finish()
    }
}

/// Configuration for a text-to-speech session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Playback speed multiplier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Model name, e.g. `neu_fast` or `neu_hq`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Voice to synthesize with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    /// Output sampling rate in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<u32>,
    /// Output encoding, e.g. `pcm_linear` or `pcm_mulaw`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Language code, also selects the `speak/{lang_code}` endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang_code: Option<String>,
    /// Parameters unknown to this crate, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TtsConfig {
    /// Creates an empty configuration; every field takes the server default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the voice.
    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the speed multiplier.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Sets the output sampling rate.
    pub fn with_sampling_rate(mut self, sampling_rate: u32) -> Self {
        self.sampling_rate = Some(sampling_rate);
        self
    }

    /// Sets the language code.
    pub fn with_lang_code(mut self, lang_code: impl Into<String>) -> Self {
        self.lang_code = Some(lang_code.into());
        self
    }

    /// Adds a parameter this crate does not model.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Language used in endpoint paths, `en` unless set.
    pub fn language(&self) -> &str {
        self.lang_code.as_deref().unwrap_or("en")
    }
}

impl SessionConfig for TtsConfig {
    fn path(&self) -> String {
        format!("speak/{}", self.language())
    }
}

/// Configuration for an agent session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent to converse with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Pipeline mode, e.g. `asr-llm-tts` or `llm-tts`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Language code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang_code: Option<String>,
    /// Voice the agent speaks with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    /// Sampling rate of audio returned by the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<u32>,
    /// Encoding of audio returned by the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Sampling rate of audio sent to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming_sampling_rate: Option<u32>,
    /// Encoding of audio sent to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming_encoding: Option<String>,
    /// Parameters unknown to this crate, passed through verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AgentConfig {
    /// Creates a configuration for the given agent.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    /// Sets the pipeline mode.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Adds a parameter this crate does not model.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl SessionConfig for AgentConfig {
    fn path(&self) -> String {
        "agents".to_string()
    }
}
