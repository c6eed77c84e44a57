//! Entry point bundling an endpoint with the clients built from it.

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::session::{AgentWebsocketClient, ClientOptions, TtsWebsocketClient};
use crate::sse::SseClient;

/// Factory for the SSE and WebSocket clients of one account.
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Endpoint,
    options: ClientOptions,
}

impl Client {
    /// Creates a client for `host` authenticated with `api_key`.
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        Self::from_endpoint(Endpoint::new(api_key, host))
    }

    /// Creates a client from `NEUPHONIC_API_KEY` and `NEUPHONIC_API_URL`.
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self::from_endpoint(Endpoint::from_env()?))
    }

    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            options: ClientOptions::default(),
        }
    }

    /// Sets the transport options used by the WebSocket clients.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Streaming text-to-speech session.
    pub fn tts_websocket(&self) -> TtsWebsocketClient {
        TtsWebsocketClient::with_options(self.endpoint.clone(), self.options.clone())
    }

    /// Streaming agent session.
    pub fn agent_websocket(&self) -> AgentWebsocketClient {
        AgentWebsocketClient::with_options(self.endpoint.clone(), self.options.clone())
    }

    /// One-shot SSE text-to-speech.
    pub fn sse(&self) -> Result<SseClient, Error> {
        SseClient::new(self.endpoint.clone())
    }
}
