//! One-shot text-to-speech over server-sent events.

use async_stream::try_stream;
use futures_util::{pin_mut, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::decode::decode_sse_message;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::messages::{Envelope, TtsResponse};

/// Client for the `sse/speak` endpoint.
///
/// Each [`send`](SseClient::send) is an independent HTTP request whose
/// response body is streamed back as decoded envelopes.
#[derive(Debug, Clone)]
pub struct SseClient {
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl SseClient {
    pub fn new(endpoint: Endpoint) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(endpoint.timeout())
            .build()?;
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Exchanges the API key for a JWT; later requests send it as a bearer
    /// token.
    pub async fn jwt_auth(&mut self) -> Result<(), Error> {
        let url = format!("{}/sse/auth", self.endpoint.http_url());
        let (name, value) = self.endpoint.auth_header();

        let response = self
            .http
            .post(&url)
            .header(name, value)
            .timeout(self.endpoint.timeout())
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;

        let token = body
            .pointer("/data/jwt_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decode("auth response has no data.jwt_token".to_string()))?;

        self.endpoint = self.endpoint.clone().with_bearer(token);
        info!(url = %url, "SSE client switched to JWT auth");
        Ok(())
    }

    /// Synthesizes `text` and streams the response envelopes as they arrive.
    ///
    /// Non-2xx responses fail before the stream starts. A malformed message
    /// or an envelope carrying errors ends the stream with that error.
    pub async fn send(
        &self,
        text: &str,
        config: &TtsConfig,
    ) -> Result<impl Stream<Item = Result<Envelope<TtsResponse>, Error>> + Send, Error> {
        let url = format!("{}/sse/speak/{}", self.endpoint.http_url(), config.language());
        let (name, value) = self.endpoint.auth_header();
        let body = json!({ "text": text, "model": config });

        debug!(url = %url, len = text.len(), "SSE request");
        let response = self
            .http
            .post(&url)
            .header(name, value)
            .json(&body)
            .send()
            .await?;
        let mut chunks = Box::pin(check_status(response).await?.bytes_stream());

        Ok(try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = chunks.next().await {
                buffer.extend_from_slice(&chunk?);
                while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    if let Some(envelope) = decode_line(&line)? {
                        yield envelope;
                    }
                }
            }
            if let Some(envelope) = decode_line(&buffer)? {
                yield envelope;
            }
            debug!("SSE stream finished");
        })
    }

    /// Synthesizes `text` and returns the concatenated audio.
    pub async fn synthesize(&self, text: &str, config: &TtsConfig) -> Result<Vec<u8>, Error> {
        let stream = self.send(text, config).await?;
        pin_mut!(stream);

        let mut audio = Vec::new();
        while let Some(envelope) = stream.next().await {
            if let Some(chunk) = envelope?.data.audio {
                audio.extend_from_slice(&chunk);
            }
        }
        Ok(audio)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<Envelope<TtsResponse>>, Error> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::Decode(format!("invalid UTF-8 in SSE stream: {e}")))?;
    decode_sse_message(line)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    warn!(status = %status, "SSE request rejected");
    Err(Error::ServerError {
        message,
        code: i32::from(status.as_u16()),
    })
}
