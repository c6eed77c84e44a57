//! Decoding of inbound WebSocket frames and SSE messages into envelopes.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::messages::Envelope;

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    status_code: Option<i32>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

/// Decodes one WebSocket text frame.
///
/// Envelopes carrying a non-empty `errors` list are returned as
/// [`Error::ServerError`].
pub fn decode_frame<T: DeserializeOwned>(text: &str) -> Result<Envelope<T>, Error> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?;

    if let Some(errors) = raw.errors.as_ref().filter(|errors| !errors.is_empty()) {
        return Err(Error::ServerError {
            message: errors.join("; "),
            code: raw.status_code.unwrap_or_default(),
        });
    }

    let data = raw
        .data
        .ok_or_else(|| Error::Decode("missing field `data`".to_string()))?;
    let data = T::deserialize(data).map_err(|e| Error::Decode(e.to_string()))?;

    Ok(Envelope {
        data,
        metadata: raw.metadata,
        status_code: raw.status_code,
        errors: raw.errors,
    })
}

/// Decodes one SSE message.
///
/// Only `data:` lines carry payload; `event:` lines, comments and blank lines
/// are ignored. Returns `None` when the message has no `data:` line.
pub fn decode_sse_message<T: DeserializeOwned>(message: &str) -> Result<Option<Envelope<T>>, Error> {
    let mut data = None;

    for line in message.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        if field == "data" {
            data = Some(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    data.map(decode_frame::<T>).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AgentResponse, AgentResponseType, TtsResponse};

    #[test]
    fn audio_is_base64_decoded() {
        let envelope: Envelope<TtsResponse> =
            decode_frame(r#"{"data":{"audio":"aGVsbG8=","text":"hello"}}"#).unwrap();
        assert_eq!(envelope.data.audio.as_deref(), Some(&b"hello"[..]));
        assert_eq!(envelope.data.text.as_deref(), Some("hello"));
        assert!(envelope.status_code.is_none());
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let result = decode_frame::<TtsResponse>(r#"{"data":{"audio":"not base64!"}}"#);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn malformed_json_and_missing_data_are_decode_errors() {
        assert!(matches!(
            decode_frame::<TtsResponse>("{not json"),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            decode_frame::<TtsResponse>(r#"{"status_code":200}"#),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            decode_frame::<AgentResponse>(r#"{"data":{"text":"no type"}}"#),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn errors_become_server_errors() {
        let result = decode_frame::<TtsResponse>(
            r#"{"status_code":401,"errors":["bad key","expired"]}"#,
        );
        match result {
            Err(Error::ServerError { message, code }) => {
                assert_eq!(message, "bad key; expired");
                assert_eq!(code, 401);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_error_list_is_not_an_error() {
        let envelope: Envelope<AgentResponse> = decode_frame(
            r#"{"data":{"type":"llm_response","text":"hi"},"errors":[],"metadata":{"turn":1}}"#,
        )
        .unwrap();
        assert_eq!(envelope.data.kind, AgentResponseType::LlmResponse);
        assert_eq!(envelope.metadata.unwrap().get("turn"), Some(&Value::from(1)));
    }

    #[test]
    fn sse_event_lines_are_ignored() {
        let message = "event: message\ndata: {\"status_code\":200,\"data\":{\"audio\":\"aGk=\",\"text\":\"hi\",\"sampling_rate\":22050}}\n\n";
        let envelope = decode_sse_message::<TtsResponse>(message).unwrap().unwrap();
        assert_eq!(envelope.status_code, Some(200));
        assert_eq!(envelope.data.audio.as_deref(), Some(&b"hi"[..]));
        assert_eq!(envelope.data.sampling_rate, Some(22050));
    }

    #[test]
    fn sse_control_lines_yield_nothing() {
        assert!(decode_sse_message::<TtsResponse>("event: message").unwrap().is_none());
        assert!(decode_sse_message::<TtsResponse>("").unwrap().is_none());
        assert!(decode_sse_message::<TtsResponse>(": keep-alive\n").unwrap().is_none());
    }

    #[test]
    fn sse_malformed_data_fails() {
        assert!(decode_sse_message::<TtsResponse>("data: {oops").is_err());
    }
}
