//! SSE client tests against a wiremock server.

use futures_util::StreamExt;
use rust_neuphonic::{Credentials, Endpoint, Error, SseClient, TtsConfig};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(server: &MockServer) -> Endpoint {
    Endpoint::new("test-key", server.address().to_string())
}

fn sse_body(texts: &[&str]) -> String {
    texts
        .iter()
        .map(|text| {
            let data = json!({
                "status_code": 200,
                "data": { "audio": "aGk=", "text": text, "sampling_rate": 22050 }
            });
            format!("event: message\ndata: {data}\n\n")
        })
        .collect()
}

#[tokio::test]
async fn streams_decoded_envelopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sse/speak/en"))
        .and(header("x-api-key", "test-key"))
        .and(body_json(json!({ "text": "Hello", "model": { "speed": 1.0 } })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Hel", "lo"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = SseClient::new(endpoint(&server)).unwrap();
    let stream = client
        .send("Hello", &TtsConfig::new().with_speed(1.0))
        .await
        .unwrap();
    let envelopes: Vec<_> = stream.collect().await;

    assert_eq!(envelopes.len(), 2);
    let first = envelopes[0].as_ref().unwrap();
    assert_eq!(first.status_code, Some(200));
    assert_eq!(first.data.audio.as_deref(), Some(&b"hi"[..]));
    assert_eq!(first.data.text.as_deref(), Some("Hel"));
    assert_eq!(envelopes[1].as_ref().unwrap().data.text.as_deref(), Some("lo"));
}

#[tokio::test]
async fn synthesize_concatenates_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sse/speak/de"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["a", "b", "c"])))
        .mount(&server)
        .await;

    let client = SseClient::new(endpoint(&server)).unwrap();
    let audio = client
        .synthesize("abc", &TtsConfig::new().with_lang_code("de"))
        .await
        .unwrap();
    assert_eq!(audio, b"hihihi");
}

#[tokio::test]
async fn http_errors_fail_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let client = SseClient::new(endpoint(&server)).unwrap();
    match client.send("Hello", &TtsConfig::new()).await {
        Err(Error::ServerError { message, code }) => {
            assert_eq!(code, 401);
            assert_eq!(message, "invalid api key");
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn malformed_message_ends_stream_with_error() {
    let server = MockServer::start().await;
    let body = format!("{}data: {{broken\n\n", sse_body(&["ok"]));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = SseClient::new(endpoint(&server)).unwrap();
    let envelopes: Vec<_> = client
        .send("Hello", &TtsConfig::new())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(envelopes.len(), 2);
    assert!(envelopes[0].is_ok());
    assert!(matches!(envelopes[1], Err(Error::Decode(_))));
}

#[tokio::test]
async fn jwt_auth_switches_to_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sse/auth"))
        .and(header("x-api-key", "test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "data": { "jwt_token": "jwt-123" } })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sse/speak/en"))
        .and(header("authorization", "Bearer jwt-123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["hi"])))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = SseClient::new(endpoint(&server)).unwrap();
    client.jwt_auth().await.unwrap();
    assert_eq!(
        client.endpoint().credentials(),
        &Credentials::Bearer("jwt-123".to_string())
    );

    let audio = client.synthesize("hi", &TtsConfig::new()).await.unwrap();
    assert_eq!(audio, b"hi");
}

#[tokio::test]
async fn jwt_auth_without_token_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sse/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .mount(&server)
        .await;

    let mut client = SseClient::new(endpoint(&server)).unwrap();
    assert!(matches!(client.jwt_auth().await, Err(Error::Decode(_))));
    assert!(matches!(client.endpoint().credentials(), Credentials::ApiKey(_)));
}
