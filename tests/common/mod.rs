//! Local WebSocket server standing in for the speech API.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_neuphonic::{Endpoint, STOP_TOKEN};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const API_KEY: &str = "test-key";

/// How the server treats each connection.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answers every text fragment with an audio envelope echoing it, after
    /// `delay`. The completion marker gets no answer.
    Echo { delay: Duration },
    /// Sends `frames` after the handshake, then just records what arrives.
    Script(Vec<String>),
    /// Sends `frames`, then drops the socket without a closing handshake.
    ScriptThenDrop(Vec<String>),
    /// Sends `frames`, then a close frame.
    ScriptThenClose(Vec<String>),
    /// Never reads, so pings go unanswered.
    Silent,
}

#[derive(Default)]
struct MockState {
    connections: AtomicUsize,
    received: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
    api_keys: Mutex<Vec<String>>,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, state, behavior).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(API_KEY, self.host())
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().unwrap().clone()
    }

    /// Request URIs (path and query) of every handshake.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn api_keys(&self) -> Vec<String> {
        self.state.api_keys.lock().unwrap().clone()
    }

    /// Waits until at least `n` text frames arrived.
    pub async fn wait_for_frames(&self, n: usize) -> Vec<String> {
        assert!(
            eventually(|| self.state.received.lock().unwrap().len() >= n).await,
            "expected {n} frames, got {:?}",
            self.received()
        );
        self.received()
    }
}

/// A TTS envelope carrying two bytes of audio and `text`.
pub fn tts_frame(text: &str) -> String {
    json!({ "data": { "audio": "aGk=", "text": text } }).to_string()
}

/// Polls `check` every 10 ms for up to five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Address nothing listens on.
pub async fn unused_host() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

async fn serve(
    stream: TcpStream,
    state: Arc<MockState>,
    behavior: Behavior,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handshake_state = Arc::clone(&state);
    let ws = accept_hdr_async(stream, move |request: &Request, response: Response| {
        handshake_state
            .requests
            .lock()
            .unwrap()
            .push(request.uri().to_string());
        if let Some(key) = request
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
        {
            handshake_state.api_keys.lock().unwrap().push(key.to_string());
        }
        Ok::<Response, ErrorResponse>(response)
    })
    .await?;
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws.split();

    match behavior {
        Behavior::Echo { delay } => {
            while let Some(frame) = read.next().await {
                match frame? {
                    Message::Text(text) => {
                        state.received.lock().unwrap().push(text.clone());
                        let value: Value = serde_json::from_str(&text)?;
                        let Some(fragment) = value.get("text").and_then(Value::as_str) else {
                            continue;
                        };
                        if fragment == STOP_TOKEN {
                            continue;
                        }
                        tokio::time::sleep(delay).await;
                        write.send(Message::Text(tts_frame(fragment))).await?;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        Behavior::Script(frames) => {
            for frame in frames {
                write.send(Message::Text(frame)).await?;
            }
            while let Some(frame) = read.next().await {
                match frame? {
                    Message::Text(text) => state.received.lock().unwrap().push(text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        Behavior::ScriptThenDrop(frames) => {
            for frame in frames {
                write.send(Message::Text(frame)).await?;
            }
            write.flush().await?;
            // Dropping both halves closes the TCP stream with no close frame.
        }
        Behavior::ScriptThenClose(frames) => {
            for frame in frames {
                write.send(Message::Text(frame)).await?;
            }
            write.send(Message::Close(None)).await?;
            while let Some(frame) = read.next().await {
                if frame.is_err() {
                    break;
                }
            }
        }
        Behavior::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
    Ok(())
}
