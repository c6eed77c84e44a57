//! Rust client library for the Neuphonic text-to-speech and agent APIs.
//!
//! Sessions stream text to the server and receive synthesized audio over a
//! WebSocket; [`SseClient`] covers one-shot synthesis over server-sent events.
//!
//! # Example
//!
//! ```no_run
//! use rust_neuphonic::{Client, TtsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rust_neuphonic::Error> {
//!     let client = Client::from_env()?;
//!     let session = client.tts_websocket();
//!
//!     session.on_message(|message| async move {
//!         if let Some(audio) = message.data.audio {
//!             println!("Received audio chunk: {} bytes", audio.len());
//!         }
//!         Ok(())
//!     });
//!
//!     session.open(&TtsConfig::new().with_speed(1.0)).await?;
//!     session.send_and_complete("Hello, world!").await?;
//!
//!     // Waits until the server has caught up with the text before closing.
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod decode;
mod endpoint;
mod error;
mod events;
mod messages;
mod queue;
mod session;
mod sse;
mod ws;

pub use client::Client;
pub use config::{AgentConfig, SessionConfig, TtsConfig};
pub use decode::{decode_frame, decode_sse_message};
pub use endpoint::{Credentials, Endpoint, API_KEY_ENV, API_URL_ENV};
pub use error::Error;
pub use events::{Event, EventHandlers, Handler, HandlerResult, SessionHandler};
pub use messages::*;
pub use queue::MessageQueue;
pub use session::{
    AgentWebsocketClient, ClientOptions, ConnectionState, TtsWebsocketClient, WebsocketClient,
    DEFAULT_PING_INTERVAL, DEFAULT_SHUTDOWN_GRACE,
};
pub use sse::SseClient;

/// API host used when `NEUPHONIC_API_URL` is not set.
pub const DEFAULT_HOST: &str = "eu-west-1.api.neuphonic.com";
