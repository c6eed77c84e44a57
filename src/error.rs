//! Error types for the Neuphonic client library.

use thiserror::Error;

/// Error type for Neuphonic client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The WebSocket handshake failed while opening a session.
    #[error("Connection to {url} failed: {source}")]
    Connection {
        /// URL that was being connected to, without query parameters.
        url: String,
        /// Underlying transport error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The caller-supplied connect timeout elapsed.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// Operation attempted without a live connection.
    #[error("Not connected")]
    NotConnected,

    /// `open()` called on a client that already owns a connection.
    #[error("Session is already open")]
    AlreadyOpen,

    /// Handler registered under an unknown event name, or for the wrong event.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Inbound payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Server returned an error.
    #[error("Server error: {message} (code: {code})")]
    ServerError {
        /// Error message from server.
        message: String,
        /// Status code from server, 0 when none was sent.
        code: i32,
    },

    /// WebSocket transport error after the session was opened.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error for outbound messages.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No pong arrived between two keep-alive pings.
    #[error("Keep-alive timeout")]
    KeepAliveTimeout,

    /// The server went away without a closing handshake.
    #[error("Connection lost")]
    ConnectionLost,

    /// The background receive task panicked or was aborted.
    #[error("Receive task failed: {0}")]
    ReceiveTask(#[from] tokio::task::JoinError),

    /// Invalid or missing client configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
