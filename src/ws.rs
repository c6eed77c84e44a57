//! WebSocket connection wrapper.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Read half of a connection, owned by the receive loop.
pub type WsReceiver = SplitStream<WsStream>;

/// Write half of a connection, shared between `send()`, keep-alive pings and
/// `close()`.
pub struct WsSender {
    write: Mutex<SplitSink<WsStream, Message>>,
}

/// Opens a WebSocket connection to `url`, sending `header` with the upgrade
/// request. TLS is negotiated for `wss://` URLs.
pub async fn connect(
    url: &str,
    header: (&'static str, String),
    connect_timeout: Option<Duration>,
) -> Result<(WsSender, WsReceiver), Error> {
    let display_url = strip_query(url).to_string();
    info!(url = %display_url, "WebSocket connecting");

    let connection_error = |source| Error::Connection {
        url: display_url.clone(),
        source,
    };

    let mut request = url.into_client_request().map_err(connection_error)?;
    let name = HeaderName::from_bytes(header.0.as_bytes())
        .map_err(|e| Error::Config(format!("invalid header name {}: {e}", header.0)))?;
    let value = HeaderValue::from_str(&header.1)
        .map_err(|e| Error::Config(format!("invalid {} header value: {e}", header.0)))?;
    request.headers_mut().insert(name, value);

    let handshake = tokio_tungstenite::connect_async(request);
    let result = match connect_timeout {
        Some(limit) => timeout(limit, handshake)
            .await
            .map_err(|_| Error::ConnectionTimeout)?,
        None => handshake.await,
    };
    let (ws_stream, _) = result.map_err(connection_error)?;

    info!(url = %display_url, "WebSocket connected");

    let (write, read) = ws_stream.split();
    Ok((
        WsSender {
            write: Mutex::new(write),
        },
        read,
    ))
}

impl WsSender {
    /// Sends text frames back to back; no other frame from this client is
    /// written in between.
    pub async fn send_texts(&self, frames: &[String]) -> Result<(), Error> {
        let mut writer = self.write.lock().await;
        for frame in frames {
            writer.send(Message::Text(frame.clone())).await?;
        }
        Ok(())
    }

    /// Sends a ping message.
    pub async fn send_ping(&self) -> Result<(), Error> {
        debug!("Sending ping");
        let mut writer = self.write.lock().await;
        writer.send(Message::Ping(b"ping".to_vec())).await?;
        Ok(())
    }

    /// Sends a pong message.
    pub async fn send_pong(&self, data: Vec<u8>) -> Result<(), Error> {
        debug!("Sending pong");
        let mut writer = self.write.lock().await;
        writer.send(Message::Pong(data)).await?;
        Ok(())
    }

    /// Sends a close frame and shuts the write half down. Errors from an
    /// already-closed transport are ignored.
    pub async fn close(&self) {
        debug!("WebSocket closing");
        let mut writer = self.write.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.close().await;
        debug!("WebSocket closed");
    }
}

/// URL without its query string, for logging.
pub fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_stripped_for_logging() {
        assert_eq!(
            strip_query("wss://api.example.com/speak/en?voice_id=abc"),
            "wss://api.example.com/speak/en"
        );
        assert_eq!(strip_query("ws://localhost/agents"), "ws://localhost/agents");
    }

    #[tokio::test]
    async fn invalid_url_is_a_connection_error() {
        let result = connect("not a url", ("X-API-Key", "key".into()), None).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
