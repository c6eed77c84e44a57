//! Streaming session client for the TTS and agent WebSocket endpoints.
//!
//! A [`WebsocketClient`] owns at most one connection at a time. `open()`
//! connects and spawns a background receive loop that decodes every frame and
//! hands it to the `message` handler, or to the pull queue read by
//! `receive()` when no handler is registered. `send()` writes directly to the
//! socket from the caller's task.
//!
//! Shared per-connection state follows a single-writer rule: only `send()`
//! records the last sent text, only the receive loop records the last received
//! text, and `close()` only reads both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::decode::decode_frame;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::events::{Event, EventHandlers, Handler, HandlerResult, SessionHandler};
use crate::messages::{
    AgentResponse, Envelope, OutboundMessage, Payload, TextMessage, TtsResponse,
};
use crate::queue::MessageQueue;
use crate::ws::{self, WsReceiver, WsSender};

/// Default interval between keep-alive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Default time `close()` waits for the receive loop to stop before aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

tokio::task_local! {
    /// Set for the duration of every receive loop task.
    static RECEIVE_LOOP: ();
}

/// Client for the text-to-speech WebSocket endpoint.
pub type TtsWebsocketClient = WebsocketClient<TtsResponse>;

/// Client for the agent WebSocket endpoint.
pub type AgentWebsocketClient = WebsocketClient<AgentResponse>;

/// Lifecycle state of the client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Closed,
    /// Handshake in progress.
    Connecting,
    /// Connected; the receive loop is running.
    Open,
    /// `close()` is draining or tearing down.
    Closing,
}

/// Transport options for a [`WebsocketClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Limit on the WebSocket handshake. No limit by default.
    pub connect_timeout: Option<Duration>,
    /// Keep-alive ping interval; `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// Limit on the drain wait of a non-forced `close()`. No limit by default.
    pub drain_timeout: Option<Duration>,
    /// Time `close()` waits for the receive loop to stop before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            drain_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// One physical connection and the state shared with its receive loop.
struct Link {
    session_id: String,
    sender: WsSender,
    cancel: CancellationToken,
    finished: CancellationToken,
    close_notified: AtomicBool,
    last_sent: Mutex<Option<String>>,
    last_received: Mutex<Option<String>>,
    progress: Notify,
}

impl Link {
    fn new(sender: WsSender) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            sender,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            close_notified: AtomicBool::new(false),
            last_sent: Mutex::new(None),
            last_received: Mutex::new(None),
            progress: Notify::new(),
        }
    }

    /// True once the server has echoed the end of the last sent text.
    fn drained(&self) -> bool {
        let sent = self.last_sent.lock().clone();
        let received = self.last_received.lock().clone();
        match (sent, received) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(sent), Some(received)) => suffix_matches(&sent, &received),
        }
    }

    /// Runs the close handler the first time it is called for this connection.
    async fn notify_close<T: Send + 'static>(&self, handlers: &EventHandlers<T>) -> HandlerResult {
        if self.close_notified.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(session_id = %self.session_id, "Session closed");
        handlers.dispatch_close().await
    }
}

/// Compares the trailing `min(len(sent), len(received))` characters of both
/// texts, ignoring surrounding whitespace.
pub(crate) fn suffix_matches(sent: &str, received: &str) -> bool {
    let sent = sent.trim();
    let received = received.trim();
    let n = sent.chars().count().min(received.chars().count());
    sent.chars().rev().take(n).eq(received.chars().rev().take(n))
}

struct Shared<T> {
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Arc<Link>>>,
    task: Mutex<Option<JoinHandle<Result<(), Error>>>>,
    queue: MessageQueue<Envelope<T>>,
    handlers: EventHandlers<T>,
}

impl<T> Shared<T> {
    /// Clears the live connection if it is still `link`. With `only_if_open`
    /// the state is left alone while a `close()` is in progress.
    fn detach(&self, link: &Arc<Link>, only_if_open: bool) {
        let mut state = self.state.lock();
        let mut current = self.link.lock();
        if only_if_open && *state != ConnectionState::Open {
            return;
        }
        if current.as_ref().is_some_and(|live| Arc::ptr_eq(live, link)) {
            *current = None;
            *state = ConnectionState::Closed;
        }
    }
}

/// Streaming session client, generic over the response payload.
pub struct WebsocketClient<T: Payload> {
    endpoint: Endpoint,
    options: ClientOptions,
    shared: Arc<Shared<T>>,
}

impl<T: Payload> WebsocketClient<T> {
    /// Creates a client with default options.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_options(endpoint, ClientOptions::default())
    }

    /// Creates a client with the given transport options.
    pub fn with_options(endpoint: Endpoint, options: ClientOptions) -> Self {
        Self {
            endpoint,
            options,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Closed),
                link: Mutex::new(None),
                task: Mutex::new(None),
                queue: MessageQueue::new(),
                handlers: EventHandlers::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// Registers a handler by event name (`open`, `message`, `close`, `error`).
    pub fn on(&self, event: &str, handler: Handler<T>) -> Result<(), Error> {
        self.shared.handlers.on(event, handler)
    }

    /// Sets the `open` handler.
    pub fn on_open<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.handlers.set(Handler::open(f));
    }

    /// Sets the `message` handler. While one is registered, messages bypass
    /// the `receive()` queue.
    pub fn on_message<F, Fut>(&self, f: F)
    where
        F: Fn(Envelope<T>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.handlers.set(Handler::message(f));
    }

    /// Sets the `close` handler.
    pub fn on_close<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.handlers.set(Handler::close(f));
    }

    /// Sets the `error` handler. Returning the error (or any error) from it
    /// ends the session.
    pub fn on_error<F, Fut>(&self, f: F)
    where
        F: Fn(Error) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.handlers.set(Handler::error(f));
    }

    /// Routes all four events to `handler`.
    pub fn attach<H: SessionHandler<T>>(&self, handler: Arc<H>) {
        self.shared.handlers.attach(handler);
    }

    /// Removes the handler for `event`.
    pub fn clear(&self, event: Event) {
        self.shared.handlers.clear(event);
    }

    /// The handler table.
    pub fn handlers(&self) -> &EventHandlers<T> {
        &self.shared.handlers
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns true while a connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Short id of the live connection, used in logs.
    pub fn session_id(&self) -> Option<String> {
        self.shared
            .link
            .lock()
            .as_ref()
            .map(|link| link.session_id.clone())
    }

    /// Number of messages waiting for `receive()`.
    pub async fn queued(&self) -> usize {
        self.shared.queue.len().await
    }

    /// Full connection URL for `config`.
    pub fn url_for<C: SessionConfig>(&self, config: &C) -> String {
        let base = format!("{}/{}", self.endpoint.ws_url(), config.path());
        let query = config.to_query_params();
        if query.is_empty() {
            base
        } else {
            format!("{base}?{query}")
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connects, runs the `open` handler and starts the receive loop.
    ///
    /// Handshake failures are returned here and never reach the `error`
    /// handler. Fails with [`Error::AlreadyOpen`] unless the client is closed.
    /// If the `open` handler fails, the connection is dropped and its error is
    /// returned.
    pub async fn open<C: SessionConfig>(&self, config: &C) -> Result<(), Error> {
        {
            let mut state = self.shared.state.lock();
            if *state != ConnectionState::Closed {
                warn!(state = ?*state, "open() called on a session that is not closed");
                return Err(Error::AlreadyOpen);
            }
            *state = ConnectionState::Connecting;
        }
        let mut connecting = ConnectingGuard {
            state: &self.shared.state,
            armed: true,
        };

        let url = self.url_for(config);
        let (sender, receiver) = ws::connect(
            &url,
            self.endpoint.auth_header(),
            self.options.connect_timeout,
        )
        .await
        .inspect_err(|e| error!(error = %e, "Session connect failed"))?;

        let link = Arc::new(Link::new(sender));
        {
            let mut state = self.shared.state.lock();
            *self.shared.link.lock() = Some(Arc::clone(&link));
            *state = ConnectionState::Open;
        }
        connecting.armed = false;
        info!(session_id = %link.session_id, url = %ws::strip_query(&url), "Session open");

        if let Err(e) = self.shared.handlers.dispatch_open().await {
            error!(session_id = %link.session_id, error = %e, "Open handler failed, dropping connection");
            link.close_notified.store(true, Ordering::SeqCst);
            link.sender.close().await;
            self.shared.detach(&link, false);
            return Err(e);
        }

        let task = tokio::spawn(RECEIVE_LOOP.scope(
            (),
            receive_loop(
                Arc::clone(&self.shared),
                Arc::clone(&link),
                receiver,
                self.options.ping_interval,
            ),
        ));
        *self.shared.task.lock() = Some(task);
        Ok(())
    }

    /// Sends a message.
    ///
    /// Strings become `{"text": ...}` frames; structured messages are
    /// serialized as JSON. Fails with [`Error::NotConnected`] without a live
    /// connection.
    pub async fn send(&self, message: impl Into<OutboundMessage>) -> Result<(), Error> {
        self.send_frames(message.into(), false).await
    }

    /// Sends a message followed by the completion marker, as two separate
    /// frames.
    pub async fn send_and_complete(&self, message: impl Into<OutboundMessage>) -> Result<(), Error> {
        self.send_frames(message.into(), true).await
    }

    /// Sends only the completion marker.
    pub async fn complete(&self) -> Result<(), Error> {
        let link = self.live_link()?;
        let frame = OutboundMessage::from(TextMessage::stop()).to_frame()?;
        debug!(session_id = %link.session_id, "Sending completion marker");
        link.sender.send_texts(&[frame]).await
    }

    async fn send_frames(&self, message: OutboundMessage, autocomplete: bool) -> Result<(), Error> {
        let link = self.live_link()?;

        let mut frames = vec![message.to_frame()?];
        if autocomplete {
            frames.push(OutboundMessage::from(TextMessage::stop()).to_frame()?);
        }

        debug!(session_id = %link.session_id, frames = frames.len(), len = frames[0].len(), "Sending");
        link.sender.send_texts(&frames).await?;

        if let Some(text) = message.text() {
            *link.last_sent.lock() = Some(text.to_string());
        }
        Ok(())
    }

    fn live_link(&self) -> Result<Arc<Link>, Error> {
        let state = self.shared.state.lock();
        if *state != ConnectionState::Open {
            return Err(Error::NotConnected);
        }
        self.shared.link.lock().clone().ok_or(Error::NotConnected)
    }

    /// Waits for the next queued message.
    ///
    /// Only messages that arrived while no `message` handler was registered are
    /// queued. Fails with [`Error::NotConnected`] once the connection is gone
    /// and the queue is empty.
    pub async fn receive(&self) -> Result<Envelope<T>, Error> {
        if let Some(message) = self.shared.queue.try_pop().await {
            return Ok(message);
        }
        let link = self.shared.link.lock().clone();
        let Some(link) = link else {
            return Err(Error::NotConnected);
        };
        tokio::select! {
            message = self.shared.queue.pop() => Ok(message),
            _ = link.finished.cancelled() => {
                self.shared.queue.try_pop().await.ok_or(Error::NotConnected)
            }
        }
    }

    /// Closes the session once the server has caught up with the last sent
    /// text, then runs the `close` handler.
    ///
    /// Calling it again is a no-op. If the receive loop ended with an
    /// unhandled error, that error is returned.
    pub async fn close(&self) -> Result<(), Error> {
        self.shutdown(false).await
    }

    /// Closes the session without waiting for in-flight audio.
    pub async fn close_now(&self) -> Result<(), Error> {
        self.shutdown(true).await
    }

    async fn shutdown(&self, force: bool) -> Result<(), Error> {
        let link = {
            let mut state = self.shared.state.lock();
            match *state {
                ConnectionState::Open => {
                    *state = ConnectionState::Closing;
                    self.shared.link.lock().clone()
                }
                ConnectionState::Closed => None,
                ConnectionState::Connecting | ConnectionState::Closing => {
                    debug!(state = ?*state, "close() ignored");
                    return Ok(());
                }
            }
        };

        let Some(link) = link else {
            return self.take_finished_outcome().await;
        };
        info!(session_id = %link.session_id, force, "Session closing");

        let mut guard = CloseGuard {
            shared: Arc::clone(&self.shared),
            link: Arc::clone(&link),
            grace: self.options.shutdown_grace,
            armed: true,
        };
        if !force && T::tracks_completion() {
            self.drain(&link).await;
        }
        guard.armed = false;

        // Runs to completion even if this future is dropped.
        let closing = tokio::spawn(teardown(
            Arc::clone(&self.shared),
            link,
            self.options.shutdown_grace,
        ));
        closing.await?
    }

    async fn drain(&self, link: &Link) {
        let wait = async {
            loop {
                let progressed = link.progress.notified();
                if link.drained() || link.finished.is_cancelled() {
                    return;
                }
                tokio::select! {
                    _ = progressed => {}
                    _ = link.finished.cancelled() => return,
                }
            }
        };

        match self.options.drain_timeout {
            Some(limit) => {
                if timeout(limit, wait).await.is_err() {
                    warn!(session_id = %link.session_id, "Drain timeout elapsed, forcing close");
                }
            }
            None => wait.await,
        }
    }

    /// Outcome of a receive loop that ended on its own, waiting for it to
    /// finish running the close handler.
    async fn take_finished_outcome(&self) -> Result<(), Error> {
        // A close handler calling close() runs inside the loop task.
        if RECEIVE_LOOP.try_with(|_| ()).is_ok() {
            return Ok(());
        }
        let task = self.shared.task.lock().take();
        match task {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl<T: Payload> Drop for WebsocketClient<T> {
    fn drop(&mut self) {
        if let Some(link) = self.shared.link.lock().as_ref() {
            link.cancel.cancel();
        }
    }
}

/// Puts the state back to `Closed` if `open()` does not reach `Open`.
struct ConnectingGuard<'a> {
    state: &'a Mutex<ConnectionState>,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = ConnectionState::Closed;
        }
    }
}

/// Force-closes the connection if a `close()` future is dropped while it is
/// still draining. Once teardown starts it runs in its own task.
struct CloseGuard<T: Payload> {
    shared: Arc<Shared<T>>,
    link: Arc<Link>,
    grace: Duration,
    armed: bool,
}

impl<T: Payload> Drop for CloseGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(session_id = %self.link.session_id, "close() cancelled while draining, forcing close");
        self.link.cancel.cancel();

        let shared = Arc::clone(&self.shared);
        let link = Arc::clone(&self.link);
        let session_id = link.session_id.clone();
        let grace = self.grace;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = teardown(shared, link, grace).await {
                    error!(session_id = %session_id, error = %e, "Forced close failed");
                }
            });
        }
    }
}

/// Stops the receive loop, closes the transport and runs the close handler.
async fn teardown<T: Payload>(
    shared: Arc<Shared<T>>,
    link: Arc<Link>,
    grace: Duration,
) -> Result<(), Error> {
    link.cancel.cancel();

    let task = shared.task.lock().take();
    let outcome = match task {
        Some(mut task) => match timeout(grace, &mut task).await {
            Ok(joined) => joined.map_err(Error::from).and_then(|result| result),
            Err(_) => {
                warn!(session_id = %link.session_id, "Receive loop did not stop in time, aborting");
                task.abort();
                Ok(())
            }
        },
        None => Ok(()),
    };

    link.sender.close().await;
    shared.detach(&link, false);
    link.finished.cancel();

    let closed = link.notify_close(&shared.handlers).await;
    outcome.and(closed)
}

enum LoopExit {
    /// The server sent a close frame.
    ServerClosed,
    /// Transport failure that still has to go through the error handler.
    Transport(Error),
    /// Error the error handler declined to absorb.
    Unhandled(Error),
}

async fn receive_loop<T: Payload>(
    shared: Arc<Shared<T>>,
    link: Arc<Link>,
    mut receiver: WsReceiver,
    ping_interval: Option<Duration>,
) -> Result<(), Error> {
    let session_id = link.session_id.clone();
    debug!(session_id = %session_id, "Receive loop started");
    let mut keepalive = KeepAlive::new(ping_interval);

    let exit = loop {
        // Frames already received, pongs included, are read before the next
        // keep-alive tick is looked at.
        tokio::select! {
            biased;

            _ = link.cancel.cancelled() => {
                debug!(session_id = %session_id, "Receive loop cancelled");
                // Teardown owns the rest; this only covers a dropped client.
                shared.detach(&link, true);
                link.finished.cancel();
                return Ok(());
            }
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => {
                        debug!(session_id = %session_id, len = bytes.len(), "Received binary message");
                        match String::from_utf8(bytes) {
                            Ok(text) => text,
                            Err(e) => {
                                let error = Error::Decode(format!("invalid UTF-8 in binary message: {e}"));
                                if let Err(e) = route_error(&shared, &link, error).await {
                                    break LoopExit::Unhandled(e);
                                }
                                continue;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!(session_id = %session_id, "Received ping");
                        if let Err(e) = link.sender.send_pong(data).await {
                            break LoopExit::Transport(e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!(session_id = %session_id, "Received pong");
                        keepalive.pong();
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(session_id = %session_id, frame = ?frame, "Server closed the session");
                        break LoopExit::ServerClosed;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        debug!(session_id = %session_id, "Received raw frame");
                        continue;
                    }
                    Some(Err(e)) => break LoopExit::Transport(Error::WebSocket(e)),
                    None => break LoopExit::Transport(Error::ConnectionLost),
                };

                if let Err(e) = handle_frame(&shared, &link, &text).await {
                    break LoopExit::Unhandled(e);
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = keepalive.ping(&link.sender).await {
                    break LoopExit::Transport(e);
                }
            }
        }
    };

    let outcome = match exit {
        LoopExit::ServerClosed => Ok(()),
        LoopExit::Transport(e) => {
            error!(session_id = %session_id, error = %e, "Connection failed");
            shared.handlers.dispatch_error(e).await
        }
        LoopExit::Unhandled(e) => Err(e),
    };
    if let Err(e) = &outcome {
        error!(session_id = %session_id, error = %e, "Unhandled session error");
    }

    link.sender.close().await;
    shared.detach(&link, true);

    let closed = link.notify_close(&shared.handlers).await;
    if let Err(e) = &closed {
        warn!(session_id = %session_id, error = %e, "Close handler failed");
    }
    link.finished.cancel();
    outcome.and(closed)
}

/// Decodes one frame and delivers it to the handler or the queue. Errors that
/// the error handler absorbs are swallowed; anything returned ends the loop.
async fn handle_frame<T: Payload>(shared: &Shared<T>, link: &Link, text: &str) -> Result<(), Error> {
    let envelope = match decode_frame::<T>(text) {
        Ok(envelope) => envelope,
        Err(e) => return route_error(shared, link, e).await,
    };
    let received = progress_text(&envelope.data);

    match shared.handlers.dispatch_message(envelope).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => route_error(shared, link, e).await?,
        Err(envelope) => shared.queue.push(envelope).await,
    }

    if let Some(received) = received {
        *link.last_received.lock() = Some(received);
        link.progress.notify_waiters();
    }
    Ok(())
}

/// Text that counts toward the drain check; blank text never does.
fn progress_text<T: Payload>(payload: &T) -> Option<String> {
    payload
        .text()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_owned)
}

async fn route_error<T: Payload>(shared: &Shared<T>, link: &Link, error: Error) -> Result<(), Error> {
    warn!(session_id = %link.session_id, error = %error, "Receive loop error");
    shared.handlers.dispatch_error(error).await
}

/// Periodic pings; a ping still unanswered at the next tick is a failure.
struct KeepAlive {
    ticker: Option<Interval>,
    awaiting_pong: bool,
}

impl KeepAlive {
    fn new(period: Option<Duration>) -> Self {
        let ticker = period.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        Self {
            ticker,
            awaiting_pong: false,
        }
    }

    async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn ping(&mut self, sender: &WsSender) -> Result<(), Error> {
        if self.awaiting_pong {
            return Err(Error::KeepAliveTimeout);
        }
        sender.send_ping().await?;
        self.awaiting_pong = true;
        Ok(())
    }

    fn pong(&mut self) {
        self.awaiting_pong = false;
    }
}
