//! Lifecycle events and the single-slot handler table.
//!
//! Each of the four events holds at most one handler; registering a handler
//! replaces the previous one. Handlers are async and return a
//! `Result<(), Error>`; how a failure is treated depends on where the event
//! fired (see `WebsocketClient`).

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;
use crate::messages::Envelope;

/// Result returned by every event handler.
pub type HandlerResult = Result<(), Error>;

type LifecycleFn = Arc<dyn Fn() -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type MessageFn<T> = Arc<dyn Fn(Envelope<T>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type ErrorFn = Arc<dyn Fn(Error) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The connection was established.
    Open,
    /// A server message arrived.
    Message,
    /// The connection was closed.
    Close,
    /// The receive loop hit an error.
    Error,
}

impl Event {
    /// All recognized events.
    pub const ALL: [Event; 4] = [Event::Open, Event::Message, Event::Close, Event::Error];

    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Open => "open",
            Event::Message => "message",
            Event::Close => "close",
            Event::Error => "error",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| Error::InvalidEvent(format!("\"{s}\" is not a valid event")))
    }
}

/// A handler bound to one event.
pub enum Handler<T> {
    /// Called after the connection opens.
    Open(LifecycleFn),
    /// Called for every decoded server message.
    Message(MessageFn<T>),
    /// Called once when the connection closes.
    Close(LifecycleFn),
    /// Called for errors raised inside the receive loop.
    Error(ErrorFn),
}

impl<T> Handler<T> {
    /// Wraps an async closure as an `open` handler.
    pub fn open<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Open(Arc::new(move || f().boxed()))
    }

    /// Wraps an async closure as a `message` handler.
    pub fn message<F, Fut>(f: F) -> Self
    where
        F: Fn(Envelope<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Message(Arc::new(move |message| f(message).boxed()))
    }

    /// Wraps an async closure as a `close` handler.
    pub fn close<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Close(Arc::new(move || f().boxed()))
    }

    /// Wraps an async closure as an `error` handler.
    pub fn error<F, Fut>(f: F) -> Self
    where
        F: Fn(Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Error(Arc::new(move |error| f(error).boxed()))
    }

    /// The event this handler is bound to.
    pub fn event(&self) -> Event {
        match self {
            Handler::Open(_) => Event::Open,
            Handler::Message(_) => Event::Message,
            Handler::Close(_) => Event::Close,
            Handler::Error(_) => Event::Error,
        }
    }
}

/// Object-style handler with no-op defaults.
///
/// The default `on_error` returns the error, so an unhandled error still ends
/// the session and is reported instead of vanishing.
#[async_trait]
pub trait SessionHandler<T: Send + 'static>: Send + Sync + 'static {
    /// Called after the connection opens.
    async fn on_open(&self) -> HandlerResult {
        Ok(())
    }

    /// Called for every decoded server message.
    async fn on_message(&self, message: Envelope<T>) -> HandlerResult {
        let _ = message;
        Ok(())
    }

    /// Called once when the connection closes.
    async fn on_close(&self) -> HandlerResult {
        Ok(())
    }

    /// Called for errors raised inside the receive loop.
    async fn on_error(&self, error: Error) -> HandlerResult {
        Err(error)
    }
}

struct Slots<T> {
    open: Option<LifecycleFn>,
    message: Option<MessageFn<T>>,
    close: Option<LifecycleFn>,
    error: Option<ErrorFn>,
}

/// Single-slot handler table keyed by [`Event`].
pub struct EventHandlers<T> {
    slots: RwLock<Slots<T>>,
}

impl<T: Send + 'static> EventHandlers<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                open: None,
                message: None,
                close: None,
                error: None,
            }),
        }
    }

    /// Registers `handler` under the event named `event`.
    ///
    /// Fails with [`Error::InvalidEvent`] if the name is unknown or the
    /// handler belongs to a different event.
    pub fn on(&self, event: &str, handler: Handler<T>) -> Result<(), Error> {
        let event: Event = event.parse()?;
        if handler.event() != event {
            return Err(Error::InvalidEvent(format!(
                "a {} handler cannot be registered for \"{event}\"",
                handler.event()
            )));
        }
        self.set(handler);
        Ok(())
    }

    /// Registers a handler, replacing any previous one for the same event.
    pub fn set(&self, handler: Handler<T>) {
        let mut slots = self.slots.write();
        match handler {
            Handler::Open(f) => slots.open = Some(f),
            Handler::Message(f) => slots.message = Some(f),
            Handler::Close(f) => slots.close = Some(f),
            Handler::Error(f) => slots.error = Some(f),
        }
    }

    /// Fills every slot from a [`SessionHandler`].
    pub fn attach<H: SessionHandler<T>>(&self, handler: Arc<H>) {
        let h = Arc::clone(&handler);
        self.set(Handler::Open(Arc::new(move || {
            let h = Arc::clone(&h);
            async move { h.on_open().await }.boxed()
        })));
        let h = Arc::clone(&handler);
        self.set(Handler::Message(Arc::new(move |message| {
            let h = Arc::clone(&h);
            async move { h.on_message(message).await }.boxed()
        })));
        let h = Arc::clone(&handler);
        self.set(Handler::Close(Arc::new(move || {
            let h = Arc::clone(&h);
            async move { h.on_close().await }.boxed()
        })));
        let h = handler;
        self.set(Handler::Error(Arc::new(move |error| {
            let h = Arc::clone(&h);
            async move { h.on_error(error).await }.boxed()
        })));
    }

    /// Removes the handler for `event`.
    pub fn clear(&self, event: Event) {
        let mut slots = self.slots.write();
        match event {
            Event::Open => slots.open = None,
            Event::Message => slots.message = None,
            Event::Close => slots.close = None,
            Event::Error => slots.error = None,
        }
    }

    /// Returns true if a handler is registered for `event`.
    pub fn has(&self, event: Event) -> bool {
        let slots = self.slots.read();
        match event {
            Event::Open => slots.open.is_some(),
            Event::Message => slots.message.is_some(),
            Event::Close => slots.close.is_some(),
            Event::Error => slots.error.is_some(),
        }
    }

    pub(crate) async fn dispatch_open(&self) -> HandlerResult {
        let handler = self.slots.read().open.clone();
        match handler {
            Some(f) => f().await,
            None => Ok(()),
        }
    }

    /// Hands `message` to the message handler, or gives it back when none is
    /// registered.
    pub(crate) async fn dispatch_message(
        &self,
        message: Envelope<T>,
    ) -> Result<HandlerResult, Envelope<T>> {
        let handler = self.slots.read().message.clone();
        match handler {
            Some(f) => Ok(f(message).await),
            None => Err(message),
        }
    }

    pub(crate) async fn dispatch_close(&self) -> HandlerResult {
        let handler = self.slots.read().close.clone();
        match handler {
            Some(f) => f().await,
            None => Ok(()),
        }
    }

    /// Passes `error` to the error handler; without one the error is
    /// returned unchanged.
    pub(crate) async fn dispatch_error(&self, error: Error) -> HandlerResult {
        let handler = self.slots.read().error.clone();
        match handler {
            Some(f) => f(error).await,
            None => Err(error),
        }
    }
}

impl<T: Send + 'static> Default for EventHandlers<T> {
    fn default() -> Self {
        Self::new()
    }
}
