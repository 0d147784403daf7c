//! Connection lifecycle event handlers.
//!
//! Provides callback-based hooks for monitoring the realtime channel:
//!
//! - [`on_connect`](EventHandlers::on_connect): the channel is up (carries the
//!   server-issued client id when the transport provides one)
//! - [`on_disconnect`](EventHandlers::on_disconnect): the channel went down; the
//!   reason lists the topics still wanted (empty = intentional close)
//! - [`on_error`](EventHandlers::on_error): connection or protocol errors
//! - [`on_receive`](EventHandlers::on_receive) / [`on_send`](EventHandlers::on_send):
//!   debug hooks for raw traffic
//!
//! # Example
//!
//! ```rust
//! use realtime_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|info| println!("Connected (client id {:?})", info.client_id))
//!     .on_disconnect(|reason| {
//!         if reason.is_intentional() {
//!             println!("Closed");
//!         } else {
//!             println!("Reconnecting, still wanted: {:?}", reason.active_topics);
//!         }
//!     });
//! ```

use std::fmt;
use std::sync::Arc;

/// Details passed to the `on_connect` handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Identifier assigned by the server, if the transport protocol issues one.
    pub client_id: Option<String>,
    /// `true` when this connection replaced a previously established one.
    pub reconnected: bool,
}

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// Transport close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
    /// Topics still desired at the time of the disconnect.
    pub active_topics: Vec<String>,
}

impl DisconnectReason {
    /// Create a new disconnect reason with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            active_topics: Vec::new(),
        }
    }

    /// Create a new disconnect reason with a message and close code.
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            active_topics: Vec::new(),
        }
    }

    /// Attach the list of topics that are still desired.
    pub fn with_active_topics(mut self, topics: Vec<String>) -> Self {
        self.active_topics = topics;
        self
    }

    /// An empty topic list marks an intentional, final close (idle teardown
    /// or explicit disconnect) as opposed to a failure.
    pub fn is_intentional(&self) -> bool {
        self.active_topics.is_empty()
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether this error is recoverable (i.e. auto-reconnect may succeed).
    pub recoverable: bool,
}

impl ConnectionError {
    /// Create a new connection error.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn(ConnectInfo) + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Type alias for the on_receive callback (debug hook for inbound frames).
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Type alias for the on_send callback (debug hook for outbound frames).
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers run on the multiplexer task, so they
/// should return quickly and must not block.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the channel is established.
    pub fn on_connect(mut self, f: impl Fn(ConnectInfo) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the channel closes.
    ///
    /// A non-empty [`DisconnectReason::active_topics`] means reconnection is
    /// still being attempted (or retries just ran out); an empty list means
    /// the close was intentional.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection error occurs.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving every raw inbound frame.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving every raw outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_receive.is_some()
            || self.on_send.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self, info: ConnectInfo) {
        if let Some(cb) = &self.on_connect {
            cb(info);
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_empty_handlers() {
        let handlers = EventHandlers::new();
        assert!(!handlers.has_any());
        // emitting without handlers is a no-op
        handlers.emit_disconnect(DisconnectReason::new("gone"));
    }

    #[test]
    fn test_disconnect_reason_intentional() {
        let idle = DisconnectReason::new("idle");
        assert!(idle.is_intentional());

        let failed = DisconnectReason::with_code("abnormal", 1006)
            .with_active_topics(vec!["posts".to_string()]);
        assert!(!failed.is_intentional());
        assert_eq!(failed.to_string(), "abnormal (code: 1006)");
    }

    #[test]
    fn test_emit_disconnect_reaches_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handlers = EventHandlers::new().on_disconnect(move |reason| {
            sink.lock().unwrap().push(reason.active_topics);
        });

        handlers.emit_disconnect(DisconnectReason::new("x").with_active_topics(vec!["a".into()]));
        assert_eq!(*seen.lock().unwrap(), vec![vec!["a".to_string()]]);
    }
}
