//! Transport seam.
//!
//! A [`Connector`] opens one [`Channel`] per connect attempt. The channel is a
//! pair of queues plus the background I/O task that services them; dropping
//! the channel aborts that task and closes the underlying connection.
//!
//! Both shipped transports acknowledge topic submissions by emitting an
//! [`InboundMessage`] that carries the submission's `request_id`, so the
//! multiplexer handles them with a single code path.

pub mod event_stream;
pub mod sse;
pub mod websocket;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RealtimeLinkError, Result};
use crate::models::{ClientFrame, InboundMessage};
use crate::timeouts::RealtimeTimeouts;

pub use event_stream::EventStreamConnector;
pub use websocket::WebSocketConnector;

/// Queue depth between a transport's I/O task and the multiplexer.
pub const CHANNEL_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Server-sent event stream; topic submission over a side HTTP call.
    EventStream,
    /// Bidirectional socket with correlated acknowledgements.
    Socket,
}

impl TransportKind {
    /// Whether the transport can carry `publish` requests.
    pub fn supports_publish(&self) -> bool {
        matches!(self, TransportKind::Socket)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::EventStream => write!(f, "event-stream"),
            TransportKind::Socket => write!(f, "socket"),
        }
    }
}

/// Parameters for one connect attempt.
#[derive(Clone)]
pub struct ConnectRequest {
    /// Absolute channel URL from the URL builder.
    pub url: String,
    /// Token read from the auth provider right before connecting.
    pub token: Option<String>,
    pub timeouts: RealtimeTimeouts,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Frame queued by the multiplexer for the transport to send.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Replace the server-side registration set with `topics`.
    SubmitTopics { request_id: u64, topics: Vec<String> },
    Publish {
        request_id: u64,
        topic: String,
        data: JsonValue,
    },
}

impl OutboundFrame {
    pub fn request_id(&self) -> u64 {
        match self {
            OutboundFrame::SubmitTopics { request_id, .. } => *request_id,
            OutboundFrame::Publish { request_id, .. } => *request_id,
        }
    }

    /// Socket protocol representation.
    pub fn to_client_frame(&self) -> ClientFrame {
        match self {
            OutboundFrame::SubmitTopics { request_id, topics } => ClientFrame::Subscribe {
                request_id: request_id.to_string(),
                topics: topics.clone(),
            },
            OutboundFrame::Publish {
                request_id,
                topic,
                data,
            } => ClientFrame::Publish {
                request_id: request_id.to_string(),
                topic: topic.clone(),
                data: data.clone(),
            },
        }
    }
}

/// Event produced by a transport's I/O task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// A frame arrived that could not be parsed. The channel stays open.
    Malformed(String),
    /// The channel is gone. No further events follow.
    Closed { message: String, code: Option<u16> },
}

impl TransportEvent {
    pub fn closed(message: impl Into<String>) -> Self {
        TransportEvent::Closed {
            message: message.into(),
            code: None,
        }
    }
}

/// An open connection to the realtime endpoint.
pub struct Channel {
    kind: TransportKind,
    client_id: Option<String>,
    outbound: mpsc::Sender<OutboundFrame>,
    inbound: mpsc::Receiver<TransportEvent>,
    io_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl Channel {
    pub fn new(
        kind: TransportKind,
        client_id: Option<String>,
        outbound: mpsc::Sender<OutboundFrame>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            kind,
            client_id,
            outbound,
            inbound,
            io_task: None,
        }
    }

    /// Attach the I/O task that is aborted when the channel is dropped.
    pub fn with_io_task(mut self, task: JoinHandle<()>) -> Self {
        self.io_task = Some(task);
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Server-issued client identifier, if the protocol provides one.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Queue a frame, waiting at most `timeout` for queue space.
    pub async fn send(&self, frame: OutboundFrame, timeout: Duration) -> Result<()> {
        let closed = |_| RealtimeLinkError::TransportClosed("Outbound queue closed".to_string());
        if RealtimeTimeouts::is_no_timeout(timeout) {
            return self.outbound.send(frame).await.map_err(closed);
        }
        match tokio::time::timeout(timeout, self.outbound.send(frame)).await {
            Ok(sent) => sent.map_err(closed),
            Err(_) => Err(RealtimeLinkError::TransportClosed(format!(
                "Send timed out after {:?}",
                timeout
            ))),
        }
    }

    /// Next event; `None` once the I/O task has gone away.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

/// Opens channels of one transport kind.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Path handed to the URL builder to locate the endpoint.
    fn path(&self) -> &str;

    /// Open a channel. Resolves once the server has accepted the connection.
    async fn connect(&self, request: ConnectRequest) -> Result<Channel>;
}
