//! Server-sent event stream transport.
//!
//! The stream is a long-lived GET; the server opens it with a connect event
//! carrying the client id. Topic submissions go out as a separate POST
//! keyed by that id, and the POST outcome is fed back into the inbound
//! queue as the submission's acknowledgement.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;

use super::sse::{EventStreamParser, SseEvent, MAX_EVENT_BYTES};
use super::{
    Channel, ConnectRequest, Connector, OutboundFrame, TransportEvent, TransportKind,
    CHANNEL_QUEUE_CAPACITY,
};
use crate::error::{RealtimeLinkError, Result};
use crate::models::{ErrorDetail, InboundMessage, TopicSubmissionBody};
use crate::timeouts::RealtimeTimeouts;

/// Relative path of the event-stream endpoint.
pub const EVENT_STREAM_PATH: &str = "/api/realtime";

/// Event name the server uses to announce the client id.
pub const CONNECT_EVENT: &str = "PB_CONNECT";

type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

#[derive(Debug, Clone)]
pub struct EventStreamConnector {
    http: reqwest::Client,
    path: String,
    max_event_bytes: usize,
}

impl Default for EventStreamConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamConnector {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Reuse an existing HTTP client (connection pool, proxy settings).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            path: EVENT_STREAM_PATH.to_string(),
            max_event_bytes: MAX_EVENT_BYTES,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Largest pending line or event payload before the stream is dropped.
    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Self {
        self.max_event_bytes = max_event_bytes;
        self
    }
}

fn stream_url(url: &str, token: Option<&str>) -> Result<Url> {
    let mut parsed = Url::parse(url).map_err(|e| {
        RealtimeLinkError::ConfigurationError(format!("Invalid event-stream URL '{}': {}", url, e))
    })?;
    if let Some(token) = token {
        parsed.query_pairs_mut().append_pair("token", token);
    }
    Ok(parsed)
}

fn status_message(status: StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 => "Unauthorized: event stream requires valid credentials".to_string(),
        403 => "Forbidden: access to event stream denied".to_string(),
        code if body.is_empty() => format!("Event stream HTTP error: {}", code),
        code => format!("Event stream HTTP error {}: {}", code, body),
    }
}

/// Client id announced by the connect event: its `id`, else `clientId` in
/// the JSON data.
fn client_id_from(event: &SseEvent) -> Option<String> {
    if let Some(id) = event.id.as_ref().filter(|id| !id.is_empty()) {
        return Some(id.clone());
    }
    serde_json::from_str::<JsonValue>(&event.data)
        .ok()?
        .get("clientId")?
        .as_str()
        .map(str::to_string)
}

fn to_inbound(event: SseEvent) -> InboundMessage {
    let payload = serde_json::from_str(&event.data).unwrap_or(JsonValue::String(event.data));
    let mut msg = InboundMessage::broadcast(event.event, payload);
    msg.id = event.id;
    msg
}

#[async_trait::async_trait]
impl Connector for EventStreamConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }

    fn path(&self) -> &str {
        &self.path
    }

    async fn connect(&self, request: ConnectRequest) -> Result<Channel> {
        let url = stream_url(&request.url, request.token.as_deref())?;
        log::debug!("[realtime-link] Opening event stream to {}", request.url);

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| RealtimeLinkError::ConnectError(format!("Connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeLinkError::ConnectError(status_message(status, &body)));
        }

        let mut stream: ByteStream = response.bytes_stream().boxed();
        let mut parser = EventStreamParser::with_max_event_bytes(self.max_event_bytes);
        let mut backlog = Vec::new();

        let client_id = 'handshake: loop {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Err(RealtimeLinkError::ConnectError(format!(
                        "Event stream failed before connect event: {}",
                        e
                    )));
                },
                None => {
                    return Err(RealtimeLinkError::ConnectError(
                        "Event stream ended before connect event".to_string(),
                    ));
                },
            };

            let mut events = parser
                .feed(&chunk)
                .map_err(|e| RealtimeLinkError::ConnectError(e.to_string()))?
                .into_iter();
            while let Some(event) = events.next() {
                if event.event != CONNECT_EVENT {
                    log::debug!(
                        "[realtime-link] Ignoring '{}' event received before connect",
                        event.event
                    );
                    continue;
                }
                let id = client_id_from(&event).ok_or_else(|| {
                    RealtimeLinkError::ConnectError("Connect event carried no client id".to_string())
                })?;
                backlog.extend(events);
                break 'handshake id;
            }
        };

        log::info!("[realtime-link] Event stream connected (client id {})", client_id);

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);

        let submitter = TopicSubmitter {
            http: self.http.clone(),
            url: request.url.clone(),
            client_id: client_id.clone(),
            token: request.token.clone(),
            timeout: request.timeouts.send_timeout,
        };
        let task = tokio::spawn(event_stream_task(
            stream,
            parser,
            backlog,
            outbound_rx,
            inbound_tx,
            submitter,
        ));

        Ok(Channel::new(TransportKind::EventStream, Some(client_id), outbound_tx, inbound_rx)
            .with_io_task(task))
    }
}

/// Sends topic submissions for one event-stream client.
#[derive(Clone)]
struct TopicSubmitter {
    http: reqwest::Client,
    url: String,
    client_id: String,
    token: Option<String>,
    timeout: Duration,
}

impl TopicSubmitter {
    /// POST the topic list. `Ok` carries the acknowledgement frame, `Err` a
    /// transport failure that should take the channel down.
    async fn submit(&self, request_id: u64, topics: Vec<String>) -> std::result::Result<InboundMessage, String> {
        let body = TopicSubmissionBody {
            client_id: self.client_id.clone(),
            subscriptions: topics,
        };
        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if !RealtimeTimeouts::is_no_timeout(self.timeout) {
            builder = builder.timeout(self.timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("Topic submission failed: {}", e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(InboundMessage::ack(request_id, JsonValue::Null));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<JsonValue>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);
        Ok(InboundMessage::nack(
            request_id,
            ErrorDetail::new(status.as_u16().to_string(), message),
        ))
    }
}

async fn event_stream_task(
    mut stream: ByteStream,
    mut parser: EventStreamParser,
    backlog: Vec<SseEvent>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    inbound_tx: mpsc::Sender<TransportEvent>,
    submitter: TopicSubmitter,
) {
    for event in backlog {
        if inbound_tx.send(TransportEvent::Message(to_inbound(event))).await.is_err() {
            return;
        }
    }

    // dropped with the task, which cancels any POST still running
    let mut submissions = JoinSet::new();

    loop {
        tokio::select! {
            Some(_) = submissions.join_next(), if !submissions.is_empty() => {}

            frame = outbound_rx.recv() => match frame {
                Some(OutboundFrame::SubmitTopics { request_id, topics }) => {
                    let submitter = submitter.clone();
                    let inbound_tx = inbound_tx.clone();
                    submissions.spawn(async move {
                        let event = match submitter.submit(request_id, topics).await {
                            Ok(ack) => TransportEvent::Message(ack),
                            Err(message) => {
                                log::warn!("[realtime-link] {}", message);
                                TransportEvent::closed(message)
                            },
                        };
                        let _ = inbound_tx.send(event).await;
                    });
                },
                Some(OutboundFrame::Publish { request_id, .. }) => {
                    let nack = InboundMessage::nack(
                        request_id,
                        ErrorDetail::new("not_supported", "Publish is not supported on the event stream"),
                    );
                    if inbound_tx.send(TransportEvent::Message(nack)).await.is_err() {
                        return;
                    }
                },
                // channel dropped by its owner
                None => return,
            },

            chunk = stream.next() => {
                let event = match chunk {
                    Some(Ok(chunk)) => match parser.feed(&chunk) {
                        Ok(events) => {
                            for event in events {
                                if inbound_tx.send(TransportEvent::Message(to_inbound(event))).await.is_err() {
                                    return;
                                }
                            }
                            continue;
                        },
                        Err(e) => {
                            log::warn!("[realtime-link] Dropping event stream: {}", e);
                            TransportEvent::closed(e.to_string())
                        },
                    },
                    Some(Err(e)) => TransportEvent::closed(format!("Event stream error: {}", e)),
                    None => TransportEvent::closed("Event stream ended"),
                };
                let _ = inbound_tx.send(event).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_appends_token() {
        let url = stream_url("http://localhost:8090/api/realtime", Some("a b")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8090/api/realtime?token=a+b");

        let bare = stream_url("http://localhost:8090/api/realtime", None).unwrap();
        assert_eq!(bare.query(), None);
    }

    #[test]
    fn test_client_id_from_id_or_data() {
        let with_id = SseEvent {
            event: CONNECT_EVENT.into(),
            data: "{}".into(),
            id: Some("c1".into()),
        };
        assert_eq!(client_id_from(&with_id).as_deref(), Some("c1"));

        let with_data = SseEvent {
            event: CONNECT_EVENT.into(),
            data: r#"{"clientId":"c2"}"#.into(),
            id: None,
        };
        assert_eq!(client_id_from(&with_data).as_deref(), Some("c2"));

        let neither = SseEvent {
            event: CONNECT_EVENT.into(),
            data: "hello".into(),
            id: None,
        };
        assert_eq!(client_id_from(&neither), None);
    }

    #[test]
    fn test_to_inbound_parses_json_or_keeps_text() {
        let json_event = SseEvent {
            event: "posts/123".into(),
            data: r#"{"id":"123"}"#.into(),
            id: Some("e1".into()),
        };
        let msg = to_inbound(json_event);
        assert_eq!(msg.topic, "posts/123");
        assert_eq!(msg.payload, serde_json::json!({"id": "123"}));
        assert_eq!(msg.id.as_deref(), Some("e1"));
        assert_eq!(msg.request_id, None);

        let text_event = SseEvent {
            event: "notes".into(),
            data: "plain".into(),
            id: None,
        };
        assert_eq!(to_inbound(text_event).payload, JsonValue::String("plain".into()));
    }

    #[test]
    fn test_status_message_maps_auth_failures() {
        assert!(status_message(StatusCode::UNAUTHORIZED, "").starts_with("Unauthorized"));
        assert!(status_message(StatusCode::FORBIDDEN, "").starts_with("Forbidden"));
        assert_eq!(
            status_message(StatusCode::BAD_GATEWAY, "upstream"),
            "Event stream HTTP error 502: upstream"
        );
    }
}
