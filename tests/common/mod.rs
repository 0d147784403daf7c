#![allow(dead_code)]
//! In-memory realtime server for integration tests.
//!
//! [`MockServer::connector`] hands out a [`Connector`] whose channels are
//! served by a task that records every outbound frame and, unless told
//! otherwise, acknowledges it right away.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use realtime_link::transport::CHANNEL_QUEUE_CAPACITY;
use realtime_link::{
    Channel, ConnectInfo, ConnectRequest, Connector, DisconnectReason, ErrorDetail, EventHandlers,
    InboundMessage, OutboundFrame, RealtimeLinkError, RealtimeTimeouts, Result,
    SubscriptionMultiplexer, SubscriptionMultiplexerBuilder, TransportEvent, TransportKind,
};
use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, watch};

pub const BASE_URL: &str = "http://localhost:8090";
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ServerState {
    connects: u32,
    tokens: Vec<Option<String>>,
    urls: Vec<String>,
    refuse_next: u32,
    refuse_all: bool,
    manual_acks: bool,
    submissions: Vec<(u64, Vec<String>)>,
    publishes: Vec<(u64, String, JsonValue)>,
    active: Option<mpsc::Sender<TransportEvent>>,
}

#[derive(Clone)]
pub struct MockServer {
    kind: TransportKind,
    state: Arc<Mutex<ServerState>>,
    held: Arc<watch::Sender<bool>>,
}

impl MockServer {
    pub fn new(kind: TransportKind) -> Self {
        let (held, _) = watch::channel(false);
        Self {
            kind,
            state: Arc::new(Mutex::new(ServerState::default())),
            held: Arc::new(held),
        }
    }

    pub fn socket() -> Self {
        Self::new(TransportKind::Socket)
    }

    pub fn event_stream() -> Self {
        Self::new(TransportKind::EventStream)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            server: self.clone(),
        })
    }

    /// Fail the next `n` connect attempts.
    pub fn refuse_next(&self, n: u32) {
        self.state.lock().unwrap().refuse_next = n;
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_all = refuse;
    }

    /// Park connect attempts until [`release_connects`](Self::release_connects).
    pub fn hold_connects(&self) {
        self.held.send_replace(true);
    }

    pub fn release_connects(&self) {
        self.held.send_replace(false);
    }

    /// Stop acknowledging frames automatically.
    pub fn manual_acks(&self, manual: bool) {
        self.state.lock().unwrap().manual_acks = manual;
    }

    pub fn connect_count(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().tokens.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn submissions(&self) -> Vec<(u64, Vec<String>)> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submitted_topics(&self) -> Vec<Vec<String>> {
        self.submissions().into_iter().map(|(_, topics)| topics).collect()
    }

    pub fn last_submission(&self) -> Option<(u64, Vec<String>)> {
        self.submissions().last().cloned()
    }

    pub fn publishes(&self) -> Vec<(u64, String, JsonValue)> {
        self.state.lock().unwrap().publishes.clone()
    }

    /// Whether the client still holds the current channel open.
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .active
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn active(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.state.lock().unwrap().active.clone()
    }

    pub async fn send(&self, event: TransportEvent) {
        let tx = self.active().expect("no open channel");
        tx.send(event).await.expect("client dropped the channel");
    }

    pub async fn send_message(&self, msg: InboundMessage) {
        self.send(TransportEvent::Message(msg)).await;
    }

    pub async fn broadcast(&self, topic: &str, payload: JsonValue) {
        self.send_message(InboundMessage::broadcast(topic, payload)).await;
    }

    pub async fn ack(&self, request_id: u64, payload: JsonValue) {
        self.send_message(InboundMessage::ack(request_id, payload)).await;
    }

    pub async fn nack(&self, request_id: u64, code: &str, message: &str) {
        self.send_message(InboundMessage::nack(request_id, ErrorDetail::new(code, message)))
            .await;
    }

    /// Close the current channel from the server side.
    pub async fn drop_connection(&self, code: Option<u16>) {
        let tx = self.state.lock().unwrap().active.take();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Closed {
                    message: "Server went away".to_string(),
                    code,
                })
                .await;
        }
    }
}

struct MockConnector {
    server: MockServer,
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> TransportKind {
        self.server.kind
    }

    fn path(&self) -> &str {
        match self.server.kind {
            TransportKind::EventStream => "/api/realtime",
            TransportKind::Socket => "/api/realtime/ws",
        }
    }

    async fn connect(&self, request: ConnectRequest) -> Result<Channel> {
        let mut held = self.server.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);

        let conn_id = {
            let mut state = self.server.state.lock().unwrap();
            state.connects += 1;
            state.tokens.push(request.token.clone());
            state.urls.push(request.url.clone());
            if state.refuse_all {
                return Err(RealtimeLinkError::ConnectError("Connection refused".into()));
            }
            if state.refuse_next > 0 {
                state.refuse_next -= 1;
                return Err(RealtimeLinkError::ConnectError("Connection refused".into()));
            }
            state.active = Some(in_tx.clone());
            state.connects
        };

        let task = tokio::spawn(serve(self.server.state.clone(), out_rx, in_tx));
        Ok(Channel::new(self.server.kind, Some(format!("mock-{}", conn_id)), out_tx, in_rx)
            .with_io_task(task))
    }
}

async fn serve(
    state: Arc<Mutex<ServerState>>,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
    in_tx: mpsc::Sender<TransportEvent>,
) {
    while let Some(frame) = out_rx.recv().await {
        let reply = {
            let mut state = state.lock().unwrap();
            match frame {
                OutboundFrame::SubmitTopics { request_id, topics } => {
                    state.submissions.push((request_id, topics));
                    (!state.manual_acks).then(|| InboundMessage::ack(request_id, json!({})))
                },
                OutboundFrame::Publish {
                    request_id,
                    topic,
                    data,
                } => {
                    state.publishes.push((request_id, topic, data));
                    (!state.manual_acks)
                        .then(|| InboundMessage::ack(request_id, json!({"delivered": true})))
                },
            }
        };
        if let Some(msg) = reply {
            if in_tx.send(TransportEvent::Message(msg)).await.is_err() {
                return;
            }
        }
    }
}

/// Captures lifecycle hook invocations.
#[derive(Clone, Default)]
pub struct Recorder {
    pub connects: Arc<Mutex<Vec<ConnectInfo>>>,
    pub disconnects: Arc<Mutex<Vec<DisconnectReason>>>,
    pub errors: Arc<Mutex<Vec<(String, bool)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handlers(&self) -> EventHandlers {
        let connects = self.connects.clone();
        let disconnects = self.disconnects.clone();
        let errors = self.errors.clone();
        EventHandlers::new()
            .on_connect(move |info| connects.lock().unwrap().push(info))
            .on_disconnect(move |reason| disconnects.lock().unwrap().push(reason))
            .on_error(move |error| errors.lock().unwrap().push((error.message, error.recoverable)))
    }

    pub fn connects(&self) -> Vec<ConnectInfo> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, bool)> {
        self.errors.lock().unwrap().clone()
    }
}

/// Collects the payloads a listener receives.
#[derive(Clone, Default)]
pub struct Inbox(Arc<Mutex<Vec<JsonValue>>>);

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> impl Fn(&realtime_link::TopicEvent) + Send + Sync + 'static {
        let inbox = self.0.clone();
        move |event| inbox.lock().unwrap().push(event.payload.clone())
    }

    pub fn received(&self) -> Vec<JsonValue> {
        self.0.lock().unwrap().clone()
    }
}

/// Let every spawned task run until it blocks.
///
/// Under a paused clock the sleep only completes once the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Route the library's `log` output to the test harness.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

pub fn builder(server: &MockServer) -> SubscriptionMultiplexerBuilder {
    init_logging();
    SubscriptionMultiplexer::builder()
        .base_url(BASE_URL)
        .connector(server.connector())
        .timeouts(RealtimeTimeouts::for_testing(ACK_TIMEOUT))
}

pub fn build(server: &MockServer, recorder: &Recorder) -> SubscriptionMultiplexer {
    builder(server)
        .event_handlers(recorder.handlers())
        .build()
        .expect("multiplexer should build")
}
