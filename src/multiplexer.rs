//! Subscription multiplexer.
//!
//! Many topic subscriptions share one realtime channel. All state lives in a
//! single background task:
//!
//! - registrations and the desired key set ([`TopicRegistry`])
//! - correlated requests awaiting acknowledgement ([`RequestCorrelator`])
//! - the channel itself ([`ChannelDriver`])
//!
//! Public handles talk to the task through a command queue, so no locking is
//! needed and listener callbacks may freely call back into the handle.
//!
//! The desired key set is submitted as one full list whenever it differs
//! from what the server last acknowledged. At most one submission is in
//! flight; changes made meanwhile are coalesced into a single follow-up. The
//! acknowledged set is reset on every reconnect, so a fresh channel always
//! receives the full list.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;

use crate::auth::{ArcAuthTokenProvider, StaticToken};
use crate::connection::{
    ChannelDriver, ConnectionState, DriverEvent, ReconnectOutcome,
    DEFAULT_COMMAND_CHANNEL_CAPACITY,
};
use crate::correlator::{RequestCorrelator, RequestPurpose};
use crate::error::{RealtimeLinkError, Result};
use crate::event_handlers::{ConnectInfo, ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{ConnectionOptions, InboundMessage, TopicEvent, TopicOptions};
use crate::reconnect::ReconnectPolicy;
use crate::registry::{Listener, ListenerId, TopicRegistry};
use crate::timeouts::RealtimeTimeouts;
use crate::transport::{Connector, EventStreamConnector, OutboundFrame};
use crate::url_builder::{BaseUrl, UrlBuilder};

// ── Commands ────────────────────────────────────────────────────────────────

/// Which registrations an unsubscribe removes.
enum RemoveTarget {
    Id(ListenerId),
    Topic(String),
    Prefix(String),
    TopicAndListener(String, Listener),
    All,
}

/// Commands sent from the public API to the background task.
enum Command {
    Subscribe {
        topic: String,
        options: Option<TopicOptions>,
        listener: Listener,
        result_tx: oneshot::Sender<Result<ListenerId>>,
    },
    Unsubscribe {
        target: RemoveTarget,
        result_tx: Option<oneshot::Sender<usize>>,
    },
    Publish {
        topic: String,
        data: JsonValue,
        result_tx: oneshot::Sender<Result<JsonValue>>,
    },
    ActiveTopics {
        result_tx: oneshot::Sender<Vec<String>>,
    },
    Disconnect {
        result_tx: oneshot::Sender<()>,
    },
    Shutdown,
}

// ── Public handle ───────────────────────────────────────────────────────────

struct Shared {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    _task: JoinHandle<()>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(Command::Shutdown);
    }
}

/// Handle to a subscription multiplexer.
///
/// Cheap to clone. The background task stops once the last clone is dropped;
/// outstanding [`Subscription`] handles do not keep it alive.
///
/// ```rust,no_run
/// use realtime_link::{SubscriptionMultiplexer, TopicEvent};
///
/// # async fn example() -> realtime_link::Result<()> {
/// let realtime = SubscriptionMultiplexer::builder()
///     .base_url("http://127.0.0.1:8090")
///     .build()?;
///
/// let subscription = realtime
///     .subscribe("posts/123", |event: &TopicEvent| {
///         println!("{:?}", event.payload);
///     })
///     .await?;
///
/// subscription.unsubscribe().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    shared: Arc<Shared>,
}

impl fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("state", &self.state())
            .finish()
    }
}

impl SubscriptionMultiplexer {
    pub fn builder() -> SubscriptionMultiplexerBuilder {
        SubscriptionMultiplexerBuilder::new()
    }

    async fn send_command(&self, cmd: Command) -> Result<()> {
        self.shared
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RealtimeLinkError::Closed)
    }

    /// Subscribe `listener` to `topic`.
    ///
    /// Resolves once the server has acknowledged a topic submission that
    /// covers the new registration. Transient disconnects do not fail the
    /// call; it keeps waiting across reconnects and only fails when retries
    /// are exhausted or the server rejects the submission. The registration
    /// itself stays in place even then.
    pub async fn subscribe<F>(&self, topic: impl Into<String>, listener: F) -> Result<Subscription>
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        self.subscribe_listener(topic, None, Arc::new(listener)).await
    }

    /// Like [`subscribe`](Self::subscribe), with server-side options such as
    /// a filter or expand clause. Different options on the same topic are
    /// registered separately on the server.
    pub async fn subscribe_with_options<F>(
        &self,
        topic: impl Into<String>,
        options: TopicOptions,
        listener: F,
    ) -> Result<Subscription>
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        self.subscribe_listener(topic, Some(options), Arc::new(listener)).await
    }

    /// Subscribe a shared listener. Keep a clone of the `Arc` to remove it
    /// later with [`unsubscribe_by_topic_and_listener`](Self::unsubscribe_by_topic_and_listener).
    pub async fn subscribe_listener(
        &self,
        topic: impl Into<String>,
        options: Option<TopicOptions>,
        listener: Listener,
    ) -> Result<Subscription> {
        let topic = topic.into();
        let (result_tx, result_rx) = oneshot::channel();
        self.send_command(Command::Subscribe {
            topic: topic.clone(),
            options,
            listener,
            result_tx,
        })
        .await?;

        let id = result_rx.await.map_err(|_| RealtimeLinkError::Closed)??;
        Ok(Subscription {
            id,
            topic,
            cmd_tx: self.shared.cmd_tx.downgrade(),
        })
    }

    async fn remove(&self, target: RemoveTarget) -> Result<usize> {
        let (result_tx, result_rx) = oneshot::channel();
        self.send_command(Command::Unsubscribe {
            target,
            result_tx: Some(result_tx),
        })
        .await?;
        result_rx.await.map_err(|_| RealtimeLinkError::Closed)
    }

    /// Remove every registration for `topic`, or every registration at all
    /// when `topic` is `None`. Returns how many were removed.
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<usize> {
        let target = match topic {
            Some(topic) => RemoveTarget::Topic(topic.to_string()),
            None => RemoveTarget::All,
        };
        self.remove(target).await
    }

    /// Remove every registration whose topic starts with `prefix`.
    pub async fn unsubscribe_by_prefix(&self, prefix: &str) -> Result<usize> {
        self.remove(RemoveTarget::Prefix(prefix.to_string())).await
    }

    /// Remove the registrations of `listener` on `topic`, compared by `Arc`
    /// identity.
    pub async fn unsubscribe_by_topic_and_listener(
        &self,
        topic: &str,
        listener: &Listener,
    ) -> Result<usize> {
        self.remove(RemoveTarget::TopicAndListener(topic.to_string(), listener.clone()))
            .await
    }

    /// Publish `data` on `topic` and wait for the server's acknowledgement.
    ///
    /// Fails with [`RealtimeLinkError::NotSupported`] on the event-stream
    /// transport, [`RealtimeLinkError::NotConnected`] when there is no open
    /// channel, and [`RealtimeLinkError::AckTimeout`] when the server does
    /// not answer within the acknowledgement deadline.
    pub async fn publish(&self, topic: impl Into<String>, data: JsonValue) -> Result<JsonValue> {
        let (result_tx, result_rx) = oneshot::channel();
        self.send_command(Command::Publish {
            topic: topic.into(),
            data,
            result_tx,
        })
        .await?;
        result_rx.await.map_err(|_| RealtimeLinkError::Closed)?
    }

    /// Close the channel, cancel any pending reconnect and reject pending
    /// requests. Registrations are kept; the next subscribe reconnects with
    /// all of them.
    pub async fn disconnect(&self) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.send_command(Command::Disconnect { result_tx }).await?;
        result_rx.await.map_err(|_| RealtimeLinkError::Closed)
    }

    /// Distinct topics with at least one registration.
    pub async fn active_topics(&self) -> Result<Vec<String>> {
        let (result_tx, result_rx) = oneshot::channel();
        self.send_command(Command::ActiveTopics { result_tx }).await?;
        result_rx.await.map_err(|_| RealtimeLinkError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver notified on every connection state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }
}

/// One listener registration.
///
/// Dropping the handle leaves the registration in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    id: ListenerId,
    topic: String,
    cmd_tx: mpsc::WeakSender<Command>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove exactly this registration. Other listeners on the same topic
    /// are unaffected.
    pub async fn unsubscribe(self) -> Result<()> {
        let cmd_tx = self.cmd_tx.upgrade().ok_or(RealtimeLinkError::Closed)?;
        cmd_tx
            .send(Command::Unsubscribe {
                target: RemoveTarget::Id(self.id),
                result_tx: None,
            })
            .await
            .map_err(|_| RealtimeLinkError::Closed)
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Builder for [`SubscriptionMultiplexer`].
pub struct SubscriptionMultiplexerBuilder {
    base_url: Option<String>,
    url_builder: Option<Arc<dyn UrlBuilder>>,
    connector: Option<Arc<dyn Connector>>,
    auth: ArcAuthTokenProvider,
    timeouts: RealtimeTimeouts,
    connection_options: ConnectionOptions,
    reconnect_policy: Option<ReconnectPolicy>,
    event_handlers: EventHandlers,
}

impl Default for SubscriptionMultiplexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionMultiplexerBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            url_builder: None,
            connector: None,
            auth: Arc::new(StaticToken::none()),
            timeouts: RealtimeTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            reconnect_policy: None,
            event_handlers: EventHandlers::default(),
        }
    }

    /// Server base URL, e.g. `http://127.0.0.1:8090`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Custom URL builder; takes precedence over [`base_url`](Self::base_url).
    pub fn url_builder(mut self, builder: Arc<dyn UrlBuilder>) -> Self {
        self.url_builder = Some(builder);
        self
    }

    /// Transport to use. Defaults to the event-stream transport.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn auth(mut self, auth: ArcAuthTokenProvider) -> Self {
        self.auth = auth;
        self
    }

    pub fn timeouts(mut self, timeouts: RealtimeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Reconnect behaviour. Ignored when an explicit
    /// [`reconnect_policy`](Self::reconnect_policy) is set.
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = Some(policy);
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build the multiplexer and spawn its background task.
    ///
    /// Must be called within a tokio runtime. No connection is opened until
    /// the first subscribe.
    pub fn build(self) -> Result<SubscriptionMultiplexer> {
        let url_builder: Arc<dyn UrlBuilder> = match (self.url_builder, self.base_url) {
            (Some(builder), _) => builder,
            (None, Some(base_url)) => Arc::new(BaseUrl::parse(&base_url)?),
            (None, None) => {
                return Err(RealtimeLinkError::ConfigurationError(
                    "base_url or url_builder is required".into(),
                ));
            },
        };

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => {
                // no overall request timeout: it would cut the stream
                let mut http = reqwest::Client::builder()
                    .pool_idle_timeout(Duration::from_secs(90));
                if !RealtimeTimeouts::is_no_timeout(self.timeouts.connect_timeout) {
                    http = http.connect_timeout(self.timeouts.connect_timeout);
                }
                let http = http
                    .build()
                    .map_err(|e| RealtimeLinkError::ConfigurationError(e.to_string()))?;
                Arc::new(EventStreamConnector::with_client(http))
            },
        };

        let policy = self
            .reconnect_policy
            .unwrap_or_else(|| ReconnectPolicy::from_options(&self.connection_options));

        let (cmd_tx, cmd_rx) = mpsc::channel(DEFAULT_COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let token_changes = self.auth.changes();
        let driver = ChannelDriver::new(
            connector,
            url_builder,
            self.auth,
            self.timeouts.clone(),
            policy,
            state_tx,
        );
        let task = MultiplexerTask {
            driver,
            registry: TopicRegistry::new(),
            correlator: RequestCorrelator::new(),
            acknowledged: BTreeSet::new(),
            in_flight: None,
            waiters: Vec::new(),
            handlers: self.event_handlers,
            timeouts: self.timeouts,
            token_changes,
        };
        let handle = tokio::spawn(task.run(cmd_rx));

        Ok(SubscriptionMultiplexer {
            shared: Arc::new(Shared {
                cmd_tx,
                state_rx,
                _task: handle,
            }),
        })
    }
}

// ── Background task ─────────────────────────────────────────────────────────

/// A topic submission awaiting acknowledgement.
struct InFlightSubmission {
    request_id: u64,
    keys: BTreeSet<String>,
}

/// A `subscribe` call waiting for its key to be acknowledged.
struct AckWaiter {
    id: ListenerId,
    result_tx: oneshot::Sender<Result<ListenerId>>,
}

struct MultiplexerTask {
    driver: ChannelDriver,
    registry: TopicRegistry,
    correlator: RequestCorrelator,
    /// Keys the server acknowledged on the current channel.
    acknowledged: BTreeSet<String>,
    in_flight: Option<InFlightSubmission>,
    waiters: Vec<AckWaiter>,
    handlers: EventHandlers,
    timeouts: RealtimeTimeouts,
    token_changes: Option<watch::Receiver<Option<String>>>,
}

async fn request_deadline(at: Option<TokioInstant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// `true` on a token change, `false` once the provider is gone.
async fn token_changed(rx: &mut Option<watch::Receiver<Option<String>>>) -> bool {
    match rx.as_mut() {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

impl MultiplexerTask {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                // commands first: a burst of subscribes lands before the
                // connect outcome is observed
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        self.shutdown();
                        return;
                    },
                    Some(cmd) => self.handle_command(cmd).await,
                },

                event = self.driver.next_event() => self.handle_driver_event(event).await,

                _ = request_deadline(self.correlator.next_deadline()) => {
                    self.expire_requests();
                }

                changed = token_changed(&mut self.token_changes) => {
                    if changed {
                        self.on_token_changed();
                    } else {
                        self.token_changes = None;
                    }
                }
            }
        }
    }

    // ── commands ────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                topic,
                options,
                listener,
                result_tx,
            } => {
                let id = self.registry.add(&topic, options.as_ref(), listener);
                log::debug!("[realtime-link] Registered {} on '{}'", id, topic);
                self.waiters.push(AckWaiter { id, result_tx });
                self.resolve_covered_waiters();

                if self.driver.state().is_connected() {
                    self.sync_topics().await;
                } else {
                    self.driver.ensure_connected();
                }
            },
            Command::Unsubscribe { target, result_tx } => {
                let removed = match target {
                    RemoveTarget::Id(id) => {
                        if self.registry.remove(id) {
                            vec![id]
                        } else {
                            Vec::new()
                        }
                    },
                    RemoveTarget::Topic(topic) => self.registry.remove_by_topic(&topic),
                    RemoveTarget::Prefix(prefix) => self.registry.remove_by_prefix(&prefix),
                    RemoveTarget::TopicAndListener(topic, listener) => {
                        self.registry.remove_by_topic_and_listener(&topic, &listener)
                    },
                    RemoveTarget::All => self.registry.clear(),
                };
                if let Some(tx) = result_tx {
                    let _ = tx.send(removed.len());
                }
                if removed.is_empty() {
                    return;
                }
                log::debug!("[realtime-link] Removed {} registration(s)", removed.len());

                // nothing left to wait for on removed registrations
                self.resolve_covered_waiters();

                if self.registry.is_empty() {
                    self.idle_teardown();
                } else if self.driver.state().is_connected() {
                    self.sync_topics().await;
                }
            },
            Command::Publish {
                topic,
                data,
                result_tx,
            } => self.publish(topic, data, result_tx).await,
            Command::ActiveTopics { result_tx } => {
                let _ = result_tx.send(self.registry.topics());
            },
            Command::Disconnect { result_tx } => {
                self.close_channel("Disconnected by client");
                let _ = result_tx.send(());
            },
            Command::Shutdown => self.shutdown(),
        }
    }

    async fn publish(
        &mut self,
        topic: String,
        data: JsonValue,
        result_tx: oneshot::Sender<Result<JsonValue>>,
    ) {
        let kind = self.driver.kind();
        if !kind.supports_publish() {
            let _ = result_tx.send(Err(RealtimeLinkError::NotSupported(format!(
                "publish is not available on the {} transport",
                kind
            ))));
            return;
        }
        if !self.driver.state().is_connected() {
            let _ = result_tx.send(Err(RealtimeLinkError::NotConnected));
            return;
        }

        let request_id =
            self.correlator
                .register(RequestPurpose::Publish, self.timeouts.ack_timeout, Some(result_tx));
        let frame = OutboundFrame::Publish {
            request_id,
            topic,
            data,
        };
        self.emit_send(&frame);
        if let Err(e) = self.driver.send(frame).await {
            self.correlator.reject(request_id, e.clone());
            self.on_channel_lost(e.to_string(), None);
        }
    }

    // ── topic synchronisation ───────────────────────────────────────────

    /// Submit the desired key set if it differs from the acknowledged one.
    ///
    /// No-op unless connected with no submission in flight.
    async fn sync_topics(&mut self) {
        if !self.driver.state().is_connected() || self.in_flight.is_some() {
            return;
        }

        let diff = self.registry.diff(&self.acknowledged);
        if diff.is_empty() {
            self.resolve_covered_waiters();
            return;
        }

        let keys = self.registry.desired_keys();
        log::debug!(
            "[realtime-link] Submitting {} topic(s) (+{:?} -{:?})",
            keys.len(),
            diff.to_add,
            diff.to_remove
        );
        let request_id = self.correlator.register(
            RequestPurpose::TopicSubmission,
            self.timeouts.ack_timeout,
            None,
        );
        let frame = OutboundFrame::SubmitTopics {
            request_id,
            topics: keys.iter().cloned().collect(),
        };
        self.emit_send(&frame);

        match self.driver.send(frame).await {
            Ok(()) => self.in_flight = Some(InFlightSubmission { request_id, keys }),
            Err(e) => {
                self.correlator.resolve(request_id, Err(e.clone()));
                self.on_channel_lost(e.to_string(), None);
            },
        }
    }

    async fn on_submission_settled(&mut self, request_id: u64, outcome: Result<JsonValue>) {
        let submitted = match self.in_flight.take() {
            Some(in_flight) if in_flight.request_id == request_id => in_flight.keys,
            other => {
                self.in_flight = other;
                log::debug!("[realtime-link] Ignoring stale submission ack {}", request_id);
                return;
            },
        };

        match outcome {
            Ok(_) => {
                log::debug!("[realtime-link] Server acknowledged {} topic(s)", submitted.len());
                self.acknowledged = submitted;
                self.resolve_covered_waiters();
                // registry may have changed while the submission was in flight
                self.sync_topics().await;
            },
            Err(e) => {
                log::warn!("[realtime-link] Topic submission rejected: {}", e);
                self.handlers
                    .emit_error(ConnectionError::new(format!("Topic submission rejected: {}", e), false));
                let rejected: BTreeSet<String> =
                    submitted.difference(&self.acknowledged).cloned().collect();
                self.reject_waiters_where(e, |key| rejected.contains(key));
                // registrations made while the rejected list was in flight
                // still need a submission; an unchanged list is not retried
                if self.registry.desired_keys() != submitted {
                    self.sync_topics().await;
                }
            },
        }
    }

    /// Resolve every waiter whose key is acknowledged or whose registration
    /// is gone.
    fn resolve_covered_waiters(&mut self) {
        let waiters = std::mem::take(&mut self.waiters);
        for waiter in waiters {
            let covered = match self.registry.effective_key_of(waiter.id) {
                Some(key) => self.acknowledged.contains(&key),
                None => true,
            };
            if covered {
                let _ = waiter.result_tx.send(Ok(waiter.id));
            } else {
                self.waiters.push(waiter);
            }
        }
    }

    fn reject_waiters_where(&mut self, error: RealtimeLinkError, mut predicate: impl FnMut(&str) -> bool) {
        let waiters = std::mem::take(&mut self.waiters);
        for waiter in waiters {
            let matches = self
                .registry
                .effective_key_of(waiter.id)
                .is_some_and(|key| predicate(&key));
            if matches {
                let _ = waiter.result_tx.send(Err(error.clone()));
            } else {
                self.waiters.push(waiter);
            }
        }
    }

    fn reject_all_waiters(&mut self, error: RealtimeLinkError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.result_tx.send(Err(error.clone()));
        }
    }

    // ── inbound ─────────────────────────────────────────────────────────

    async fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connected {
                client_id,
                reconnected,
            } => {
                log::info!(
                    "[realtime-link] Connected ({} transport{})",
                    self.driver.kind(),
                    if reconnected { ", reconnected" } else { "" }
                );
                self.acknowledged.clear();
                self.in_flight = None;
                self.handlers.emit_connect(ConnectInfo {
                    client_id,
                    reconnected,
                });
                if self.registry.is_empty() {
                    self.idle_teardown();
                } else {
                    self.sync_topics().await;
                }
            },
            DriverEvent::ConnectFailed(e) => {
                self.handlers
                    .emit_error(ConnectionError::new(e.to_string(), true));
                if self.registry.is_empty() {
                    self.driver.close();
                    return;
                }
                self.retry_or_give_up();
            },
            DriverEvent::Lost { message, code } => {
                log::warn!("[realtime-link] Channel lost: {}", message);
                self.on_channel_lost(message, code);
            },
            DriverEvent::Message(msg) => self.handle_message(msg).await,
            DriverEvent::Malformed(reason) => {
                log::warn!("[realtime-link] Dropping malformed frame: {}", reason);
                self.handlers.emit_error(ConnectionError::new(reason, true));
            },
        }
    }

    async fn handle_message(&mut self, msg: InboundMessage) {
        if self.handlers.on_receive.is_some() {
            if let Ok(raw) = serde_json::to_string(&msg) {
                self.handlers.emit_receive(&raw);
            }
        }

        match msg.correlation_id() {
            Ok(Some(request_id)) => {
                let outcome: Result<JsonValue> = match msg.error {
                    Some(detail) => Err(detail.into()),
                    None => Ok(msg.payload),
                };
                match self.correlator.resolve(request_id, outcome.clone()) {
                    Some(RequestPurpose::TopicSubmission) => {
                        self.on_submission_settled(request_id, outcome).await;
                    },
                    Some(RequestPurpose::Publish) => {},
                    None => log::debug!(
                        "[realtime-link] Dropping ack for unknown request {}",
                        request_id
                    ),
                }
            },
            Ok(None) => self.dispatch(msg),
            Err(e) => log::warn!("[realtime-link] Dropping frame: {}", e),
        }
    }

    fn dispatch(&self, msg: InboundMessage) {
        // detached snapshot; listeners may change the registry meanwhile
        let listeners = self.registry.listeners_for(&msg.topic);
        if listeners.is_empty() {
            log::debug!("[realtime-link] No listener for topic '{}'", msg.topic);
            return;
        }
        let event = TopicEvent::from(msg);
        for listener in listeners {
            listener(&event);
        }
    }

    // ── failures ────────────────────────────────────────────────────────

    fn on_channel_lost(&mut self, message: String, code: Option<u16>) {
        let was_connected = self.driver.state().is_connected();
        self.correlator
            .reject_all(RealtimeLinkError::ConnectionLost(message.clone()));
        self.acknowledged.clear();
        self.in_flight = None;

        if self.registry.is_empty() {
            self.idle_teardown();
            return;
        }

        if was_connected {
            let reason = match code {
                Some(code) => DisconnectReason::with_code(message, code),
                None => DisconnectReason::new(message),
            };
            self.handlers
                .emit_disconnect(reason.with_active_topics(self.registry.topics()));
        }
        self.retry_or_give_up();
    }

    fn retry_or_give_up(&mut self) {
        match self.driver.schedule_reconnect() {
            ReconnectOutcome::Scheduled { attempt, delay } => {
                log::debug!(
                    "[realtime-link] {} topic(s) waiting for retry {} in {:?}",
                    self.registry.topics().len(),
                    attempt,
                    delay
                );
            },
            ReconnectOutcome::Exhausted { attempts } => {
                let message = format!("Max reconnection attempts ({}) reached", attempts);
                self.handlers
                    .emit_error(ConnectionError::new(message.clone(), false));
                self.reject_all_waiters(RealtimeLinkError::ConnectError(message.clone()));
                self.handlers.emit_disconnect(
                    DisconnectReason::new(message).with_active_topics(self.registry.topics()),
                );
            },
        }
    }

    fn expire_requests(&mut self) {
        let expired = self.correlator.expire(TokioInstant::now());
        let submission_timed_out = expired.iter().any(|(id, purpose)| {
            *purpose == RequestPurpose::TopicSubmission
                && self.in_flight.as_ref().is_some_and(|f| f.request_id == *id)
        });
        if submission_timed_out {
            // server view is unknown; start over on a fresh channel
            log::warn!("[realtime-link] Topic submission was not acknowledged in time");
            self.restart_channel("Topic submission timed out");
        }
    }

    fn on_token_changed(&mut self) {
        let state = self.driver.state();
        if matches!(state, ConnectionState::Connected | ConnectionState::Connecting) {
            log::info!("[realtime-link] Auth token changed, reconnecting");
            self.restart_channel("Auth token changed");
        }
    }

    /// Replace the channel with a fresh connect attempt.
    fn restart_channel(&mut self, reason: &str) {
        let was_connected = self.driver.state().is_connected();
        self.correlator
            .reject_all(RealtimeLinkError::ConnectionLost(reason.to_string()));
        self.acknowledged.clear();
        self.in_flight = None;
        if was_connected {
            self.handlers.emit_disconnect(
                DisconnectReason::new(reason).with_active_topics(self.registry.topics()),
            );
        }
        self.driver.force_reconnect();
    }

    // ── teardown ────────────────────────────────────────────────────────

    /// Close a channel nobody needs any more.
    fn idle_teardown(&mut self) {
        log::info!("[realtime-link] No active subscriptions, closing channel");
        self.close_channel("No active subscriptions");
    }

    /// Intentional close: cancels reconnects, fails pending requests and
    /// reports an empty topic list.
    fn close_channel(&mut self, reason: &str) {
        let state = self.driver.state();
        self.driver.close();
        self.correlator
            .reject_all(RealtimeLinkError::ConnectionLost(reason.to_string()));
        self.acknowledged.clear();
        self.in_flight = None;
        self.reject_all_waiters(RealtimeLinkError::ConnectionLost(reason.to_string()));

        if !matches!(state, ConnectionState::Idle | ConnectionState::Closed) {
            self.handlers.emit_disconnect(DisconnectReason::new(reason));
        }
    }

    fn shutdown(&mut self) {
        log::debug!("[realtime-link] Multiplexer shutting down");
        self.close_channel("Multiplexer dropped");
    }

    fn emit_send(&self, frame: &OutboundFrame) {
        if self.handlers.on_send.is_some() {
            if let Ok(raw) = serde_json::to_string(&frame.to_client_frame()) {
                self.handlers.emit_send(&raw);
            }
        }
    }
}
