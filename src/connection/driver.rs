//! Owner of the single transport channel.
//!
//! The driver holds at most one open [`Channel`], at most one in-flight
//! connect future and at most one reconnect deadline. Every caller that
//! wants a connection goes through [`ChannelDriver::ensure_connected`], so
//! concurrent requests share the same attempt instead of opening duplicates.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant as TokioInstant;

use super::ConnectionState;
use crate::auth::ArcAuthTokenProvider;
use crate::error::{RealtimeLinkError, Result};
use crate::models::InboundMessage;
use crate::reconnect::ReconnectPolicy;
use crate::timeouts::RealtimeTimeouts;
use crate::transport::{
    Channel, ConnectRequest, Connector, OutboundFrame, TransportEvent, TransportKind,
};
use crate::url_builder::UrlBuilder;

/// What the driver observed on its channel or timers.
#[derive(Debug)]
pub(crate) enum DriverEvent {
    Connected {
        client_id: Option<String>,
        reconnected: bool,
    },
    ConnectFailed(RealtimeLinkError),
    /// The open channel went away.
    Lost { message: String, code: Option<u16> },
    Message(InboundMessage),
    Malformed(String),
}

/// Result of scheduling a retry after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOutcome {
    Scheduled { attempt: u32, delay: Duration },
    /// The policy gave up; the driver is now `Closed`.
    Exhausted { attempts: u32 },
}

enum Wake {
    Connect(Result<Channel>),
    ReconnectDue,
    Transport(Option<TransportEvent>),
}

pub(crate) struct ChannelDriver {
    connector: Arc<dyn Connector>,
    url_builder: Arc<dyn UrlBuilder>,
    auth: ArcAuthTokenProvider,
    timeouts: RealtimeTimeouts,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    channel: Option<Channel>,
    connecting: Option<BoxFuture<'static, Result<Channel>>>,
    reconnect_at: Option<TokioInstant>,
    attempts: u32,
    ever_connected: bool,
}

async fn connect_outcome(connecting: &mut Option<BoxFuture<'static, Result<Channel>>>) -> Result<Channel> {
    match connecting.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn reconnect_timer(at: Option<TokioInstant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn channel_event(channel: &mut Option<Channel>) -> Option<TransportEvent> {
    match channel.as_mut() {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

impl ChannelDriver {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        url_builder: Arc<dyn UrlBuilder>,
        auth: ArcAuthTokenProvider,
        timeouts: RealtimeTimeouts,
        policy: ReconnectPolicy,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            connector,
            url_builder,
            auth,
            timeouts,
            policy,
            state_tx,
            channel: None,
            connecting: None,
            reconnect_at: None,
            attempts: 0,
            ever_connected: false,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.connector.kind()
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            log::info!("[realtime-link] Connection state {} -> {}", state, next);
            *state = next;
            true
        });
    }

    /// Start connecting unless a connection exists or is already underway.
    ///
    /// From `Closed` (including after exhausted retries) this re-arms the
    /// attempt counter.
    pub(crate) fn ensure_connected(&mut self) {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting => {},
            ConnectionState::Idle | ConnectionState::Closed => {
                self.attempts = 0;
                self.begin_connect();
            },
        }
    }

    fn begin_connect(&mut self) {
        self.channel = None;
        self.reconnect_at = None;

        let connector = self.connector.clone();
        let url = self.url_builder.build_url(connector.path());
        let token = self.auth.current_token();
        let timeouts = self.timeouts.clone();

        self.connecting = Some(Box::pin(async move {
            let request = ConnectRequest {
                url: url?,
                token,
                timeouts: timeouts.clone(),
            };
            if RealtimeTimeouts::is_no_timeout(timeouts.connect_timeout) {
                return connector.connect(request).await;
            }
            match tokio::time::timeout(timeouts.connect_timeout, connector.connect(request)).await {
                Ok(result) => result,
                Err(_) => Err(RealtimeLinkError::ConnectError(format!(
                    "Connection timeout ({:?})",
                    timeouts.connect_timeout
                ))),
            }
        }));
        self.set_state(ConnectionState::Connecting);
    }

    /// Wait for the next observable event.
    ///
    /// Cancel-safe: the connect future and the channel are held by the
    /// driver, so dropping this future loses nothing.
    pub(crate) async fn next_event(&mut self) -> DriverEvent {
        loop {
            let wake = tokio::select! {
                result = connect_outcome(&mut self.connecting) => Wake::Connect(result),
                _ = reconnect_timer(self.reconnect_at) => Wake::ReconnectDue,
                event = channel_event(&mut self.channel) => Wake::Transport(event),
            };

            match wake {
                Wake::Connect(Ok(channel)) => {
                    self.connecting = None;
                    let client_id = channel.client_id().map(str::to_string);
                    self.channel = Some(channel);
                    self.attempts = 0;
                    let reconnected = self.ever_connected;
                    self.ever_connected = true;
                    self.set_state(ConnectionState::Connected);
                    return DriverEvent::Connected {
                        client_id,
                        reconnected,
                    };
                },
                Wake::Connect(Err(e)) => {
                    self.connecting = None;
                    log::warn!("[realtime-link] Connect attempt failed: {}", e);
                    return DriverEvent::ConnectFailed(e);
                },
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    log::debug!("[realtime-link] Reconnect attempt {}", self.attempts);
                    self.begin_connect();
                },
                Wake::Transport(Some(TransportEvent::Message(msg))) => {
                    return DriverEvent::Message(msg);
                },
                Wake::Transport(Some(TransportEvent::Malformed(reason))) => {
                    return DriverEvent::Malformed(reason);
                },
                Wake::Transport(Some(TransportEvent::Closed { message, code })) => {
                    self.channel = None;
                    return DriverEvent::Lost { message, code };
                },
                Wake::Transport(None) => {
                    self.channel = None;
                    return DriverEvent::Lost {
                        message: "Transport task ended".to_string(),
                        code: None,
                    };
                },
            }
        }
    }

    /// Consult the policy after a failed attempt or a lost channel.
    pub(crate) fn schedule_reconnect(&mut self) -> ReconnectOutcome {
        self.channel = None;
        self.connecting = None;
        match self.policy.next_delay(self.attempts) {
            Some(delay) => {
                self.attempts += 1;
                self.reconnect_at = Some(TokioInstant::now() + delay);
                self.set_state(ConnectionState::Reconnecting);
                log::info!(
                    "[realtime-link] Reconnecting in {:?} (attempt {})",
                    delay,
                    self.attempts
                );
                ReconnectOutcome::Scheduled {
                    attempt: self.attempts,
                    delay,
                }
            },
            None => {
                self.reconnect_at = None;
                self.set_state(ConnectionState::Closed);
                log::warn!(
                    "[realtime-link] Giving up after {} reconnect attempts",
                    self.attempts
                );
                ReconnectOutcome::Exhausted {
                    attempts: self.attempts,
                }
            },
        }
    }

    /// Drop the current channel and connect again right away.
    pub(crate) fn force_reconnect(&mut self) {
        log::info!("[realtime-link] Forcing reconnect");
        self.attempts = 0;
        self.begin_connect();
    }

    /// Tear everything down and cancel any scheduled reconnect.
    pub(crate) fn close(&mut self) {
        self.channel = None;
        self.connecting = None;
        self.reconnect_at = None;
        self.attempts = 0;
        self.set_state(ConnectionState::Closed);
    }

    /// Takes `&mut self`: the pending connect future is `Send` but not `Sync`.
    pub(crate) async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(RealtimeLinkError::NotConnected)?;
        channel.send(frame, self.timeouts.send_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::url_builder::BaseUrl;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Connector whose attempts fail until `fail_first` is used up.
    struct FlakyConnector {
        fail_first: u32,
        attempts: AtomicU32,
        hang: bool,
        peers: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    }

    impl FlakyConnector {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                attempts: AtomicU32::new(0),
                hang: false,
                peers: Mutex::new(Vec::new()),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                fail_first: 0,
                attempts: AtomicU32::new(0),
                hang: true,
                peers: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Connector for FlakyConnector {
        fn kind(&self) -> TransportKind {
            TransportKind::Socket
        }

        fn path(&self) -> &str {
            "/api/realtime/ws"
        }

        async fn connect(&self, _request: ConnectRequest) -> Result<Channel> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if n < self.fail_first {
                return Err(RealtimeLinkError::ConnectError("refused".into()));
            }
            let (out_tx, _out_rx) = mpsc::channel(8);
            let (in_tx, in_rx) = mpsc::channel(8);
            self.peers.lock().unwrap().push(in_tx);
            Ok(Channel::new(TransportKind::Socket, Some(format!("client-{}", n)), out_tx, in_rx))
        }
    }

    fn driver(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> ChannelDriver {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        ChannelDriver::new(
            connector,
            Arc::new(BaseUrl::parse("http://localhost:8090").unwrap()),
            Arc::new(StaticToken::none()),
            RealtimeTimeouts::for_testing(Duration::from_secs(1)),
            policy,
            state_tx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_connected_is_single_flight() {
        let connector = FlakyConnector::new(0);
        let mut driver = driver(connector.clone(), ReconnectPolicy::default());

        driver.ensure_connected();
        driver.ensure_connected();
        assert_eq!(driver.state(), ConnectionState::Connecting);

        match driver.next_event().await {
            DriverEvent::Connected {
                client_id,
                reconnected,
            } => {
                assert_eq!(client_id.as_deref(), Some("client-0"));
                assert!(!reconnected);
            },
            other => panic!("unexpected event {:?}", other),
        }
        driver.ensure_connected();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(driver.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_follow_policy_then_exhaust() {
        let connector = FlakyConnector::new(10);
        let policy = ReconnectPolicy::new(vec![Duration::from_millis(100)], Some(2));
        let mut driver = driver(connector.clone(), policy);

        driver.ensure_connected();
        assert!(matches!(driver.next_event().await, DriverEvent::ConnectFailed(_)));
        assert_eq!(
            driver.schedule_reconnect(),
            ReconnectOutcome::Scheduled {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(driver.state(), ConnectionState::Reconnecting);

        // the timer fires, the retry fails again
        assert!(matches!(driver.next_event().await, DriverEvent::ConnectFailed(_)));
        assert!(matches!(driver.schedule_reconnect(), ReconnectOutcome::Scheduled { attempt: 2, .. }));
        assert!(matches!(driver.next_event().await, DriverEvent::ConnectFailed(_)));
        assert_eq!(
            driver.schedule_reconnect(),
            ReconnectOutcome::Exhausted { attempts: 2 }
        );
        assert_eq!(driver.state(), ConnectionState::Closed);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

        // a later request re-arms the counter
        driver.ensure_connected();
        assert_eq!(driver.attempts(), 0);
        assert_eq!(driver.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let mut driver = driver(FlakyConnector::hanging(), ReconnectPolicy::default());
        driver.timeouts.connect_timeout = Duration::from_secs(15);

        driver.ensure_connected();
        match driver.next_event().await {
            DriverEvent::ConnectFailed(RealtimeLinkError::ConnectError(msg)) => {
                assert!(msg.contains("timeout"), "{}", msg)
            },
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_channel_and_reconnect_flags_reconnected() {
        let connector = FlakyConnector::new(0);
        let mut driver = driver(connector.clone(), ReconnectPolicy::default());

        driver.ensure_connected();
        assert!(matches!(driver.next_event().await, DriverEvent::Connected { .. }));

        let peer = connector.peers.lock().unwrap()[0].clone();
        peer.send(TransportEvent::Closed {
            message: "bye".into(),
            code: Some(1001),
        })
        .await
        .unwrap();
        match driver.next_event().await {
            DriverEvent::Lost { message, code } => {
                assert_eq!(message, "bye");
                assert_eq!(code, Some(1001));
            },
            other => panic!("unexpected event {:?}", other),
        }

        driver.schedule_reconnect();
        match driver.next_event().await {
            DriverEvent::Connected { reconnected, .. } => assert!(reconnected),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_reconnect() {
        let connector = FlakyConnector::new(1);
        let mut driver = driver(connector.clone(), ReconnectPolicy::default());

        driver.ensure_connected();
        assert!(matches!(driver.next_event().await, DriverEvent::ConnectFailed(_)));
        driver.schedule_reconnect();
        driver.close();
        assert_eq!(driver.state(), ConnectionState::Closed);

        let waited = tokio::time::timeout(Duration::from_secs(30), driver.next_event()).await;
        assert!(waited.is_err(), "closed driver must stay quiet");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_channel_is_not_connected() {
        let mut driver = driver(FlakyConnector::new(0), ReconnectPolicy::default());
        let result = driver
            .send(OutboundFrame::SubmitTopics {
                request_id: 1,
                topics: vec![],
            })
            .await;
        assert_eq!(result, Err(RealtimeLinkError::NotConnected));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test(start_paused = true)]
    async fn test_send_future_is_send_while_connecting() {
        let mut driver = driver(FlakyConnector::hanging(), ReconnectPolicy::default());
        driver.ensure_connected();

        let send = driver.send(OutboundFrame::SubmitTopics {
            request_id: 1,
            topics: vec![],
        });
        // the actor awaits this inside a spawned task
        assert_send(&send);
        assert_eq!(send.await, Err(RealtimeLinkError::NotConnected));
    }
}
