//! Bidirectional socket transport.
//!
//! One background task owns the socket. It forwards queued frames as JSON
//! text, turns inbound text into [`TransportEvent`]s and runs the keepalive:
//! a Ping after `keepalive_interval` of silence, and a close if nothing at
//! all arrives within `pong_timeout` of that Ping.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        http::header::{HeaderValue, AUTHORIZATION},
        protocol::{Message, WebSocketConfig},
    },
};

use super::{
    Channel, ConnectRequest, Connector, OutboundFrame, TransportEvent, TransportKind,
    CHANNEL_QUEUE_CAPACITY,
};
use crate::connection::FAR_FUTURE;
use crate::error::{RealtimeLinkError, Result};
use crate::models::InboundMessage;
use crate::url_builder::to_ws_url;

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Relative path of the socket endpoint.
pub const SOCKET_PATH: &str = "/api/realtime/ws";

const MAX_WS_MESSAGE_BYTES: usize = 64 << 20; // 64 MiB

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    path: String,
    max_message_bytes: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            path: SOCKET_PATH.to_string(),
            max_message_bytes: MAX_WS_MESSAGE_BYTES,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Largest inbound message; a bigger one closes the channel.
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

fn apply_auth_header(
    request: &mut tokio_tungstenite::tungstenite::http::Request<()>,
    token: Option<&str>,
) -> Result<()> {
    if let Some(token) = token {
        let header_value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            RealtimeLinkError::AuthenticationError(format!(
                "Invalid token for Authorization header: {}",
                e
            ))
        })?;
        request.headers_mut().insert(AUTHORIZATION, header_value);
    }
    Ok(())
}

fn handshake_error(err: WsError) -> RealtimeLinkError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let body_text = response
                .into_body()
                .as_ref()
                .and_then(|b| {
                    if b.is_empty() {
                        None
                    } else {
                        Some(String::from_utf8_lossy(b).into_owned())
                    }
                })
                .unwrap_or_default();
            let message = match status.as_u16() {
                401 => "Unauthorized: socket requires valid credentials".to_string(),
                403 => "Forbidden: access to socket denied".to_string(),
                code if body_text.is_empty() => format!("Socket HTTP error: {}", code),
                code => format!("Socket HTTP error {}: {}", code, body_text),
            };
            RealtimeLinkError::ConnectError(message)
        },
        other => RealtimeLinkError::ConnectError(format!("Connection failed: {}", other)),
    }
}

/// Spread keepalive pings across clients to avoid synchronized bursts.
///
/// The jitter is derived from `seed`, so reconnecting to the same endpoint
/// keeps its phase.
fn jitter_keepalive_interval(base: Duration, seed: &str) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms <= 1 {
        return base;
    }

    // +/-20% jitter window.
    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    };

    Duration::from_millis(jittered_ms)
}

fn parse_frame(text: &str) -> TransportEvent {
    match InboundMessage::parse(text) {
        Ok(msg) => TransportEvent::Message(msg),
        Err(e) => TransportEvent::Malformed(e.to_string()),
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn path(&self) -> &str {
        &self.path
    }

    async fn connect(&self, request: ConnectRequest) -> Result<Channel> {
        let ws_url = to_ws_url(&request.url)?;
        log::debug!("[realtime-link] Opening socket to {}", ws_url);

        let mut ws_request = ws_url.as_str().into_client_request().map_err(|e| {
            RealtimeLinkError::ConfigurationError(format!("Failed to build socket request: {}", e))
        })?;
        apply_auth_header(&mut ws_request, request.token.as_deref())?;

        let config = WebSocketConfig::default()
            .max_message_size(Some(self.max_message_bytes))
            .max_frame_size(Some(self.max_message_bytes));
        let (ws, _response) = connect_async_with_config(ws_request, Some(config), false)
            .await
            .map_err(handshake_error)?;
        log::info!("[realtime-link] Socket connected to {}", ws_url);

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);

        let keepalive = Keepalive::new(
            request.timeouts.keepalive_interval,
            request.timeouts.pong_timeout,
            &ws_url,
        );
        let task = tokio::spawn(socket_task(ws, outbound_rx, inbound_tx, keepalive));

        Ok(Channel::new(TransportKind::Socket, None, outbound_tx, inbound_rx).with_io_task(task))
    }
}

#[derive(Debug, Clone, Copy)]
struct Keepalive {
    interval: Duration,
    pong_timeout: Duration,
}

impl Keepalive {
    fn new(interval: Duration, pong_timeout: Duration, seed: &str) -> Self {
        Self {
            interval: if interval.is_zero() {
                Duration::ZERO
            } else {
                jitter_keepalive_interval(interval, seed)
            },
            pong_timeout,
        }
    }

    fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    fn checks_pong(&self) -> bool {
        self.enabled() && !self.pong_timeout.is_zero()
    }

    fn next_ping(&self) -> TokioInstant {
        TokioInstant::now() + if self.enabled() { self.interval } else { FAR_FUTURE }
    }
}

async fn socket_task(
    mut ws: WebSocketStream,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    inbound_tx: mpsc::Sender<TransportEvent>,
    keepalive: Keepalive,
) {
    let mut idle_deadline = keepalive.next_ping();
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    let closed = loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);
        let pong_sleep = tokio::time::sleep_until(pong_deadline);
        tokio::pin!(pong_sleep);

        tokio::select! {
            biased;

            _ = &mut pong_sleep, if keepalive.checks_pong() && awaiting_pong => {
                log::warn!(
                    "[realtime-link] Pong timeout ({:?}), server unresponsive",
                    keepalive.pong_timeout,
                );
                break TransportEvent::closed(format!(
                    "Pong timeout ({:?}), server unresponsive",
                    keepalive.pong_timeout
                ));
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    // channel dropped by its owner
                    let _ = ws.close(None).await;
                    return;
                };
                let text = match serde_json::to_string(&frame.to_client_frame()) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("[realtime-link] Failed to encode frame: {}", e);
                        continue;
                    },
                };
                if let Err(e) = ws.send(Message::Text(text.into())).await {
                    break TransportEvent::closed(format!("Socket send failed: {}", e));
                }
            }

            _ = &mut idle_sleep, if keepalive.enabled() && !awaiting_pong => {
                if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                    log::warn!("[realtime-link] Keepalive ping failed: {}", e);
                    break TransportEvent::closed(format!("Keepalive ping failed: {}", e));
                }
                if keepalive.checks_pong() {
                    awaiting_pong = true;
                    pong_deadline = TokioInstant::now() + keepalive.pong_timeout;
                }
                idle_deadline = keepalive.next_ping();
            }

            frame = ws.next() => {
                idle_deadline = keepalive.next_ping();
                if awaiting_pong {
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                }

                let event = match frame {
                    Some(Ok(Message::Text(text))) => parse_frame(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => parse_frame(text),
                        Err(e) => TransportEvent::Malformed(format!("Binary frame is not UTF-8: {}", e)),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                        continue;
                    },
                    Some(Ok(Message::Pong(_))) => {
                        log::debug!("[realtime-link] Keepalive: received Pong");
                        continue;
                    },
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => TransportEvent::Closed {
                                message: f.reason.to_string(),
                                code: Some(f.code.into()),
                            },
                            None => TransportEvent::closed("Server closed connection"),
                        };
                    },
                    Some(Err(e)) => break TransportEvent::closed(format!("Socket error: {}", e)),
                    None => break TransportEvent::closed("Socket stream ended"),
                };

                if inbound_tx.send(event).await.is_err() {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }
    };

    let _ = inbound_tx.send(closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_jitter_is_deterministic() {
        let base = Duration::from_secs(30);
        assert_eq!(
            jitter_keepalive_interval(base, "ws://a/api/realtime/ws"),
            jitter_keepalive_interval(base, "ws://a/api/realtime/ws")
        );
    }

    #[test]
    fn test_keepalive_jitter_stays_within_bounds() {
        let base = Duration::from_secs(30);
        for seed in ["a", "b", "c", "ws://host:1/x", "wss://other/y"] {
            let jittered = jitter_keepalive_interval(base, seed);
            assert!(jittered >= Duration::from_secs(24), "{:?}", jittered);
            assert!(jittered <= Duration::from_secs(36), "{:?}", jittered);
        }
    }

    #[test]
    fn test_disabled_keepalive() {
        let keepalive = Keepalive::new(Duration::ZERO, Duration::from_secs(10), "x");
        assert!(!keepalive.enabled());
        assert!(!keepalive.checks_pong());

        let no_pong = Keepalive::new(Duration::from_secs(5), Duration::ZERO, "x");
        assert!(no_pong.enabled());
        assert!(!no_pong.checks_pong());
    }

    #[test]
    fn test_auth_header_is_bearer() {
        let mut request = "ws://localhost:8090/api/realtime/ws".into_client_request().unwrap();
        apply_auth_header(&mut request, Some("tok")).unwrap();
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer tok");

        let mut anonymous = "ws://localhost:8090/api/realtime/ws".into_client_request().unwrap();
        apply_auth_header(&mut anonymous, None).unwrap();
        assert!(anonymous.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_parse_frame_classifies() {
        assert!(matches!(
            parse_frame(r#"{"topic":"chat","payload":1}"#),
            TransportEvent::Message(_)
        ));
        assert!(matches!(parse_frame("{oops"), TransportEvent::Malformed(_)));
    }
}
