//! # realtime-link: realtime subscription multiplexer
//!
//! Keeps any number of topic subscriptions alive over one long-lived channel,
//! either a server-sent event stream or a WebSocket.
//!
//! ## Features
//!
//! - **One channel**: opened lazily on the first subscribe, closed when the
//!   last subscription goes away
//! - **Reconnects**: ascending delay sequence, full topic resubmission after
//!   every reconnect
//! - **Minimal traffic**: duplicate subscriptions share one server-side key and
//!   concurrent changes are coalesced into a single submission
//! - **Correlated publish**: `publish` resolves with the server's
//!   acknowledgement or fails with a timeout
//! - **Lifecycle hooks**: `on_connect`, `on_disconnect` (with the topics still
//!   wanted), `on_error`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use realtime_link::{EventHandlers, SubscriptionMultiplexer, TopicEvent, TopicOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let realtime = SubscriptionMultiplexer::builder()
//!         .base_url("http://127.0.0.1:8090")
//!         .event_handlers(EventHandlers::new().on_disconnect(|reason| {
//!             if !reason.is_intentional() {
//!                 eprintln!("still reconnecting for {:?}", reason.active_topics);
//!             }
//!         }))
//!         .build()?;
//!
//!     let posts = realtime
//!         .subscribe("posts/*", |event: &TopicEvent| println!("{:?}", event.payload))
//!         .await?;
//!
//!     let _published = realtime
//!         .subscribe_with_options(
//!             "posts/*",
//!             TopicOptions::new().with_filter("status = 'published'"),
//!             |event: &TopicEvent| println!("published: {:?}", event.payload),
//!         )
//!         .await?;
//!
//!     posts.unsubscribe().await?;
//!     realtime.unsubscribe(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Socket transport and publish
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use realtime_link::{StaticToken, SubscriptionMultiplexer, WebSocketConnector};
//!
//! # async fn example() -> realtime_link::Result<()> {
//! let realtime = SubscriptionMultiplexer::builder()
//!     .base_url("https://example.com")
//!     .connector(Arc::new(WebSocketConnector::new()))
//!     .auth(Arc::new(StaticToken::new("your-jwt-token")))
//!     .build()?;
//!
//! realtime.subscribe("chat", |_event: &realtime_link::TopicEvent| {}).await?;
//! let ack = realtime.publish("chat", serde_json::json!({"text": "hi"})).await?;
//! # let _ = ack;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod multiplexer;
pub mod reconnect;
pub mod registry;
pub mod timeouts;
pub mod transport;
pub mod url_builder;

// Re-export main types for convenience
pub use auth::{ArcAuthTokenProvider, AuthTokenProvider, StaticToken, TokenStore};
pub use connection::ConnectionState;
pub use error::{RealtimeLinkError, Result};
pub use event_handlers::{ConnectInfo, ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    ConnectionOptions, ErrorDetail, InboundMessage, TopicEvent, TopicKey, TopicOptions,
};
pub use multiplexer::{Subscription, SubscriptionMultiplexer, SubscriptionMultiplexerBuilder};
pub use reconnect::ReconnectPolicy;
pub use registry::{Listener, ListenerId};
pub use timeouts::{RealtimeTimeouts, RealtimeTimeoutsBuilder};
pub use transport::{
    Channel, ConnectRequest, Connector, EventStreamConnector, OutboundFrame, TransportEvent,
    TransportKind, WebSocketConnector,
};
pub use url_builder::{BaseUrl, UrlBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
