//! Connection lifecycle.
//!
//! This module contains:
//! - [`ConnectionState`]: the observable state of the single channel
//! - `driver`: the owner of that channel, with single-flight connect and
//!   reconnect scheduling

mod driver;

use std::fmt;

pub(crate) use driver::{ChannelDriver, DriverEvent, ReconnectOutcome};

/// Default capacity of the command queue between handles and the background task.
pub(crate) const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: std::time::Duration =
    std::time::Duration::from_secs(100 * 365 * 24 * 3600);

/// State of the multiplexer's channel.
///
/// `Idle → Connecting → Connected → (Reconnecting → Connecting → Connected)* → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected; nothing requested yet.
    #[default]
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    Connected,
    /// Waiting for the reconnect timer.
    Reconnecting,
    /// Closed intentionally, or retries exhausted.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// `Connecting` or `Reconnecting`.
    pub fn is_pending(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
