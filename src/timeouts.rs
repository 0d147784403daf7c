//! Timeout configuration for the realtime channel.
//!
//! Centralizes every timer the multiplexer arms: the connect deadline, the
//! acknowledgement deadline for correlated requests, and the keepalive
//! ping/pong pair used by the socket transport.

use std::time::Duration;

/// Timeout configuration for realtime-link operations.
///
/// # Examples
///
/// ```rust
/// use realtime_link::RealtimeTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = RealtimeTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = RealtimeTimeouts::builder()
///     .connect_timeout(Duration::from_secs(30))
///     .ack_timeout(Duration::from_secs(20))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct RealtimeTimeouts {
    /// Maximum time a single connect attempt may take (handshake plus the
    /// server's connect event). An attempt that exceeds it counts as a
    /// failed attempt for the reconnect policy.
    /// Default: 15 seconds
    pub connect_timeout: Duration,

    /// Deadline for a correlated reply (publish acknowledgement or topic
    /// submission acknowledgement).
    /// Default: 10 seconds
    pub ack_timeout: Duration,

    /// Timeout for handing a single frame to the transport.
    /// Default: 10 seconds
    pub send_timeout: Duration,

    /// Keep-alive ping interval for socket connections.
    /// Set to 0 to disable keep-alive pings.
    /// Default: 30 seconds
    pub keepalive_interval: Duration,

    /// Maximum time to wait for any frame after sending a keepalive Ping.
    /// Set to 0 to disable pong timeout checking.
    /// Default: 10 seconds
    pub pong_timeout: Duration,
}

impl Default for RealtimeTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl RealtimeTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> RealtimeTimeoutsBuilder {
        RealtimeTimeoutsBuilder::new()
    }

    /// Short timeouts suitable for localhost connections.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }

    /// Long timeouts for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connect_timeout: Duration::from_secs(45),
            ack_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(20),
        }
    }

    /// Timeouts for tests: the given acknowledgement deadline, keepalive off.
    pub fn for_testing(ack_timeout: Duration) -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ack_timeout,
            send_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::ZERO,
            pong_timeout: Duration::ZERO,
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for creating custom [`RealtimeTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct RealtimeTimeoutsBuilder {
    timeouts: RealtimeTimeouts,
}

impl RealtimeTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: RealtimeTimeouts::default(),
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    /// Set the connect timeout in seconds.
    pub fn connect_timeout_secs(self, secs: u64) -> Self {
        self.connect_timeout(Duration::from_secs(secs))
    }

    /// Set the acknowledgement deadline for correlated requests.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.ack_timeout = timeout;
        self
    }

    /// Set the acknowledgement deadline in seconds.
    pub fn ack_timeout_secs(self, secs: u64) -> Self {
        self.ack_timeout(Duration::from_secs(secs))
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval. Zero disables pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the pong timeout. Zero disables pong checking.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> RealtimeTimeouts {
        self.timeouts
    }
}
