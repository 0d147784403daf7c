use serde::{Deserialize, Serialize};

/// Default reconnect delay sequence in milliseconds. The last entry repeats
/// once the sequence is exhausted.
pub const DEFAULT_RECONNECT_INTERVALS_MS: [u64; 7] = [200, 400, 800, 1600, 2000, 3000, 5000];

/// Connection-level options for the realtime channel.
///
/// These options control reconnection behaviour. Separate from
/// [`TopicOptions`](super::TopicOptions), which shape individual
/// subscriptions.
///
/// # Example
///
/// ```rust
/// use realtime_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_intervals_ms(vec![100, 250, 500, 1000])
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection on connection loss
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Ascending delays between reconnection attempts, in milliseconds.
    /// Attempt `n` waits `reconnect_intervals_ms[n]`, repeating the last
    /// entry once the list runs out.
    #[serde(default = "default_reconnect_intervals_ms")]
    pub reconnect_intervals_ms: Vec<u64>,

    /// Maximum number of reconnection attempts before giving up
    /// Default: None (infinite retries)
    /// Set to Some(0) to fail on the first connection error
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_intervals_ms() -> Vec<u64> {
    DEFAULT_RECONNECT_INTERVALS_MS.to_vec()
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_intervals_ms: default_reconnect_intervals_ms(),
            max_reconnect_attempts: None,
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Replace the reconnect delay sequence (milliseconds)
    pub fn with_reconnect_intervals_ms(mut self, intervals: Vec<u64>) -> Self {
        self.reconnect_intervals_ms = intervals;
        self
    }

    /// Set the maximum number of reconnection attempts
    /// Pass None for infinite retries
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }
}
