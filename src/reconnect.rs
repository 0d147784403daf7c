//! Reconnect delay policy.
//!
//! Delays come from a predefined ascending sequence rather than pure
//! exponential growth: the first retries happen fast and the long-term delay
//! is bounded by the last entry, which repeats once the sequence runs out.

use std::time::Duration;

use crate::models::{ConnectionOptions, DEFAULT_RECONNECT_INTERVALS_MS};

/// Maps a zero-based attempt index to the delay before that attempt, or
/// `None` once the attempt cap is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    intervals: Vec<Duration>,
    max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_INTERVALS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            None,
        )
    }
}

impl ReconnectPolicy {
    /// Policy over an explicit delay sequence. An empty sequence retries
    /// immediately.
    pub fn new(intervals: Vec<Duration>, max_attempts: Option<u32>) -> Self {
        Self {
            intervals,
            max_attempts,
        }
    }

    /// Never retry: the first failure is terminal.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Some(0))
    }

    /// Doubling sequence `initial, 2*initial, ...` capped at `max`, with
    /// `steps` entries.
    pub fn exponential(initial: Duration, max: Duration, steps: u32) -> Self {
        let intervals = (0..steps.max(1))
            .map(|n| {
                let factor = 2u32.saturating_pow(n);
                initial.saturating_mul(factor).min(max)
            })
            .collect();
        Self::new(intervals, None)
    }

    pub fn from_options(options: &ConnectionOptions) -> Self {
        if !options.auto_reconnect {
            return Self::disabled();
        }
        Self::new(
            options
                .reconnect_intervals_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            options.max_reconnect_attempts,
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Delay before attempt `attempt` (0 = first retry), `None` = give up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let delay = self
            .intervals
            .get(attempt as usize)
            .or_else(|| self.intervals.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        Some(delay)
    }
}
