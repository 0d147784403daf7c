use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-subscription options forwarded to the server.
///
/// Options change *what* the server sends (filters, relation expansion,
/// custom headers), so two subscriptions to the same topic with different
/// options are distinct server registrations. Both maps are ordered, which
/// keeps the serialized form independent of insertion order.
///
/// # Example
///
/// ```rust
/// use realtime_link::TopicOptions;
///
/// let options = TopicOptions::new()
///     .with_filter("status = 'published'")
///     .with_expand("author");
/// assert!(!options.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicOptions {
    /// Query parameters (e.g. `filter`, `expand`, `fields`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,

    /// Extra headers the server should evaluate the subscription with.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl TopicOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict delivered events with a server-side filter expression.
    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        self.with_query("filter", filter)
    }

    /// Ask the server to expand relations in delivered payloads.
    pub fn with_expand(self, expand: impl Into<String>) -> Self {
        self.with_query("expand", expand)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Options with neither query parameters nor headers are equivalent to
    /// no options at all.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.headers.is_empty()
    }
}
