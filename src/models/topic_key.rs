use std::fmt;

use url::form_urlencoded;

use super::topic_options::TopicOptions;

/// Hashable identity of a server-side registration: a topic plus its
/// canonically serialized options.
///
/// The wire form is the bare topic, or `topic?options=<percent-encoded JSON>`
/// when options are present (`&options=` if the topic already carries a
/// query string). Inbound events for an option-bearing registration are
/// addressed to this full wire form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    topic: String,
    options: Option<String>,
}

impl TopicKey {
    /// Key for a subscription without options.
    pub fn bare(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            options: None,
        }
    }

    /// Key for a subscription with options. Empty options yield a bare key.
    pub fn new(topic: impl Into<String>, options: Option<&TopicOptions>) -> Self {
        let options = options
            .filter(|o| !o.is_empty())
            .and_then(|o| serde_json::to_string(o).ok());
        Self {
            topic: topic.into(),
            options,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_bare(&self) -> bool {
        self.options.is_none()
    }

    /// The bare key for the same topic.
    pub fn to_bare(&self) -> Self {
        Self::bare(self.topic.clone())
    }

    /// Serialized form sent to (and echoed back by) the server.
    pub fn wire(&self) -> String {
        match &self.options {
            None => self.topic.clone(),
            Some(json) => {
                let encoded: String = form_urlencoded::byte_serialize(json.as_bytes()).collect();
                let separator = if self.topic.contains('?') { '&' } else { '?' };
                format!("{}{}options={}", self.topic, separator, encoded)
            },
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}
