use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{RealtimeLinkError, Result};

use super::error_detail::ErrorDetail;

/// Server-to-client frame.
///
/// A frame carrying `requestId` is the acknowledgement of a correlated
/// request; anything else is a topic broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Topic (wire key) the event is addressed to.
    #[serde(default)]
    pub topic: String,

    /// Optional event name within the topic (e.g. "create", "update").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default)]
    pub payload: JsonValue,

    /// Server-side event id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Correlation id of the request this frame answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Set when the server rejects the correlated request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl InboundMessage {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            RealtimeLinkError::MalformedPayload(format!("Failed to parse inbound frame: {}", e))
        })
    }

    /// Topic broadcast.
    pub fn broadcast(topic: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            topic: topic.into(),
            event: None,
            payload,
            id: None,
            request_id: None,
            error: None,
        }
    }

    /// Successful acknowledgement of request `request_id`.
    pub fn ack(request_id: u64, payload: JsonValue) -> Self {
        Self {
            topic: String::new(),
            event: None,
            payload,
            id: None,
            request_id: Some(request_id.to_string()),
            error: None,
        }
    }

    /// Error acknowledgement of request `request_id`.
    pub fn nack(request_id: u64, error: ErrorDetail) -> Self {
        Self {
            error: Some(error),
            ..Self::ack(request_id, JsonValue::Null)
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Numeric correlation id, if this frame is an acknowledgement.
    ///
    /// Returns `Err` for a `requestId` that is not one of ours.
    pub fn correlation_id(&self) -> Result<Option<u64>> {
        match &self.request_id {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                RealtimeLinkError::MalformedPayload(format!("Invalid requestId '{}'", raw))
            }),
        }
    }
}
